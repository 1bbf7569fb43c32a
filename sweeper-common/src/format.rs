//! Human-scale metric labels
//!
//! Byte totals are scaled by 1024 up to petabytes. Values below ten keep one
//! fractional digit so that "1.5 GB" and "2 GB" stay distinguishable; larger
//! values are whole numbers. The tier a value lands in drives color coding.

use crate::config::MetricKind;

const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];

/// Magnitude bucket of a byte count, used for color coding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SizeTier {
    Bytes,
    Kilo,
    Mega,
    Giga,
    Tera,
    Peta,
}

impl SizeTier {
    fn from_unit_index(index: Option<usize>) -> Self {
        match index {
            None => SizeTier::Bytes,
            Some(0) => SizeTier::Kilo,
            Some(1) => SizeTier::Mega,
            Some(2) => SizeTier::Giga,
            Some(3) => SizeTier::Tera,
            Some(_) => SizeTier::Peta,
        }
    }

    /// Text stand-in for the tier color: one `#` per step above bytes
    pub fn gauge(&self) -> &'static str {
        match self {
            SizeTier::Bytes => "",
            SizeTier::Kilo => "#",
            SizeTier::Mega => "##",
            SizeTier::Giga => "###",
            SizeTier::Tera => "####",
            SizeTier::Peta => "#####",
        }
    }
}

/// Format a byte count, returning the label and its tier
pub fn human_size(bytes: u64) -> (String, SizeTier) {
    if bytes <= 1023 {
        return (bytes.to_string(), SizeTier::Bytes);
    }

    let mut size = bytes as f64;
    let mut unit = None;
    while size > 1023.0 && unit.map_or(true, |u| u < UNITS.len() - 1) {
        size /= 1024.0;
        unit = Some(unit.map_or(0, |u| u + 1));
    }

    let number = if size < 10.0 {
        let text = format!("{:.1}", size);
        text.strip_suffix(".0").map(str::to_string).unwrap_or(text)
    } else {
        group_thousands(&format!("{:.0}", size))
    };

    // The loop runs at least once for bytes > 1023
    let index = unit.unwrap_or(0);
    (
        format!("{} {}", number, UNITS[index]),
        SizeTier::from_unit_index(unit),
    )
}

/// Label for a metric of the given kind; `None` (unresolved) renders empty
pub fn metric_label(value: Option<u64>, kind: MetricKind) -> String {
    match (value, kind) {
        (None, _) => String::new(),
        (Some(bytes), MetricKind::BytesUsed) => human_size(bytes).0,
        (Some(count), MetricKind::FileCount) => group_thousands(&count.to_string()),
    }
}

/// Tier of a metric; only byte totals have one
pub fn metric_tier(value: Option<u64>, kind: MetricKind) -> Option<SizeTier> {
    match (value, kind) {
        (Some(bytes), MetricKind::BytesUsed) => Some(human_size(bytes).1),
        _ => None,
    }
}

fn group_thousands(digits: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
