//! Line-oriented console front-end
//!
//! Prints every level of the chain as a block of rows and reads navigation
//! commands from a line stream. Row numbers refer to the sorted view as it
//! was last printed, not to the live view, which keeps re-sorting while
//! metrics arrive.

use crate::chain::{Advance, NavigationChain};
use crate::error::{Error, Result};
use crate::level::{Level, Row};
use crate::node::Node;
use crate::task::ResolutionTask;
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;
use sweeper_common::format::{metric_label, metric_tier};
use sweeper_common::MetricKind;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub const HELP: &str = "\
commands:
  show                  print every level
  open <level> <row>    select a row (a row past the end clears deeper levels)
  clear <level>         remove every level after <level>
  wait                  wait for the deepest level to finish resolving
  help                  this text
  quit                  exit";

/// One console command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Show,
    Open { level: usize, row: usize },
    Clear { level: usize },
    Wait,
    Help,
    Quit,
}

fn parse_index(word: Option<&str>, what: &str) -> Result<usize> {
    let word = word.ok_or_else(|| {
        sweeper_common::Error::InvalidInput(format!("missing {}", what))
    })?;
    word.parse().map_err(|_| {
        sweeper_common::Error::InvalidInput(format!("{} must be a number, got '{}'", what, word))
            .into()
    })
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let command = match words.next() {
            None | Some("show") | Some("s") => Command::Show,
            Some("open") | Some("o") => Command::Open {
                level: parse_index(words.next(), "level")?,
                row: parse_index(words.next(), "row")?,
            },
            Some("clear") | Some("c") => Command::Clear {
                level: parse_index(words.next(), "level")?,
            },
            Some("wait") | Some("w") => Command::Wait,
            Some("help") | Some("h") | Some("?") => Command::Help,
            Some("quit") | Some("q") | Some("exit") => Command::Quit,
            Some(other) => {
                return Err(sweeper_common::Error::InvalidInput(format!(
                    "unknown command '{}'",
                    other
                ))
                .into())
            }
        };
        Ok(command)
    }
}

fn marker(row: &Row) -> char {
    if row.is_selected {
        '*'
    } else if row.is_running {
        '~'
    } else {
        ' '
    }
}

/// Sorted views as last printed, one per level
pub type Printed = Vec<Arc<[Arc<ResolutionTask>]>>;

/// Render one level as text
pub fn render_level(depth: usize, level: &Level, kind: MetricKind) -> String {
    render_view(depth, level, &level.view(), kind)
}

fn render_view(
    depth: usize,
    level: &Level,
    view: &[Arc<ResolutionTask>],
    kind: MetricKind,
) -> String {
    let mut out = String::new();

    if let Some(error) = level.error() {
        let _ = writeln!(out, "-- level {} --", depth);
        let _ = writeln!(out, "  ! {}", error);
        return out;
    }

    let rows = level.rows_of(view);
    let pending = rows.iter().filter(|r| r.is_running).count();
    if pending > 0 {
        let _ = writeln!(out, "-- level {} ({} resolving) --", depth, pending);
    } else {
        let _ = writeln!(out, "-- level {} --", depth);
    }

    let width = rows.iter().map(|r| r.name.chars().count()).max().unwrap_or(0);
    for (idx, row) in rows.iter().enumerate() {
        let value = row.metric.value();
        let gauge = metric_tier(value, kind).map_or("", |tier| tier.gauge());
        let line = format!(
            "{:>3} {} {:<width$}  {:>10} {}",
            idx,
            marker(row),
            row.name,
            metric_label(value, kind),
            gauge,
            width = width
        );
        let _ = writeln!(out, "{}", line.trim_end());
    }
    out
}

/// Render every level of the chain, returning the views that were shown
pub fn render_snapshot(chain: &NavigationChain, kind: MetricKind) -> (String, Printed) {
    let views: Printed = chain.levels().iter().map(Level::view).collect();
    let text = chain
        .levels()
        .iter()
        .zip(&views)
        .enumerate()
        .map(|(depth, (level, view))| render_view(depth, level, view, kind))
        .collect::<Vec<_>>()
        .join("\n");
    (text, views)
}

/// Render every level of the chain
pub fn render_chain(chain: &NavigationChain, kind: MetricKind) -> String {
    render_snapshot(chain, kind).0
}

/// Node that was printed at `row` of level `depth`
pub fn printed_node(printed: &Printed, depth: usize, row: usize) -> Option<Arc<Node>> {
    printed
        .get(depth)
        .and_then(|view| view.get(row))
        .map(|task| Arc::clone(task.node()))
}

fn describe(outcome: Advance) -> String {
    match outcome {
        Advance::Truncated => "cleared deeper levels".to_string(),
        Advance::Unchanged => "already selected".to_string(),
        Advance::Expanded { depth } => format!("opened level {}", depth),
        Advance::Selected => "selected (nothing below)".to_string(),
        Advance::ListingFailed { depth } => format!("listing failed, see level {}", depth),
    }
}

/// What a command answers with
enum Reply {
    /// Reprint the chain, optionally after describing a navigation step
    Screen(Option<Advance>),
    Text(String),
}

impl Reply {
    fn from_advance(result: Result<Advance>) -> Self {
        match result {
            Ok(advance) => Reply::Screen(Some(advance)),
            Err(e) => Reply::Text(format!("error: {}", e)),
        }
    }
}

/// Run commands from `input` until it ends or `quit` is read
pub async fn run<R, W>(
    chain: &mut NavigationChain,
    kind: MetricKind,
    input: R,
    mut output: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let (text, mut printed) = render_snapshot(chain, kind);
    output.write_all(HELP.as_bytes()).await?;
    output.write_all(b"\n\n").await?;
    output.write_all(text.as_bytes()).await?;
    output.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let reply = match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(Command::Help) => Reply::Text(HELP.to_string()),
            Ok(Command::Show) => Reply::Screen(None),
            Ok(Command::Wait) => {
                if let Some(level) = chain.levels().last() {
                    level.wait_settled().await;
                }
                Reply::Screen(None)
            }
            Ok(Command::Open { level, row }) => {
                let node = printed_node(&printed, level, row);
                Reply::from_advance(chain.advance(level, node.as_ref()).await)
            }
            Ok(Command::Clear { level }) => Reply::from_advance(chain.advance(level, None).await),
            Err(e) => Reply::Text(format!("error: {}", e)),
        };

        let text = match reply {
            Reply::Screen(advance) => {
                let (shown, views) = render_snapshot(chain, kind);
                printed = views;
                match advance {
                    Some(advance) => format!("{}\n\n{}", describe(advance), shown),
                    None => shown,
                }
            }
            Reply::Text(text) => text,
        };
        output.write_all(text.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }

    Ok(())
}
