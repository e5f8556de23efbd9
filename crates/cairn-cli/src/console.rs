//! Console commands
//!
//! One command per line, gdb-flavoured:
//!
//! ```text
//! b app.js:12 [if n > 3]   set a breakpoint
//! d app.js:12              delete it
//! cond app.js:12 [expr]    set or clear its condition
//! bl                       list breakpoints
//! c | n | s | o | pause    continue, step over/into/out, pause
//! until app.js:20          run to a line
//! bt | frame N             stack trace, select a frame
//! locals | p EXPR          variables of the active frame, evaluate
//! set NAME VALUE           assign a local of the active frame
//! watch EXPR | unwatch ID  watch expressions
//! q                        detach and quit
//! ```
//!
//! Lines typed by the user are 1-based.

use crate::render;
use anyhow::{anyhow, Result};
use cairn_core::{Breakpoint, InspectorNode};
use cairn_session::Session;
use std::io::Write;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),
    #[error("'{0}' needs {1}")]
    MissingArgument(&'static str, &'static str),
    #[error("expected path:line, got '{0}'")]
    BadLocation(String),
    #[error("expected a number, got '{0}'")]
    BadNumber(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Break {
        path: String,
        line: u32,
        condition: Option<String>,
    },
    Delete {
        path: String,
        line: u32,
    },
    Condition {
        path: String,
        line: u32,
        condition: Option<String>,
    },
    Breakpoints,
    Continue,
    Next,
    Step,
    Out,
    Pause,
    Until {
        path: String,
        line: u32,
    },
    Backtrace,
    Frame(usize),
    Locals,
    Print(String),
    Set {
        name: String,
        value: String,
    },
    Watch(String),
    Unwatch(u64),
    Help,
    Quit,
}

/// Whether the console keeps reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Parse `path:line` (1-based) into a path and a 0-based line.
fn location(text: &str) -> Result<(String, u32), ParseError> {
    let bad = || ParseError::BadLocation(text.to_string());
    let (path, line) = text.rsplit_once(':').ok_or_else(bad)?;
    let line: u32 = line.parse().map_err(|_| bad())?;
    if path.is_empty() || line == 0 {
        return Err(bad());
    }
    Ok((path.to_string(), line - 1))
}

fn number<T: FromStr>(text: &str) -> Result<T, ParseError> {
    text.parse().map_err(|_| ParseError::BadNumber(text.to_string()))
}

fn non_empty(rest: &str) -> Option<String> {
    let rest = rest.trim();
    (!rest.is_empty()).then(|| rest.to_string())
}

impl FromStr for ConsoleCommand {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let (first, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));

        let command = match word {
            "b" | "break" => {
                if first.is_empty() {
                    return Err(ParseError::MissingArgument("break", "path:line"));
                }
                let (path, line) = location(first)?;
                let condition = tail.trim().strip_prefix("if").and_then(non_empty);
                ConsoleCommand::Break {
                    path,
                    line,
                    condition,
                }
            }
            "d" | "delete" => {
                if first.is_empty() {
                    return Err(ParseError::MissingArgument("delete", "path:line"));
                }
                let (path, line) = location(first)?;
                ConsoleCommand::Delete { path, line }
            }
            "cond" | "condition" => {
                if first.is_empty() {
                    return Err(ParseError::MissingArgument("cond", "path:line"));
                }
                let (path, line) = location(first)?;
                ConsoleCommand::Condition {
                    path,
                    line,
                    condition: non_empty(tail),
                }
            }
            "bl" | "breakpoints" => ConsoleCommand::Breakpoints,
            "c" | "continue" => ConsoleCommand::Continue,
            "n" | "next" => ConsoleCommand::Next,
            "s" | "step" => ConsoleCommand::Step,
            "o" | "out" | "finish" => ConsoleCommand::Out,
            "pause" => ConsoleCommand::Pause,
            "until" => {
                if first.is_empty() {
                    return Err(ParseError::MissingArgument("until", "path:line"));
                }
                let (path, line) = location(first)?;
                ConsoleCommand::Until { path, line }
            }
            "bt" | "backtrace" => ConsoleCommand::Backtrace,
            "frame" | "f" => {
                if first.is_empty() {
                    return Err(ParseError::MissingArgument("frame", "a frame number"));
                }
                ConsoleCommand::Frame(number(first)?)
            }
            "locals" => ConsoleCommand::Locals,
            "p" | "print" => ConsoleCommand::Print(
                non_empty(rest).ok_or(ParseError::MissingArgument("print", "an expression"))?,
            ),
            "set" => match non_empty(tail) {
                Some(value) if !first.is_empty() => ConsoleCommand::Set {
                    name: first.to_string(),
                    value,
                },
                _ => return Err(ParseError::MissingArgument("set", "a name and a value")),
            },
            "watch" => ConsoleCommand::Watch(
                non_empty(rest).ok_or(ParseError::MissingArgument("watch", "an expression"))?,
            ),
            "unwatch" => {
                if first.is_empty() {
                    return Err(ParseError::MissingArgument("unwatch", "a watch id"));
                }
                ConsoleCommand::Unwatch(number(first)?)
            }
            "h" | "help" | "?" => ConsoleCommand::Help,
            "q" | "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

impl ConsoleCommand {
    /// Run the command against `session`, writing results to `out`.
    pub async fn execute<W: Write>(self, session: &Session, out: &mut W) -> Result<Flow> {
        match self {
            ConsoleCommand::Break {
                path,
                line,
                condition,
            } => {
                let mut bp = Breakpoint::new(path, line);
                bp.condition = condition;
                let bp = session.set_breakpoint(bp).await?;
                writeln!(out, "breakpoint at {}", render::breakpoint(&bp))?;
            }
            ConsoleCommand::Delete { path, line } => {
                let bp = session.clear_breakpoint(&path, line).await?;
                writeln!(out, "deleted {}", render::breakpoint(&bp))?;
            }
            ConsoleCommand::Condition {
                path,
                line,
                condition,
            } => {
                let bp = session.set_condition(&path, line, condition).await?;
                writeln!(out, "{}", render::breakpoint(&bp))?;
            }
            ConsoleCommand::Breakpoints => {
                let list = session.breakpoints().await;
                if list.is_empty() {
                    writeln!(out, "no breakpoints")?;
                }
                for (index, bp) in list.iter().enumerate() {
                    writeln!(out, "{:>3}  {}", index + 1, render::breakpoint(bp))?;
                }
            }
            ConsoleCommand::Continue => session.resume().await?,
            ConsoleCommand::Next => session.step_over().await?,
            ConsoleCommand::Step => session.step_into().await?,
            ConsoleCommand::Out => session.step_out().await?,
            ConsoleCommand::Pause => session.suspend().await?,
            ConsoleCommand::Until { path, line } => session.run_to(&path, line).await?,
            ConsoleCommand::Backtrace => {
                let active = session.active_frame().await.map(|f| f.id);
                let frames = session.frames().await;
                if frames.is_empty() {
                    writeln!(out, "not stopped")?;
                }
                for frame in &frames {
                    writeln!(out, "{}", render::frame(frame, Some(frame.id) == active))?;
                }
            }
            ConsoleCommand::Frame(index) => {
                let frame = session.select_frame(index).await?;
                writeln!(out, "{}", render::frame(&frame, true))?;
            }
            ConsoleCommand::Locals => {
                let frame = session
                    .active_frame()
                    .await
                    .ok_or_else(|| anyhow!("not stopped"))?;
                for scope in session.scopes(frame.id).await? {
                    writeln!(out, "{}:", scope.name)?;
                    let node = InspectorNode::Scope {
                        frame: frame.id,
                        index: scope.index,
                    };
                    for var in session.variables(node).await? {
                        writeln!(out, "  {}", render::variable(&var))?;
                    }
                }
            }
            ConsoleCommand::Print(expression) => {
                let value = session.evaluate(&expression).await?;
                writeln!(out, "{}", render::variable(&value))?;
            }
            ConsoleCommand::Set { name, value } => {
                let frame = session
                    .active_frame()
                    .await
                    .ok_or_else(|| anyhow!("not stopped"))?;
                let scope = session
                    .scopes(frame.id)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("frame has no scopes"))?;
                let parent = InspectorNode::Scope {
                    frame: frame.id,
                    index: scope.index,
                };
                let var = session.set_variable(parent, &name, &value).await?;
                writeln!(out, "{}", render::variable(&var))?;
            }
            ConsoleCommand::Watch(expression) => {
                let watch = session.add_watch(&expression).await?;
                writeln!(out, "{}", render::watch(&watch))?;
            }
            ConsoleCommand::Unwatch(id) => {
                if !session.remove_watch(id).await {
                    writeln!(out, "no watch {}", id)?;
                }
            }
            ConsoleCommand::Help => {
                writeln!(out, "{}", HELP)?;
            }
            ConsoleCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }
}

const HELP: &str = "\
b PATH:LINE [if EXPR]  set breakpoint      d PATH:LINE        delete breakpoint
cond PATH:LINE [EXPR]  set condition       bl                 list breakpoints
c n s o                continue/step       pause              interrupt
until PATH:LINE        run to line         bt / frame N       stack
locals / p EXPR        inspect             set NAME VALUE     assign a local
watch EXPR / unwatch N watches             q                  quit";

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<ConsoleCommand, ParseError> {
        line.parse()
    }

    #[test]
    fn test_break_with_condition() {
        assert_eq!(
            parse("b src/app.js:12 if n > 3").unwrap(),
            ConsoleCommand::Break {
                path: "src/app.js".to_string(),
                line: 11,
                condition: Some("n > 3".to_string()),
            }
        );
        assert_eq!(
            parse("break C:\\work\\app.js:1").unwrap(),
            ConsoleCommand::Break {
                path: "C:\\work\\app.js".to_string(),
                line: 0,
                condition: None,
            }
        );
    }

    #[test]
    fn test_bad_locations() {
        assert_eq!(
            parse("b app.js"),
            Err(ParseError::BadLocation("app.js".to_string()))
        );
        assert_eq!(
            parse("d app.js:0"),
            Err(ParseError::BadLocation("app.js:0".to_string()))
        );
        assert_eq!(parse("b"), Err(ParseError::MissingArgument("break", "path:line")));
    }

    #[test]
    fn test_condition_clears_without_expression() {
        assert_eq!(
            parse("cond a.js:3").unwrap(),
            ConsoleCommand::Condition {
                path: "a.js".to_string(),
                line: 2,
                condition: None,
            }
        );
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse("  n ").unwrap(), ConsoleCommand::Next);
        assert_eq!(parse("frame 2").unwrap(), ConsoleCommand::Frame(2));
        assert_eq!(
            parse("p a.b + 1").unwrap(),
            ConsoleCommand::Print("a.b + 1".to_string())
        );
        assert_eq!(
            parse("set count 7").unwrap(),
            ConsoleCommand::Set {
                name: "count".to_string(),
                value: "7".to_string(),
            }
        );
        assert_eq!(parse("frame x"), Err(ParseError::BadNumber("x".to_string())));
        assert_eq!(parse("jump"), Err(ParseError::Unknown("jump".to_string())));
    }
}
