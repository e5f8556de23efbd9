//! MI output records
//!
//! Each line the backend prints is one record, classified by its prefix
//! after an optional numeric token:
//!
//! | prefix | record |
//! |---|---|
//! | `^` | result of a command (`done`, `running`, `connected`, `error`, `exit`) |
//! | `*` | async exec status (`stopped`, `running`) |
//! | `+` | async progress status |
//! | `=` | async notification (`breakpoint-modified`, `thread-created`, ...) |
//! | `~` `@` `&` | console, target and log stream output |
//! | `(gdb)` | prompt |
//!
//! Anything else is program output sharing the terminal.

use super::value::{parse_cstring, MiResults};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

impl ResultClass {
    fn parse(class: &str) -> Option<Self> {
        Some(match class {
            "done" => ResultClass::Done,
            "running" => ResultClass::Running,
            "connected" => ResultClass::Connected,
            "error" => ResultClass::Error,
            "exit" => ResultClass::Exit,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncKind {
    /// `*`
    Exec,
    /// `+`
    Status,
    /// `=`
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// `~` text for the console
    Console,
    /// `@` output of the running target
    Target,
    /// `&` debugger internal log
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub token: Option<i64>,
    pub class: ResultClass,
    pub results: MiResults,
}

impl ResultRecord {
    /// The `msg` of an `^error` record.
    pub fn error_message(&self) -> String {
        self.results
            .get_str("msg")
            .unwrap_or("unknown error")
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncRecord {
    pub token: Option<i64>,
    pub kind: AsyncKind,
    pub class: String,
    pub results: MiResults,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiRecord {
    Result(ResultRecord),
    Async(AsyncRecord),
    Stream { kind: StreamKind, text: String },
    Prompt,
    /// A line without an MI prefix
    Unrecognized(String),
}

impl MiRecord {
    pub fn parse(line: &str) -> Result<MiRecord> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim_end() == "(gdb)" {
            return Ok(MiRecord::Prompt);
        }

        let digits = line.bytes().take_while(u8::is_ascii_digit).count();
        let token = if digits > 0 {
            line[..digits].parse::<i64>().ok()
        } else {
            None
        };
        let rest = &line[digits..];

        let Some(prefix) = rest.chars().next() else {
            return Ok(MiRecord::Unrecognized(line.to_string()));
        };
        let body = &rest[prefix.len_utf8()..];

        match prefix {
            '^' => {
                let (class, results) = split_class(body)?;
                let class = ResultClass::parse(class).ok_or_else(|| {
                    Error::Protocol(format!("unknown result class '{}'", class))
                })?;
                Ok(MiRecord::Result(ResultRecord {
                    token,
                    class,
                    results,
                }))
            }
            '*' | '+' | '=' => {
                let kind = match prefix {
                    '*' => AsyncKind::Exec,
                    '+' => AsyncKind::Status,
                    _ => AsyncKind::Notify,
                };
                let (class, results) = split_class(body)?;
                Ok(MiRecord::Async(AsyncRecord {
                    token,
                    kind,
                    class: class.to_string(),
                    results,
                }))
            }
            '~' | '@' | '&' if token.is_none() => {
                let kind = match prefix {
                    '~' => StreamKind::Console,
                    '@' => StreamKind::Target,
                    _ => StreamKind::Log,
                };
                // Program output may start with a stream prefix too
                Ok(match parse_cstring(body) {
                    Ok(text) => MiRecord::Stream { kind, text },
                    Err(_) => MiRecord::Unrecognized(line.to_string()),
                })
            }
            _ => Ok(MiRecord::Unrecognized(line.to_string())),
        }
    }
}

fn split_class(body: &str) -> Result<(&str, MiResults)> {
    match body.split_once(',') {
        Some((class, rest)) => Ok((class, MiResults::parse(rest)?)),
        None => Ok((body, MiResults::new())),
    }
}
