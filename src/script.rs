// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Task scripts
//!
//! A script lists one task per line, a delay in seconds followed by the program and its arguments:
//!
//! ```text
//! 0 /bin/echo hello
//! 3 /usr/bin/sleep 1
//! ```
//!
//! Blank lines and any whitespace between tasks are ignored. A NUL or SUB (`^Z`) byte ends the script,
//!   anything after it is reported as trailing content and not parsed.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::os::unix::ffi::OsStringExt;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::{ErrorKind, ParseError};
use crate::Error;

/// Bytes which end the script
const TERMINATORS: [u8; 2] = [0x00, 0x1a];

/// Upper bounds on what a single script may ask for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    /// Number of tasks in the script
    pub max_tasks: usize,
    /// Number of arguments per task, including the program
    pub max_args: usize,
    /// Length of the command text following the delay, in bytes
    pub max_line_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_tasks: 256,
            max_args: 64,
            max_line_len: 256,
        }
    }
}

/// One program to launch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskSpec {
    line: usize,
    delay: u64,
    argv: Vec<OsString>,
}

impl TaskSpec {
    /// Line of the script this task was read from, 1-based
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay)
    }

    pub fn delay_secs(&self) -> u64 {
        self.delay
    }

    /// The program path followed by its arguments, never empty
    pub fn argv(&self) -> &[OsString] {
        &self.argv
    }

    pub fn program(&self) -> &OsStr {
        &self.argv[0]
    }
}

impl fmt::Display for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}s", self.delay)?;
        for arg in &self.argv {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Content found after the end of the script
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trailing {
    /// Byte offset of the first non-whitespace byte after the terminator
    pub offset: usize,
    pub len: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Script {
    pub tasks: Vec<TaskSpec>,
    pub trailing: Option<Trailing>,
}

/// Reads and parses the script at `path`
pub fn load(path: &Path, limits: &Limits) -> Result<Script, Error> {
    let file_open = |source: std::io::Error| ErrorKind::FileOpen {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(file_open)?;
    let mut input = Vec::new();
    file.read_to_end(&mut input).map_err(file_open)?;

    debug!(path = %path.display(), bytes = input.len(), "read script");
    Ok(parse(&input, limits)?)
}

pub fn parse_reader<R: Read>(mut reader: R, limits: &Limits) -> Result<Script, ParseError> {
    let mut input = Vec::new();
    reader.read_to_end(&mut input)?;

    parse(&input, limits)
}

/// Parses a whole script, failing on the first malformed task
pub fn parse(input: &[u8], limits: &Limits) -> Result<Script, ParseError> {
    let end = input
        .iter()
        .position(|b| TERMINATORS.contains(b))
        .unwrap_or(input.len());
    let (body, rest) = input.split_at(end);

    let mut cursor = Cursor::new(body);
    let mut tasks = Vec::new();
    while cursor.skip_whitespace() {
        if tasks.len() == limits.max_tasks {
            return Err(ParseError::TooManyTasks {
                max: limits.max_tasks,
            });
        }

        tasks.push(cursor.next_task(limits)?);
    }

    Ok(Script {
        tasks,
        trailing: trailing(rest, end),
    })
}

fn trailing(rest: &[u8], offset: usize) -> Option<Trailing> {
    let start = rest
        .iter()
        .position(|&b| !is_space(b) && !TERMINATORS.contains(&b))?;

    Some(Trailing {
        offset: offset + start,
        len: rest.len() - start,
    })
}

/// The C locale's notion of whitespace, including vertical tab
fn is_space(b: u8) -> bool {
    b.is_ascii_whitespace() || b == 0x0b
}

fn parse_delay(token: &[u8]) -> Option<u64> {
    if token.is_empty() || !token.iter().all(u8::is_ascii_digit) {
        return None;
    }

    std::str::from_utf8(token).ok()?.parse().ok()
}

struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
        }
    }

    /// Returns false once only whitespace remained
    fn skip_whitespace(&mut self) -> bool {
        while let Some(&b) = self.input.get(self.pos) {
            if !is_space(b) {
                return true;
            }

            if b == b'\n' {
                self.line += 1;
            }
            self.pos += 1;
        }

        false
    }

    fn next_task(&mut self, limits: &Limits) -> Result<TaskSpec, ParseError> {
        let line = self.line;

        let token = self.take_token();
        let delay = parse_delay(token).ok_or_else(|| ParseError::InvalidDelay {
            line,
            token: String::from_utf8_lossy(token).into_owned(),
        })?;

        let command = self.take_line();
        if command.len() > limits.max_line_len {
            return Err(ParseError::LineTooLong {
                line,
                len: command.len(),
                max: limits.max_line_len,
            });
        }

        let argv = command
            .split(|&b| b == b' ')
            .filter(|arg| !arg.is_empty())
            .map(|arg| OsString::from_vec(arg.to_vec()))
            .collect::<Vec<_>>();

        if argv.is_empty() {
            return Err(ParseError::EmptyCommand { line });
        }
        if argv.len() > limits.max_args {
            return Err(ParseError::TooManyArgs {
                line,
                count: argv.len(),
                max: limits.max_args,
            });
        }

        Ok(TaskSpec { line, delay, argv })
    }

    fn take_token(&mut self) -> &'a [u8] {
        let start = self.pos;
        let len = self.input[start..]
            .iter()
            .position(|&b| is_space(b))
            .unwrap_or(self.input.len() - start);

        self.pos += len;
        &self.input[start..self.pos]
    }

    /// Consumes the rest of the physical line and its terminator
    fn take_line(&mut self) -> &'a [u8] {
        let start = self.pos;
        let mut line = match self.input[start..].iter().position(|&b| b == b'\n') {
            Some(len) => {
                self.pos = start + len + 1;
                self.line += 1;
                &self.input[start..start + len]
            }
            None => {
                self.pos = self.input.len();
                &self.input[start..]
            }
        };

        if let Some((b'\r', rest)) = line.split_last() {
            line = rest;
        }

        line
    }
}
