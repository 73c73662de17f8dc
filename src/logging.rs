// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The level is taken from the `--log-level` flag if given, then the `DELAUNCH_LOG`
//! environment variable, and defaults to `info`.
//!
//! Logs go to stderr, stdout belongs to the launched programs.

use std::io::IsTerminal;

use tracing::Level;
use tracing_subscriber::fmt;

use crate::Error;

pub const LOG_ENV: &str = "DELAUNCH_LOG";

/// Names accepted for a log level, most to least severe
pub const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Initialise the global logging subscriber, once, before any worker is forked.
pub fn init_logging(cli_level: Option<&str>) -> Result<(), Error> {
    let level = cli_level
        .and_then(parse_level_str)
        .or_else(|| {
            std::env::var(LOG_ENV)
                .ok()
                .and_then(|s| parse_level_str(&s))
        })
        .unwrap_or(Level::INFO);

    fmt()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| Error::from(format!("failed to initialize logging: {}", e)))
}

pub fn parse_level_str(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
