// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Common library functions for delaunch
//!
//! A script is parsed into tasks up front, then the `Supervisor` forks one worker per task.
//!   Each worker sleeps for its task's delay and replaces itself with the task's program,
//!   the supervisor waits for all of them and reports how each one ended.

pub mod error;
pub mod fork;
pub mod logging;
pub mod pipe;
pub mod procs;
pub mod script;

pub use error::{Error, ErrorKind, ParseError};
