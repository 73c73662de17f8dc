// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::thread;

use nix::errno::Errno;
use nix::unistd::{execve, getpid};
use tracing::info;

use crate::fork::{Environment, PreparedTask};
use crate::pipe::{PipeEnd, Write};

/// Exit status of a worker whose program could not be executed
pub const LAUNCH_FAILURE_STATUS: i32 = 127;

/// Launch one program
///
/// Rules:
/// - runs in a freshly forked worker and never returns
/// - sleeps for the task's delay, then replaces the worker with the program
/// - on failure sends the errno over `report` and exits with `LAUNCH_FAILURE_STATUS`
pub(crate) fn launch(task: &PreparedTask, env: &Environment, report: PipeEnd<Write>) -> ! {
    thread::sleep(task.delay);

    info!(
        pid = %getpid(),
        program = %task.program,
        delay_secs = task.delay.as_secs(),
        "starting task"
    );

    let errno = match execve(&task.path, task.argv.as_slice(), env.entries()) {
        Ok(never) => match never {},
        Err(errno) => errno,
    };

    // if the supervisor is already gone there is nobody left to tell
    report.write_all(&encode_report(errno)).ok();

    // _exit, not exit: the worker shares the supervisor's stdio buffers and must not flush them
    unsafe { libc::_exit(LAUNCH_FAILURE_STATUS) }
}

fn encode_report(errno: Errno) -> [u8; 4] {
    (errno as i32).to_ne_bytes()
}

/// Decodes what a worker sent before its pipe closed, `None` if the program was started
pub(crate) fn decode_report(report: &[u8]) -> Option<Errno> {
    let raw: [u8; 4] = report.get(..4)?.try_into().ok()?;
    Some(Errno::from_raw(i32::from_ne_bytes(raw)))
}
