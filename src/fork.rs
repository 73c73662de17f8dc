// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::time::Duration;

use nix::unistd::{fork, ForkResult, Pid};
use tracing::debug;

use crate::error::ErrorKind;
use crate::pipe::{Pipe, PipeEnd, Read};
use crate::procs;
use crate::script::TaskSpec;
use crate::Error;

/// Snapshot of the environment handed to every launched program
#[derive(Clone, Debug, Default)]
pub struct Environment {
    vars: Vec<CString>,
}

impl Environment {
    /// Captures the environment of this process
    pub fn inherit() -> Self {
        Self::from_vars(std::env::vars_os())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let vars = vars
            .into_iter()
            .filter_map(|(key, value)| {
                let mut entry = key.as_ref().as_bytes().to_vec();
                entry.push(b'=');
                entry.extend_from_slice(value.as_ref().as_bytes());
                CString::new(entry).ok()
            })
            .collect();

        Self { vars }
    }

    /// Number of variables handed to each program
    pub(crate) fn len(&self) -> usize {
        self.vars.len()
    }

    /// `KEY=VALUE` entries as passed to `execve`
    pub fn entries(&self) -> &[CString] {
        &self.vars
    }
}

/// A task converted to what `execve` takes, built before forking so the worker has nothing left to allocate
#[derive(Debug)]
pub struct PreparedTask {
    pub path: CString,
    pub argv: Vec<CString>,
    pub delay: Duration,
    pub program: String,
}

impl PreparedTask {
    pub fn new(spec: &TaskSpec) -> Result<Self, Error> {
        let argv = spec
            .argv()
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| format!("task on line {} contains a NUL byte", spec.line()))?;

        Ok(Self {
            path: argv[0].clone(),
            argv,
            delay: spec.delay(),
            program: spec.program().to_string_lossy().into_owned(),
        })
    }
}

/// A forked worker, as seen from the supervisor
#[derive(Debug)]
pub struct Worker {
    pub index: usize,
    pub line: usize,
    pub pid: Pid,
    pub program: String,
    /// Receives the errno of a failed exec, EOF alone means the program was started
    pub report: PipeEnd<Read>,
}

/// Forks a worker which waits out the task's delay and then becomes the task's program
///
/// The calling process must be single threaded, the child only sleeps, logs and execs.
pub fn spawn_worker(index: usize, spec: &TaskSpec, env: &Environment) -> Result<Worker, Error> {
    let task = PreparedTask::new(spec)?;
    let (read, write) = Pipe::new()
        .map_err(|source| ErrorKind::Spawn { index, source })?
        .split();

    // This is safe as long as no other threads are running, the child never returns from here
    match unsafe { fork() }.map_err(|source| ErrorKind::Spawn { index, source })? {
        ForkResult::Child => {
            drop(read);
            procs::launch(&task, env, write)
        }
        ForkResult::Parent { child } => {
            drop(write);
            debug!(task = index, pid = %child, program = %task.program, "forked worker");

            Ok(Worker {
                index,
                line: spec.line(),
                pid: child,
                program: task.program,
                report: read,
            })
        }
    }
}
