// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::collections::HashMap;
use std::fmt;

use futures::stream::{FuturesUnordered, StreamExt};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{getpid, Pid};
use tokio::runtime;
use tokio::signal::unix::{self, signal, SignalKind};
use tracing::{debug, error, info, warn};

use crate::error::EXIT_LAUNCH;
use crate::fork::{self, Environment, Worker};
use crate::pipe::{PipeEnd, Read};
use crate::procs::decode_report;
use crate::script::TaskSpec;
use crate::Error;

/// How a worker ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchStatus {
    /// The program ran and exited with this status
    Exited(i32),
    /// The worker was killed, before or after it became the program
    Signaled(Signal),
    /// The program could not be executed
    LaunchFailed(Errno),
    /// The worker could not be waited on
    Unknown,
}

impl LaunchStatus {
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, LaunchStatus::LaunchFailed(_))
    }
}

impl fmt::Display for LaunchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchStatus::Exited(code) => write!(f, "exited with status {}", code),
            LaunchStatus::Signaled(signal) => write!(f, "killed by {}", signal),
            LaunchStatus::LaunchFailed(errno) => write!(f, "failed to launch: {}", errno),
            LaunchStatus::Unknown => write!(f, "ended with an unknown status"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchOutcome {
    /// Position of the task in the script
    pub index: usize,
    pub line: usize,
    pub pid: Pid,
    pub program: String,
    pub status: LaunchStatus,
}

/// Outcomes of every started worker, in script order
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<LaunchOutcome>,
}

impl RunSummary {
    pub fn launch_failures(&self) -> impl Iterator<Item = &LaunchOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status.is_launch_failure())
    }

    pub fn all_launched(&self) -> bool {
        self.launch_failures().next().is_none()
    }

    /// Task failures do not count, only tasks which never got started
    pub fn exit_code(&self) -> i32 {
        if self.all_launched() {
            0
        } else {
            EXIT_LAUNCH
        }
    }

    fn log(&self) {
        for outcome in &self.outcomes {
            match outcome.status {
                LaunchStatus::Exited(_) => info!(
                    task = outcome.index,
                    line = outcome.line,
                    pid = %outcome.pid,
                    program = %outcome.program,
                    "task {}",
                    outcome.status
                ),
                LaunchStatus::LaunchFailed(_) => error!(
                    task = outcome.index,
                    line = outcome.line,
                    pid = %outcome.pid,
                    program = %outcome.program,
                    "task {}",
                    outcome.status
                ),
                LaunchStatus::Signaled(_) | LaunchStatus::Unknown => warn!(
                    task = outcome.index,
                    line = outcome.line,
                    pid = %outcome.pid,
                    program = %outcome.program,
                    "task {}",
                    outcome.status
                ),
            }
        }

        info!(
            tasks = self.outcomes.len(),
            failed_to_launch = self.launch_failures().count(),
            "all tasks finished"
        );
    }
}

/// Launch and wait for every task of a script
///
/// Rules:
///   - one forked worker per task, all forked before any is waited on
///   - never retries, never stops launching because a task failed
///   - every started worker is reaped before returning, even on error
///   - launched programs inherit stdio and get the captured environment
pub struct Supervisor {
    env: Environment,
}

impl Supervisor {
    pub fn new(env: Environment) -> Self {
        Self { env }
    }

    pub fn run(&self, tasks: Vec<TaskSpec>) -> Result<RunSummary, Error> {
        info!(
            pid = %getpid(),
            tasks = tasks.len(),
            env_vars = self.env.len(),
            "supervisor started"
        );

        // a current thread runtime starts no threads, so forking below stays sound
        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        // registered before forking, so no worker exit is missed and a failure leaves no worker behind
        let sigchld = {
            let _guard = runtime.enter();
            signal(SignalKind::child())?
        };

        let mut workers = Vec::with_capacity(tasks.len());
        let mut spawn_error = None;
        for (index, spec) in tasks.iter().enumerate() {
            match fork::spawn_worker(index, spec, &self.env) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    error!(task = index, error = %err, "no further tasks will be started");
                    spawn_error = Some(err);
                    break;
                }
            }
        }
        drop(tasks);

        let summary = RunSummary {
            outcomes: runtime.block_on(reap(workers, sigchld))?,
        };
        summary.log();

        match spawn_error {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }
}

/// Waits until every worker has both reported on its launch and terminated
async fn reap(
    workers: Vec<Worker>,
    mut sigchld: unix::Signal,
) -> Result<Vec<LaunchOutcome>, Error> {
    let mut running = HashMap::with_capacity(workers.len());
    let mut reports = FuturesUnordered::new();
    let mut outcomes = Vec::with_capacity(workers.len());
    for (slot, worker) in workers.into_iter().enumerate() {
        let Worker {
            index,
            line,
            pid,
            program,
            report,
        } = worker;

        running.insert(pid, slot);
        reports.push(read_report(slot, pid, report));
        outcomes.push(LaunchOutcome {
            index,
            line,
            pid,
            program,
            status: LaunchStatus::Unknown,
        });
    }

    let mut failures = vec![None; outcomes.len()];
    loop {
        sweep(&mut running, &mut outcomes);
        if running.is_empty() && reports.is_empty() {
            break;
        }

        tokio::select! {
            Some((slot, failure)) = reports.next(), if !reports.is_empty() => {
                failures[slot] = failure;
            }
            received = sigchld.recv(), if !running.is_empty() => {
                if received.is_none() {
                    return Err(Error::from("SIGCHLD stream closed"));
                }
            }
        }
    }

    for (outcome, failure) in outcomes.iter_mut().zip(failures) {
        if let Some(errno) = failure {
            outcome.status = LaunchStatus::LaunchFailed(errno);
        }
    }

    Ok(outcomes)
}

/// Reaps every worker which has terminated, without blocking
fn sweep(running: &mut HashMap<Pid, usize>, outcomes: &mut [LaunchOutcome]) {
    running.retain(|&pid, &mut slot| {
        let status = loop {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Err(Errno::EINTR) => continue,
                status => break status,
            }
        };

        let status = match status {
            Ok(WaitStatus::Exited(_, code)) => LaunchStatus::Exited(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => LaunchStatus::Signaled(signal),
            Ok(_) => return true,
            Err(err) => {
                error!(pid = %pid, error = %err, "failed to wait for worker");
                LaunchStatus::Unknown
            }
        };

        debug!(task = outcomes[slot].index, pid = %pid, "reaped worker: {}", status);
        outcomes[slot].status = status;
        false
    });
}

async fn read_report(slot: usize, pid: Pid, report: PipeEnd<Read>) -> (usize, Option<Errno>) {
    let read = match report.into_async_pipe_end() {
        Ok(pipe) => pipe.read_to_end().await.map_err(Error::from),
        Err(err) => Err(err),
    };

    match read {
        Ok(bytes) => (slot, decode_report(&bytes)),
        Err(err) => {
            warn!(pid = %pid, error = %err, "could not read launch report");
            (slot, None)
        }
    }
}
