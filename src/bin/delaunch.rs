// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::PathBuf;
use std::process;

use clap::error::ErrorKind as ClapErrorKind;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use tracing::warn;

use delaunch::error::EXIT_USAGE;
use delaunch::fork::Environment;
use delaunch::logging;
use delaunch::procs::Supervisor;
use delaunch::script::{self, Limits};
use delaunch::{Error, ErrorKind};

const FILE: &str = "file";
const DRY_RUN: &str = "dry-run";
const LOG_LEVEL: &str = "log-level";
const MAX_TASKS: &str = "max-tasks";
const MAX_ARGS: &str = "max-args";
const MAX_LINE_LENGTH: &str = "max-line-length";

trait SetupClapApp {
    fn setup_clap_app(self) -> Self;
    fn limit_opts(self) -> Self;
}

impl SetupClapApp for Command {
    fn setup_clap_app(self) -> Self {
        self.version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
    }

    fn limit_opts(self) -> Self {
        let defaults = Limits::default();

        self.arg(limit_arg(
            MAX_TASKS,
            "maximum number of tasks in the script",
            defaults.max_tasks,
        ))
        .arg(limit_arg(
            MAX_ARGS,
            "maximum number of arguments per task, the program included",
            defaults.max_args,
        ))
        .arg(limit_arg(
            MAX_LINE_LENGTH,
            "maximum length in bytes of a task's command",
            defaults.max_line_len,
        ))
    }
}

fn limit_arg(name: &'static str, help: &str, default: usize) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name("NUMBER")
        .value_parser(value_parser!(usize))
        .help(format!("{} [default: {}]", help, default))
}

fn app() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .setup_clap_app()
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new(FILE)
                .short('f')
                .long(FILE)
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("script listing the tasks to launch, one `<delay> <program> [args...]` per line"),
        )
        .arg(
            Arg::new(DRY_RUN)
                .long(DRY_RUN)
                .action(ArgAction::SetTrue)
                .help("print the parsed tasks instead of launching them"),
        )
        .limit_opts()
        .arg(
            Arg::new(LOG_LEVEL)
                .long(LOG_LEVEL)
                .value_name("LEVEL")
                .value_parser(logging::LEVELS)
                .help("log level, defaults to $DELAUNCH_LOG or info"),
        )
}

fn main() {
    let args = match app().try_get_matches() {
        Ok(args) => args,
        Err(err) => {
            // help and version go to stdout, everything else is a usage error on stderr
            let code = match err.kind() {
                ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => 0,
                _ => EXIT_USAGE,
            };

            err.print().ok();
            process::exit(code);
        }
    };

    let code = match run(&args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ERROR: {}", err);
            err.exit_code()
        }
    };

    process::exit(code);
}

fn run(args: &ArgMatches) -> Result<i32, Error> {
    logging::init_logging(args.get_one::<String>(LOG_LEVEL).map(String::as_str))?;

    let path = args
        .get_one::<PathBuf>(FILE)
        .ok_or_else(|| ErrorKind::Usage("Please specify file (see --help)".to_string()))?;

    let script = script::load(path, &limits(args))?;
    if let Some(trailing) = script.trailing {
        warn!(
            offset = trailing.offset,
            bytes = trailing.len,
            "ignoring trailing content after the end of the script"
        );
    }

    if args.get_flag(DRY_RUN) {
        for (index, task) in script.tasks.iter().enumerate() {
            println!("{:>3}  line {:<4} {}", index, task.line(), task);
        }

        return Ok(0);
    }

    let summary = Supervisor::new(Environment::inherit()).run(script.tasks)?;
    Ok(summary.exit_code())
}

fn limits(args: &ArgMatches) -> Limits {
    let defaults = Limits::default();
    let limit = |name: &str, default: usize| args.get_one::<usize>(name).copied().unwrap_or(default);

    Limits {
        max_tasks: limit(MAX_TASKS, defaults.max_tasks),
        max_args: limit(MAX_ARGS, defaults.max_args),
        max_line_len: limit(MAX_LINE_LENGTH, defaults.max_line_len),
    }
}
