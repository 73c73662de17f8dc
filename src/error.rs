use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Exit status for a malformed invocation
pub const EXIT_USAGE: i32 = 1;
/// Exit status when the script file cannot be opened or read
pub const EXIT_FILE: i32 = 2;
/// Exit status when the script is malformed, nothing was launched
pub const EXIT_PARSE: i32 = 3;
/// Exit status when at least one task could not be started
pub const EXIT_LAUNCH: i32 = 4;
/// Exit status for failures of the supervisor itself
pub const EXIT_SUPERVISOR: i32 = 5;

/// Malformed script content, all line numbers are 1-based
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("line {line}: invalid delay {token:?}, expected a non-negative integer")]
    InvalidDelay { line: usize, token: String },
    #[error("line {line}: command is {len} bytes long, at most {max} are allowed")]
    LineTooLong { line: usize, len: usize, max: usize },
    #[error("line {line}: command has {count} arguments, at most {max} are allowed")]
    TooManyArgs {
        line: usize,
        count: usize,
        max: usize,
    },
    #[error("line {line}: no program given after the delay")]
    EmptyCommand { line: usize },
    #[error("script has more than {max} tasks")]
    TooManyTasks { max: usize },
    #[error("failed to read script")]
    Read(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("{0}")]
    Usage(String),
    #[error("cannot open script {}: {source}", .path.display())]
    FileOpen { path: PathBuf, source: io::Error },
    #[error("invalid script: {0}")]
    Parse(#[from] ParseError),
    #[error("failed to start worker for task {index}: {source}")]
    Spawn { index: usize, source: nix::Error },
    #[error("io error")]
    IoError(#[from] io::Error),
    #[error("nix error")]
    NixError(#[from] nix::Error),
    #[error("an error occured: {0}")]
    ErrorMsg(String),
    #[error("an error occured: {0}")]
    ErrorStr(&'static str),
}

#[derive(Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// The process exit status this error should terminate the run with
    pub fn exit_code(&self) -> i32 {
        match self.0 {
            ErrorKind::Usage(_) => EXIT_USAGE,
            ErrorKind::FileOpen { .. } => EXIT_FILE,
            ErrorKind::Parse(ParseError::Read(_)) => EXIT_FILE,
            ErrorKind::Parse(_) => EXIT_PARSE,
            _ => EXIT_SUPERVISOR,
        }
    }
}

impl<E> From<E> for Error
where
    E: Into<ErrorKind>,
{
    fn from(err: E) -> Self {
        Self::from_kind(err.into())
    }
}

impl From<&'static str> for Error {
    fn from(err: &'static str) -> Self {
        Self::from_kind(ErrorKind::ErrorStr(err))
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::from_kind(ErrorKind::ErrorMsg(err))
    }
}
