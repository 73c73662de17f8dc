// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt::Debug;
use std::io;
use std::marker::PhantomData;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd::{pipe2, write as nix_write};
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe::Receiver;
use tracing::trace;

#[derive(Clone, Copy, Debug)]
pub struct Read;
#[derive(Clone, Copy, Debug)]
pub struct Write;

// A marker trait to designate the end of the pipe this represents
pub trait End: Clone + Copy + Debug {
    fn display() -> &'static str;
}

impl End for Read {
    fn display() -> &'static str {
        "Read"
    }
}
impl End for Write {
    fn display() -> &'static str {
        "Write"
    }
}

/// One end of a pipe, closed on drop
#[derive(Debug)]
pub struct PipeEnd<E: End> {
    fd: OwnedFd,
    ghost: PhantomData<E>,
}

impl<E: End> PipeEnd<E> {
    fn from_owned_fd(fd: OwnedFd) -> Self {
        Self {
            fd,
            ghost: PhantomData,
        }
    }
}

impl PipeEnd<Read> {
    /// Registers the read end with the current tokio runtime
    pub fn into_async_pipe_end(self) -> Result<AsyncPipeEnd, crate::Error> {
        AsyncPipeEnd::from_pipe_end(self)
    }
}

impl PipeEnd<Write> {
    /// Writes all of `buf`
    ///
    /// This is used between fork and exec, it must not allocate.
    pub fn write_all(&self, mut buf: &[u8]) -> nix::Result<()> {
        while !buf.is_empty() {
            match nix_write(&self.fd, buf) {
                Ok(0) => return Err(Errno::EPIPE),
                Ok(len) => buf = &buf[len..],
                Err(Errno::EINTR) => continue,
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }
}

impl<E: End> AsRawFd for PipeEnd<E> {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl<E: End> AsFd for PipeEnd<E> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

pub struct Pipe {
    read: PipeEnd<Read>,
    write: PipeEnd<Write>,
}

impl Pipe {
    /// Creates a new pipe, if possible,
    ///
    /// Both ends are close-on-exec. It's expected that this is created before forking, and then split after forking,
    ///   each process keeping only the end it uses.
    pub fn new() -> nix::Result<Self> {
        let (read, write) = pipe2(OFlag::O_CLOEXEC)?;
        trace!(
            read = read.as_raw_fd(),
            write = write.as_raw_fd(),
            "created pipe"
        );

        Ok(Self {
            read: PipeEnd::from_owned_fd(read),
            write: PipeEnd::from_owned_fd(write),
        })
    }

    pub fn split(self) -> (PipeEnd<Read>, PipeEnd<Write>) {
        (self.read, self.write)
    }
}

/// The read end of a pipe, registered with the current tokio runtime
pub struct AsyncPipeEnd {
    pipe: Receiver,
}

impl AsyncPipeEnd {
    pub fn from_pipe_end(pipe: PipeEnd<Read>) -> Result<Self, crate::Error> {
        trace!(fd = pipe.as_raw_fd(), end = Read::display(), "registering pipe end");

        Ok(Self {
            pipe: Receiver::from_owned_fd(pipe.fd)?,
        })
    }

    /// Reads until every write end of the pipe has been closed
    pub async fn read_to_end(mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.pipe.read_to_end(&mut buf).await?;

        Ok(buf)
    }
}
