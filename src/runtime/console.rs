//! Local console input polled alongside the sockets.
//!
//! Stdin is registered with the same `mio::Poll` as the network, so one
//! readiness pass covers both. Each readiness event performs a single
//! `read(2)` and then re-arms the registration, since stdin is left in
//! blocking mode and cannot be drained until `WouldBlock`.

use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use std::io;

const READ_CHUNK: usize = 1024;

/// Splits raw console bytes into lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes, returning every line completed by them.
    ///
    /// Line endings are stripped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                if self.partial.last() == Some(&b'\r') {
                    self.partial.pop();
                }
                lines.push(String::from_utf8_lossy(&self.partial).into_owned());
                self.partial.clear();
            } else {
                self.partial.push(byte);
            }
        }
        lines
    }

    /// Whatever was typed after the last newline.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        Some(line)
    }
}

/// Lines read from the console in one readiness event.
#[derive(Debug, Default)]
pub struct ConsoleInput {
    pub lines: Vec<String>,
    /// Stdin reached end of file; the console has been deregistered.
    pub closed: bool,
}

/// Stdin registered with a poller.
pub struct Console {
    token: Token,
    lines: LineBuffer,
    open: bool,
}

impl Console {
    /// Register stdin for read readiness under `token`.
    ///
    /// Fails when stdin cannot be polled, e.g. when redirected from a regular
    /// file.
    pub fn register(registry: &Registry, token: Token) -> io::Result<Self> {
        registry.register(&mut SourceFd(&libc::STDIN_FILENO), token, Interest::READABLE)?;
        Ok(Self {
            token,
            lines: LineBuffer::new(),
            open: true,
        })
    }

    /// Read whatever stdin has ready and return the completed lines.
    pub fn read_lines(&mut self, registry: &Registry) -> io::Result<ConsoleInput> {
        if !self.open {
            return Ok(ConsoleInput::default());
        }

        let mut chunk = [0u8; READ_CHUNK];
        // SAFETY: `chunk` is a valid writable region of `READ_CHUNK` bytes.
        let n = unsafe {
            libc::read(
                libc::STDIN_FILENO,
                chunk.as_mut_ptr().cast::<libc::c_void>(),
                chunk.len(),
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if matches!(
                err.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ) {
                self.rearm(registry)?;
                return Ok(ConsoleInput::default());
            }
            return Err(err);
        }

        if n == 0 {
            let mut input = ConsoleInput {
                lines: Vec::new(),
                closed: true,
            };
            input.lines.extend(self.lines.take_partial());
            self.deregister(registry);
            return Ok(input);
        }

        let lines = self.lines.push(&chunk[..n as usize]);
        self.rearm(registry)?;
        Ok(ConsoleInput {
            lines,
            closed: false,
        })
    }

    pub fn deregister(&mut self, registry: &Registry) {
        if self.open {
            self.open = false;
            let _ = registry.deregister(&mut SourceFd(&libc::STDIN_FILENO));
        }
    }

    fn rearm(&self, registry: &Registry) -> io::Result<()> {
        registry.reregister(
            &mut SourceFd(&libc::STDIN_FILENO),
            self.token,
            Interest::READABLE,
        )
    }
}
