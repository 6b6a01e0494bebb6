//! Scripted in-memory stream for exercising connection pumps.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

#[derive(Debug)]
enum Step {
    Data(Vec<u8>),
    WouldBlock,
    Eof,
    Fail(io::ErrorKind),
}

/// Each `read` consumes at most one scripted step; an empty script reads as
/// `WouldBlock`. Writes are capped by an optional per-call budget.
#[derive(Debug, Default)]
pub struct MockStream {
    steps: VecDeque<Step>,
    written: Vec<u8>,
    write_budget: Option<usize>,
}

impl MockStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.steps.push_back(Step::Data(bytes.to_vec()));
    }

    pub fn feed_would_block(&mut self) {
        self.steps.push_back(Step::WouldBlock);
    }

    pub fn feed_eof(&mut self) {
        self.steps.push_back(Step::Eof);
    }

    pub fn fail_next_read(&mut self, kind: io::ErrorKind) {
        self.steps.push_back(Step::Fail(kind));
    }

    /// `None` accepts every write in full, `Some(0)` blocks every write.
    pub fn set_write_budget(&mut self, budget: Option<usize>) {
        self.write_budget = budget;
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.steps.pop_front() {
            None | Some(Step::WouldBlock) => Err(io::ErrorKind::WouldBlock.into()),
            Some(Step::Eof) => Ok(0),
            Some(Step::Fail(kind)) => Err(kind.into()),
            Some(Step::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    self.steps.push_front(Step::Data(rest));
                }
                Ok(n)
            }
        }
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match self.write_budget {
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(budget) => budget.min(buf.len()),
            None => buf.len(),
        };
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
