//! Fixed-capacity byte cursor used for packet frames.
//!
//! A `Buffer` has a capacity fixed at creation, a cursor (`position`) and a
//! `limit`. In write mode the cursor advances toward the limit as bytes are
//! put or read off the wire; `flip()` switches to read mode, after which
//! `position..limit` is exactly the data still to consume or transmit.
//!
//! Invariant: `0 <= position <= limit <= capacity` after every operation.

#![allow(dead_code)] // Full cursor API; the codec uses only part of it

use bytes::BytesMut;

/// Error returned by cursor operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// `put`/`get` attempted with `position == limit`.
    Exhausted,
    /// Direct-offset access at or past capacity.
    IndexOutOfBounds { index: usize, capacity: usize },
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::Exhausted => write!(f, "buffer position is at its limit"),
            BufferError::IndexOutOfBounds { index, capacity } => {
                write!(f, "index {} out of bounds for capacity {}", index, capacity)
            }
        }
    }
}

impl std::error::Error for BufferError {}

/// Bounded byte region with a read/write cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    storage: BytesMut,
    position: usize,
    limit: usize,
}

impl Buffer {
    /// Create a zeroed buffer in write mode (`position = 0`, `limit = capacity`).
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: BytesMut::zeroed(capacity),
            position: 0,
            limit: capacity,
        }
    }

    /// Build a frame from complete raw bytes: written, then flipped, so the
    /// whole of `bytes` is ready to consume.
    pub fn filled(bytes: &[u8]) -> Self {
        let mut buf = Self::new(bytes.len());
        buf.storage.copy_from_slice(bytes);
        buf.position = bytes.len();
        buf.flip();
        buf
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes between the cursor and the limit.
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    /// Write one byte at the cursor and advance it.
    pub fn put(&mut self, byte: u8) -> Result<(), BufferError> {
        if self.position == self.limit {
            return Err(BufferError::Exhausted);
        }
        self.storage[self.position] = byte;
        self.position += 1;
        Ok(())
    }

    /// Write a run of bytes at the cursor. Nothing is written unless all fit.
    pub fn put_slice(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        if bytes.len() > self.remaining() {
            return Err(BufferError::Exhausted);
        }
        self.storage[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        Ok(())
    }

    /// Read one byte at the cursor and advance it.
    pub fn get(&mut self) -> Result<u8, BufferError> {
        if self.position == self.limit {
            return Err(BufferError::Exhausted);
        }
        let byte = self.storage[self.position];
        self.position += 1;
        Ok(byte)
    }

    /// Read the byte at an absolute offset, ignoring cursor and limit.
    pub fn get_at(&self, index: usize) -> Result<u8, BufferError> {
        self.storage
            .get(index)
            .copied()
            .ok_or(BufferError::IndexOutOfBounds {
                index,
                capacity: self.capacity(),
            })
    }

    /// Overwrite the byte at an absolute offset. Out of bounds leaves the
    /// buffer untouched.
    pub fn set_at(&mut self, index: usize, byte: u8) -> Result<(), BufferError> {
        let capacity = self.capacity();
        match self.storage.get_mut(index) {
            Some(slot) => {
                *slot = byte;
                Ok(())
            }
            None => Err(BufferError::IndexOutOfBounds { index, capacity }),
        }
    }

    /// Absolute-offset view of `len` bytes starting at `offset`.
    pub fn slice_at(&self, offset: usize, len: usize) -> Result<&[u8], BufferError> {
        let end = offset.saturating_add(len);
        if end > self.capacity() {
            return Err(BufferError::IndexOutOfBounds {
                index: end.saturating_sub(1),
                capacity: self.capacity(),
            });
        }
        Ok(&self.storage[offset..end])
    }

    /// Switch from write mode to read mode without copying.
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
    }

    /// Return to a zeroed write-mode buffer of the same capacity.
    pub fn reset(&mut self) {
        self.position = 0;
        self.limit = self.capacity();
        self.storage.fill(0);
    }

    /// Deep copy with identical capacity, cursor, limit and contents.
    pub fn copy(&self) -> Buffer {
        self.clone()
    }

    /// The bytes still to be consumed, `position..limit`.
    pub fn chunk(&self) -> &[u8] {
        &self.storage[self.position..self.limit]
    }

    /// Writable window `position..limit`, for filling straight from a socket.
    pub fn chunk_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.position..self.limit]
    }

    /// Move the cursor forward after an external read or write.
    ///
    /// Clamped to the limit.
    pub fn advance(&mut self, count: usize) {
        self.position = (self.position + count).min(self.limit);
    }

    /// Entire backing storage regardless of cursor.
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage
    }
}
