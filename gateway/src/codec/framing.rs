//! Per-connection byte accumulator (C1, §4.1).
//!
//! Bytes arrive in arbitrary chunks from the socket and are appended here;
//! frame decoders only ever read through the bounds-checked accessors below
//! and advance the cursor with [`FramingBuffer::drop`] once a complete frame
//! is proven available. No decoder ever consumes speculatively.

use bytes::BytesMut;

use crate::error::FrameError;

/// Default cap (§4.1): well above the largest legal AVL frame (~200 KiB).
pub const DEFAULT_CAPACITY: usize = 1024 * 1024;

pub struct FramingBuffer {
    buf: BytesMut,
    cap: usize,
}

impl FramingBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Appends `chunk` to the buffer. Fails if the result would exceed the cap.
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), FrameError> {
        if self.buf.len() + chunk.len() > self.cap {
            return Err(FrameError::BufferOverflow);
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    /// Bounds-checked view of `n` bytes starting at `offset`, or `None` if
    /// not enough bytes are buffered.
    pub fn peek(&self, offset: usize, n: usize) -> Option<&[u8]> {
        self.buf.get(offset..offset + n)
    }

    pub fn read_u8(&self, offset: usize) -> Option<u8> {
        self.buf.get(offset).copied()
    }

    pub fn read_u16_be(&self, offset: usize) -> Option<u16> {
        self.peek(offset, 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32_be(&self, offset: usize) -> Option<u32> {
        self.peek(offset, 4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    #[allow(dead_code)]
    pub fn read_u64_be(&self, offset: usize) -> Option<u64> {
        self.peek(offset, 8).map(|b| {
            let mut a = [0u8; 8];
            a.copy_from_slice(b);
            u64::from_be_bytes(a)
        })
    }

    /// Advances the read cursor past `n` bytes, compacting the buffer.
    pub fn drop(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        let _ = self.buf.split_to(n);
    }
}

impl Default for FramingBuffer {
    fn default() -> Self {
        Self::new()
    }
}
