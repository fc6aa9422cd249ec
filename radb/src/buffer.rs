//! Reusable byte staging for protocol exchanges.
//!
//! Each protocol handler owns one [`WorkBuffer`] and reuses it across many
//! exchanges via [`WorkBuffer::clear`], avoiding a per-message allocation.
//! Never shared across tasks.

/// Growable byte buffer with append primitives and two-phase channel reads.
#[derive(Debug, Default)]
pub struct WorkBuffer {
    /// Backing storage; `buf.len()` is always the valid region.
    buf: Vec<u8>,
}

impl WorkBuffer {
    /// An empty buffer with `capacity` bytes pre-allocated.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Discards content, keeping the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// `true` when no valid bytes are staged.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The valid region.
    pub fn filled(&self) -> &[u8] {
        &self.buf
    }

    /// Appends raw bytes.
    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Appends a string's UTF-8 bytes.
    pub fn put_str(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Appends one byte.
    pub fn put_u8(&mut self, b: u8) {
        self.buf.push(b);
    }

    /// Appends a `u32` in little-endian order.
    pub fn put_u32_le(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Phase one of a channel read: discard content and expose a writable
    /// slot of exactly `n` bytes for the channel to fill.
    pub fn read_slot(&mut self, n: usize) -> &mut [u8] {
        self.buf.clear();
        self.buf.resize(n, 0);
        &mut self.buf
    }

    /// Phase two: keep exactly the `filled` bytes the channel produced.
    /// After this, [`WorkBuffer::filled`] is `[0, filled)`.
    pub fn commit_read(&mut self, filled: usize) {
        debug_assert!(filled <= self.buf.len());
        self.buf.truncate(filled);
    }

    /// Starts a frame whose header is written last: reserves `header_len`
    /// zero bytes; the payload is appended after with the `put_*` methods.
    pub fn start_frame(&mut self, header_len: usize) {
        self.buf.clear();
        self.buf.resize(header_len, 0);
    }

    /// Length of the payload appended since [`WorkBuffer::start_frame`].
    pub fn payload_len(&self, header_len: usize) -> usize {
        self.buf.len().saturating_sub(header_len)
    }

    /// Back-patches the reserved header region with `header`.
    pub fn patch_header(&mut self, header: &[u8]) {
        self.buf[..header.len()].copy_from_slice(header);
    }
}
