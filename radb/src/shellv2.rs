//! Shell-v2 packet reader and writer.
//!
//! The read half returns `(kind, payload)` pairs and maps unknown kind bytes
//! to [`PacketKind::Invalid`] so the caller decides whether to skip or fail.
//! The write half uses a prepared buffer: the payload is appended behind a
//! reserved 5-byte slot and the header is back-patched on flush, so each
//! packet goes out in one write with no extra copy.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use radb_proto::shell::{self, HEADER_LEN, PacketKind};

use crate::buffer::WorkBuffer;
use crate::channel::{read_exactly, shutdown_output, write_exactly};
use crate::{Result, TimeoutTracker};

/// Reads shell-v2 packets from a byte stream.
#[derive(Debug)]
pub struct PacketReader<S> {
    stream: S,
    buffer: WorkBuffer,
}

impl<S> PacketReader<S>
where
    S: AsyncRead + Unpin,
{
    /// Wraps the read side of a shell-v2 channel.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: WorkBuffer::with_capacity(HEADER_LEN + 8192),
        }
    }

    /// Reads one packet: a 5-byte header then exactly the declared payload.
    ///
    /// Returns `None` at a clean stream end (EOF on a packet boundary). The
    /// payload borrow is valid until the next read.
    pub async fn read_packet(
        &mut self,
        tracker: &TimeoutTracker,
    ) -> Result<Option<(PacketKind, &[u8])>> {
        let mut header = [0u8; HEADER_LEN];

        // EOF on the boundary ends the stream; EOF inside a packet does not.
        let slot = self.buffer.read_slot(1);
        let first = crate::channel::read_some(&mut self.stream, slot, tracker).await?;
        if first == 0 {
            return Ok(None);
        }
        header[0] = self.buffer.filled()[0];
        read_exactly(&mut self.stream, &mut header[1..], tracker).await?;

        let (kind, len) = shell::decode_header(&header);
        trace!(?kind, len, "shell-v2 packet");

        let slot = self.buffer.read_slot(len as usize);
        read_exactly(&mut self.stream, slot, tracker).await?;
        self.buffer.commit_read(len as usize);
        Ok(Some((kind, self.buffer.filled())))
    }
}

/// Writes shell-v2 packets through a prepared buffer.
#[derive(Debug)]
pub struct PacketWriter<S> {
    stream: S,
    buffer: WorkBuffer,
}

impl<S> PacketWriter<S>
where
    S: AsyncWrite + Unpin,
{
    /// Wraps the write side of a shell-v2 channel.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: WorkBuffer::with_capacity(HEADER_LEN + 8192),
        }
    }

    /// Starts a packet, returning the buffer to append the payload to.
    /// The header slot is already reserved.
    pub fn prepare(&mut self) -> &mut WorkBuffer {
        self.buffer.start_frame(HEADER_LEN);
        &mut self.buffer
    }

    /// Back-patches the header for `kind` over the prepared payload, then
    /// writes the whole packet.
    pub async fn write_prepared(&mut self, kind: PacketKind, tracker: &TimeoutTracker) -> Result<()> {
        let payload_len = self.buffer.payload_len(HEADER_LEN) as u32;
        self.buffer
            .patch_header(&shell::encode_header(kind, payload_len));
        trace!(?kind, payload_len, "writing shell-v2 packet");
        write_exactly(&mut self.stream, self.buffer.filled(), tracker).await
    }

    /// Convenience: one packet carrying `payload`.
    pub async fn write_packet(
        &mut self,
        kind: PacketKind,
        payload: &[u8],
        tracker: &TimeoutTracker,
    ) -> Result<()> {
        self.prepare().put_slice(payload);
        self.write_prepared(kind, tracker).await
    }

    /// Half-closes the write side after the final packet.
    pub async fn shutdown(&mut self, tracker: &TimeoutTracker) -> Result<()> {
        shutdown_output(&mut self.stream, tracker).await
    }
}
