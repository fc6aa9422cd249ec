//! Host-protocol request/response exchanges over one channel.
//!
//! A [`ServiceRunner`] owns a byte stream and a [`WorkBuffer`] and drives the
//! strict request→response alternation of the ADB host protocol: frame a
//! service request, consume the `OKAY`/`FAIL` status, then read whatever body
//! the service defines. Every step takes the caller's [`TimeoutTracker`], so
//! a whole exchange shares one budget.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use radb_proto::host::{self, FAIL, OKAY};

use crate::buffer::WorkBuffer;
use crate::channel::{read_exactly, write_exactly};
use crate::device::DeviceSelector;
use crate::{Error, Result, TimeoutTracker};

/// Drives host-protocol exchanges over an owned byte stream.
///
/// The runner is the channel's single writer; callers never interleave their
/// own writes with a pending exchange.
#[derive(Debug)]
pub struct ServiceRunner<S> {
    stream: S,
    buffer: WorkBuffer,
}

impl<S> ServiceRunner<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps `stream` with a fresh work buffer.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: WorkBuffer::with_capacity(256),
        }
    }

    /// Releases the underlying stream, e.g. after switching it into a
    /// sub-protocol that no longer speaks host framing.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// The underlying stream, for sub-protocols layered over the same
    /// channel after a successful exchange.
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Frames and sends one service request: `%04x` ASCII length prefix
    /// followed by the raw request bytes, no terminator.
    pub async fn send_request(&mut self, service: &str, tracker: &TimeoutTracker) -> Result<()> {
        debug!(service, "sending service request");
        let frame = host::encode_request(service)?;
        write_exactly(&mut self.stream, &frame, tracker).await
    }

    /// Reads the 4-byte status word for `service`.
    ///
    /// `FAIL` is followed by a hex-length-prefixed UTF-8 message, surfaced
    /// verbatim as [`Error::AdbFail`]. Any other word is a protocol error.
    pub async fn consume_status(&mut self, service: &str, tracker: &TimeoutTracker) -> Result<()> {
        let mut status = [0u8; 4];
        read_exactly(&mut self.stream, &mut status, tracker).await?;
        trace!(service, status = ?status, "status word");
        match status {
            OKAY => Ok(()),
            FAIL => {
                let message = self.read_length_prefixed(tracker).await?;
                Err(Error::AdbFail {
                    service: service.to_owned(),
                    message,
                })
            }
            other => Err(Error::protocol(format!(
                "unexpected status word {:?} for '{service}'",
                String::from_utf8_lossy(&other)
            ))),
        }
    }

    /// Sends `service` and consumes its status word.
    pub async fn run(&mut self, service: &str, tracker: &TimeoutTracker) -> Result<()> {
        self.send_request(service, tracker).await?;
        self.consume_status(service, tracker).await
    }

    /// Reads a hex-length-prefixed UTF-8 body.
    ///
    /// The ADB charset is plain UTF-8 and never locale dependent.
    pub async fn read_length_prefixed(&mut self, tracker: &TimeoutTracker) -> Result<String> {
        let mut prefix = [0u8; 4];
        read_exactly(&mut self.stream, &mut prefix, tracker).await?;
        let len = host::decode_hex_length(&prefix)?;

        let slot = self.buffer.read_slot(len);
        read_exactly(&mut self.stream, slot, tracker).await?;
        self.buffer.commit_read(len);

        String::from_utf8(self.buffer.filled().to_vec())
            .map_err(|e| Error::protocol_with_source("response body is not UTF-8", e))
    }

    /// Runs `host:version` and parses the server's 4-digit hex version.
    pub async fn host_version(&mut self, tracker: &TimeoutTracker) -> Result<u32> {
        self.run("host:version", tracker).await?;
        let text = self.read_length_prefixed(tracker).await?;
        u32::from_str_radix(&text, 16).map_err(|e| {
            Error::protocol_with_source(format!("version response {text:?} is not hex"), e)
        })
    }

    /// Switches this channel to a device transport.
    ///
    /// After `OKAY` the same channel is scoped to the selected device and
    /// speaks whatever service is requested next. The `host:tport:*` forms
    /// additionally return the transport id as 8 little-endian bytes, handed
    /// back so callers can address the same transport unambiguously later.
    pub async fn switch_transport(
        &mut self,
        selector: &DeviceSelector,
        tracker: &TimeoutTracker,
    ) -> Result<Option<u64>> {
        let service = selector.service_string();
        self.run(&service, tracker).await?;
        if selector.reports_transport_id() {
            let mut raw = [0u8; 8];
            read_exactly(&mut self.stream, &mut raw, tracker).await?;
            let id = u64::from_le_bytes(raw);
            debug!(transport_id = id, "transport switched");
            Ok(Some(id))
        } else {
            debug!(service, "transport switched");
            Ok(None)
        }
    }
}
