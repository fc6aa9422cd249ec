//! SYNC sub-protocol: file push and pull over a switched device channel.
//!
//! A [`SyncConnection`] is handed a channel that has already switched
//! transport and consumed the `OKAY` of a `sync:` request. It can run any
//! number of send/recv operations sequentially before being dropped.
//!
//! Declared frame lengths are always authoritative: a short physical read is
//! completed by the channel primitives, and EOF before a declared length is
//! satisfied is a protocol error, never end-of-data.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use radb_proto::sync::{self, DATA_MAX, HEADER_LEN, REMOTE_PATH_MAX, SyncTag};

use crate::buffer::WorkBuffer;
use crate::channel::{read_exactly, write_exactly};
use crate::{Error, Result, TimeoutTracker};

/// Default transfer buffer size, matching the daemon's largest `DATA` frame.
pub const DEFAULT_BUFFER_SIZE: usize = DATA_MAX;

/// Fallback permission bits when the source has none (non-unix hosts).
#[cfg(not(unix))]
const DEFAULT_FILE_MODE: u32 = 0o644;

/// Observer of transfer progress.
///
/// `transfer_done` is only invoked after the daemon has acknowledged the
/// transfer; a failed or aborted transfer never reaches it.
pub trait SyncProgress: Send {
    /// Invoked once, before the first byte of the transfer is sent.
    fn transfer_started(&mut self, remote_path: &str) {
        let _ = remote_path;
    }

    /// Invoked after every chunk with the cumulative byte count.
    fn transfer_progress(&mut self, remote_path: &str, transferred: u64) {
        let _ = (remote_path, transferred);
    }

    /// Invoked once after a successful commit, with the final byte count.
    fn transfer_done(&mut self, remote_path: &str, transferred: u64) {
        let _ = (remote_path, transferred);
    }
}

/// Progress observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl SyncProgress for NullProgress {}

/// A device channel speaking the SYNC sub-protocol.
#[derive(Debug)]
pub struct SyncConnection<S> {
    stream: S,
    buffer: WorkBuffer,
    buffer_size: usize,
}

impl<S> SyncConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already-switched channel whose `sync:` request succeeded.
    pub fn new(stream: S) -> Self {
        Self::with_buffer_size(stream, DEFAULT_BUFFER_SIZE)
    }

    /// Like [`SyncConnection::new`] with an explicit transfer buffer size.
    /// Sizes above the daemon's frame limit are clamped to it.
    pub fn with_buffer_size(stream: S, buffer_size: usize) -> Self {
        let buffer_size = buffer_size.clamp(HEADER_LEN + 1, HEADER_LEN + DATA_MAX);
        Self {
            stream,
            buffer: WorkBuffer::with_capacity(buffer_size),
            buffer_size,
        }
    }

    /// Releases the underlying channel.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Pushes `source` to `remote_path` on the device.
    ///
    /// `mode` is the POSIX permission bits, sent in decimal in the `SEND`
    /// body. `mtime` is the modification time in epoch seconds; when `None`,
    /// the current wall-clock time is used. The mtime travels in the length
    /// field of the `DONE` frame, which is how the daemon defines it.
    pub async fn send(
        &mut self,
        source: &mut (impl AsyncRead + Unpin),
        remote_path: &str,
        mode: u32,
        mtime: Option<u32>,
        progress: &mut dyn SyncProgress,
        tracker: &TimeoutTracker,
    ) -> Result<u64> {
        check_remote_path(remote_path)?;
        progress.transfer_started(remote_path);
        debug!(remote_path, mode, "sync send");

        let body = format!("{remote_path},{mode}");
        self.write_frame(SyncTag::Send, body.as_bytes(), tracker)
            .await?;

        // Each chunk travels as one DATA frame staged header-first in the
        // work buffer, so header and payload go out in a single write.
        let chunk_max = self.buffer_size - HEADER_LEN;
        let mut total = 0u64;
        loop {
            let slot = self.buffer.read_slot(HEADER_LEN + chunk_max);
            let n = tracker
                .within(async { source.read(&mut slot[HEADER_LEN..]).await })
                .await?;
            if n == 0 {
                break;
            }
            self.buffer.commit_read(HEADER_LEN + n);
            self.buffer
                .patch_header(&sync::encode_header(SyncTag::Data, n as u32));
            write_exactly(&mut self.stream, self.buffer.filled(), tracker).await?;

            total += n as u64;
            trace!(remote_path, chunk = n, total, "sync data chunk");
            progress.transfer_progress(remote_path, total);
        }

        let mtime = mtime.unwrap_or_else(epoch_now);
        let done = sync::encode_header(SyncTag::Done, mtime);
        write_exactly(&mut self.stream, &done, tracker).await?;

        self.consume_send_ack(remote_path, tracker).await?;
        progress.transfer_done(remote_path, total);
        Ok(total)
    }

    /// Pulls `remote_path` from the device into `sink`.
    pub async fn recv(
        &mut self,
        remote_path: &str,
        sink: &mut (impl AsyncWrite + Unpin),
        progress: &mut dyn SyncProgress,
        tracker: &TimeoutTracker,
    ) -> Result<u64> {
        check_remote_path(remote_path)?;
        progress.transfer_started(remote_path);
        debug!(remote_path, "sync recv");

        self.write_frame(SyncTag::Recv, remote_path.as_bytes(), tracker)
            .await?;

        let mut total = 0u64;
        loop {
            let (tag, arg) = self.read_header(tracker).await?;
            match SyncTag::from_bytes(&tag) {
                Some(SyncTag::Data) => {
                    let len = arg as usize;
                    if len > DATA_MAX {
                        return Err(Error::protocol(format!(
                            "DATA frame of {len} bytes exceeds the {DATA_MAX}-byte limit"
                        )));
                    }
                    let slot = self.buffer.read_slot(len);
                    read_exactly(&mut self.stream, slot, tracker).await?;
                    self.buffer.commit_read(len);
                    tracker
                        .within(async { sink.write_all(self.buffer.filled()).await })
                        .await?;

                    total += len as u64;
                    trace!(remote_path, chunk = len, total, "sync data chunk");
                    progress.transfer_progress(remote_path, total);
                }
                Some(SyncTag::Done) => break,
                Some(SyncTag::Fail) => {
                    let message = self.read_fail_message(arg as usize, tracker).await?;
                    return Err(Error::AdbFail {
                        service: format!("sync recv {remote_path}"),
                        message,
                    });
                }
                _ => {
                    return Err(Error::protocol(format!(
                        "unexpected sync tag {:?} while receiving",
                        String::from_utf8_lossy(&tag)
                    )));
                }
            }
        }

        tracker.within(async { sink.flush().await }).await?;
        progress.transfer_done(remote_path, total);
        Ok(total)
    }

    /// Pushes a local file, taking mode and mtime from its metadata.
    pub async fn send_file(
        &mut self,
        local_path: impl AsRef<std::path::Path>,
        remote_path: &str,
        progress: &mut dyn SyncProgress,
        tracker: &TimeoutTracker,
    ) -> Result<u64> {
        let local_path = local_path.as_ref();
        let mut file = tracker
            .within(async { tokio::fs::File::open(local_path).await })
            .await?;
        let metadata = tracker.within(async { file.metadata().await }).await?;

        let mode = file_mode(&metadata);
        let mtime = metadata
            .modified()
            .ok()
            .map(epoch_seconds)
            .unwrap_or_else(epoch_now);
        self.send(&mut file, remote_path, mode, Some(mtime), progress, tracker)
            .await
    }

    /// Pulls a remote file into a local file created (or truncated) at
    /// `local_path`. A transfer failure is primary over any failure to
    /// finalize the partial local file.
    pub async fn recv_file(
        &mut self,
        remote_path: &str,
        local_path: impl AsRef<std::path::Path>,
        progress: &mut dyn SyncProgress,
        tracker: &TimeoutTracker,
    ) -> Result<u64> {
        let local_path = local_path.as_ref();
        let mut file = tracker
            .within(async { tokio::fs::File::create(local_path).await })
            .await?;

        let result = self.recv(remote_path, &mut file, progress, tracker).await;
        match file.sync_all().await {
            Ok(()) => result,
            Err(close_err) => match result {
                // The transfer error stays primary.
                Err(primary) => {
                    warn!(path = %local_path.display(), error = %close_err, "suppressing file close error after transfer failure");
                    Err(primary)
                }
                Ok(_) => Err(close_err.into()),
            },
        }
    }

    /// Stages and writes one `[header][body]` frame.
    async fn write_frame(
        &mut self,
        tag: SyncTag,
        body: &[u8],
        tracker: &TimeoutTracker,
    ) -> Result<()> {
        self.buffer.start_frame(HEADER_LEN);
        self.buffer.put_slice(body);
        self.buffer
            .patch_header(&sync::encode_header(tag, body.len() as u32));
        write_exactly(&mut self.stream, self.buffer.filled(), tracker).await
    }

    /// Reads one 8-byte frame header.
    async fn read_header(&mut self, tracker: &TimeoutTracker) -> Result<([u8; 4], u32)> {
        let mut header = [0u8; HEADER_LEN];
        read_exactly(&mut self.stream, &mut header, tracker).await?;
        Ok(sync::decode_header(&header))
    }

    /// Consumes the terminal `OKAY`/`FAIL` frame of a send.
    async fn consume_send_ack(&mut self, remote_path: &str, tracker: &TimeoutTracker) -> Result<()> {
        let (tag, arg) = self.read_header(tracker).await?;
        match SyncTag::from_bytes(&tag) {
            Some(SyncTag::Okay) => Ok(()),
            Some(SyncTag::Fail) => {
                let message = self.read_fail_message(arg as usize, tracker).await?;
                Err(Error::AdbFail {
                    service: format!("sync send {remote_path}"),
                    message,
                })
            }
            _ => Err(Error::protocol(format!(
                "unexpected sync tag {:?} after DONE",
                String::from_utf8_lossy(&tag)
            ))),
        }
    }

    /// Reads a `FAIL` frame's message body verbatim.
    async fn read_fail_message(&mut self, len: usize, tracker: &TimeoutTracker) -> Result<String> {
        let slot = self.buffer.read_slot(len);
        read_exactly(&mut self.stream, slot, tracker).await?;
        self.buffer.commit_read(len);
        Ok(String::from_utf8_lossy(self.buffer.filled()).into_owned())
    }
}

/// Rejects over-long remote paths before any byte goes out.
fn check_remote_path(remote_path: &str) -> Result<()> {
    if remote_path.len() > REMOTE_PATH_MAX {
        return Err(Error::InvalidArgument(format!(
            "remote path of {} bytes exceeds the {REMOTE_PATH_MAX}-byte limit",
            remote_path.len()
        )));
    }
    Ok(())
}

fn epoch_now() -> u32 {
    epoch_seconds(SystemTime::now())
}

fn epoch_seconds(t: SystemTime) -> u32 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    DEFAULT_FILE_MODE
}
