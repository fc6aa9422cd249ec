//! Byte-channel primitives and server connection establishment.
//!
//! All reads and writes here are exact-length and bounded by the caller's
//! [`TimeoutTracker`]: a short physical read is completed by the primitive,
//! an elapsed deadline is a hard [`Error::Timeout`], and EOF in the middle of
//! a declared-length region is a protocol error, never "end of data".
//!
//! Half-close is [`tokio::io::AsyncWriteExt::shutdown`] (write side only,
//! reads continue); dropping the stream closes it.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, lookup_host};
use tracing::{debug, warn};

use crate::error::ConnectError;
use crate::{Error, Result, TimeoutTracker};

/// Default endpoint of a locally running ADB server.
pub const DEFAULT_SERVER: &str = "127.0.0.1:5037";

/// Reads exactly `buf.len()` bytes within the tracker's remaining budget.
///
/// EOF before the buffer is full is [`Error::Protocol`].
pub async fn read_exactly<S>(stream: &mut S, buf: &mut [u8], tracker: &TimeoutTracker) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let result = tracker
        .within(async { stream.read_exact(buf).await.map(|_| ()) })
        .await;
    match result {
        Err(Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::protocol(
            format!("connection closed before {} expected bytes", buf.len()),
        )),
        other => other,
    }
}

/// Reads at most `buf.len()` bytes, returning how many arrived.
///
/// Zero means the peer closed its write side. Used by byte-stream services
/// (shell v1 / exec) where EOF *is* the terminator.
pub async fn read_some<S>(stream: &mut S, buf: &mut [u8], tracker: &TimeoutTracker) -> Result<usize>
where
    S: AsyncRead + Unpin,
{
    tracker.within(async { stream.read(buf).await }).await
}

/// Writes all of `bytes` within the tracker's remaining budget.
pub async fn write_exactly<S>(stream: &mut S, bytes: &[u8], tracker: &TimeoutTracker) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    tracker.within(async { stream.write_all(bytes).await }).await
}

/// Half-closes the write side; the read side stays usable.
pub async fn shutdown_output<S>(stream: &mut S, tracker: &TimeoutTracker) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    tracker.within(async { stream.shutdown().await }).await
}

/// Ordered candidate endpoints for the ADB server.
///
/// Candidates are plain `host:port` strings; name resolution happens lazily,
/// once, at connect time, so a server started after this value was built is
/// still found.
#[derive(Debug, Clone)]
pub struct ServerAddrs {
    /// Candidate `host:port` strings, tried in order.
    candidates: Vec<String>,
}

impl ServerAddrs {
    /// Builds from an ordered candidate list.
    pub fn new(candidates: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            candidates: candidates.into_iter().map(Into::into).collect(),
        }
    }

    /// The conventional local server endpoint, `127.0.0.1:5037`.
    pub fn local_default() -> Self {
        Self::new([DEFAULT_SERVER])
    }

    /// The candidate strings, in attempt order.
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }
}

impl Default for ServerAddrs {
    fn default() -> Self {
        Self::local_default()
    }
}

/// Connects to the first reachable candidate, in order, under one tracker.
///
/// Attempts are strictly sequential. Each failure is recorded and the next
/// candidate is tried; when every candidate fails the returned
/// [`ConnectError`] carries every individual cause, not just the last. An
/// already-expired tracker fails with [`Error::Timeout`] before any attempt,
/// including before name resolution.
pub async fn connect(addrs: &ServerAddrs, tracker: &TimeoutTracker) -> Result<TcpStream> {
    tracker.check_expired()?;

    let mut attempts: Vec<(String, io::Error)> = Vec::new();
    for candidate in &addrs.candidates {
        tracker.check_expired()?;
        match connect_candidate(candidate, tracker, &mut attempts).await? {
            Some(stream) => {
                debug!(addr = %candidate, "connected to ADB server");
                return Ok(stream);
            }
            None => {
                warn!(addr = %candidate, "candidate failed, trying next");
            }
        }
    }
    Err(ConnectError { attempts }.into())
}

/// Tries one candidate string: resolve it, then each resolved address in
/// order. Failures are appended to `attempts`; `Ok(None)` means "keep going".
/// Only a timeout escapes as `Err`, aborting the whole scan.
async fn connect_candidate(
    candidate: &str,
    tracker: &TimeoutTracker,
    attempts: &mut Vec<(String, io::Error)>,
) -> Result<Option<TcpStream>> {
    let resolved = match tracker.within(async { lookup_host(candidate).await }).await {
        Ok(iter) => iter.collect::<Vec<_>>(),
        Err(Error::Timeout) => return Err(Error::Timeout),
        Err(Error::Io(e)) => {
            attempts.push((candidate.to_owned(), e));
            return Ok(None);
        }
        Err(other) => return Err(other),
    };
    if resolved.is_empty() {
        attempts.push((
            candidate.to_owned(),
            io::Error::new(io::ErrorKind::NotFound, "name resolved to no addresses"),
        ));
        return Ok(None);
    }

    for addr in resolved {
        tracker.check_expired()?;
        debug!(%addr, "attempting ADB server connection");
        match tracker.within(async { TcpStream::connect(addr).await }).await {
            Ok(stream) => {
                // Request/response exchanges are latency bound; never batch.
                if let Err(e) = stream.set_nodelay(true) {
                    attempts.push((addr.to_string(), e));
                    continue;
                }
                return Ok(Some(stream));
            }
            Err(Error::Timeout) => return Err(Error::Timeout),
            Err(Error::Io(e)) => attempts.push((addr.to_string(), e)),
            Err(other) => return Err(other),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::TimeLimit;

    #[tokio::test(start_paused = true)]
    async fn expired_tracker_fails_before_resolution() {
        let tracker = TimeoutTracker::new(TimeLimit::Bounded(Duration::from_millis(1)));
        tokio::time::advance(Duration::from_millis(5)).await;

        let addrs = ServerAddrs::new(["127.0.0.1:1"]);
        assert!(matches!(
            connect(&addrs, &tracker).await,
            Err(Error::Timeout)
        ));
    }

    #[tokio::test]
    async fn exact_read_rejects_early_eof() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);

        let mut client = client;
        let mut buf = [0u8; 4];
        let err = read_exactly(&mut client, &mut buf, &TimeoutTracker::unbounded())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }
}
