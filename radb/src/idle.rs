//! Heartbeat-based inactivity detection for long-running commands.
//!
//! The producer side holds a [`Heartbeat`] and pulses it on every observed
//! activity; the [`watchdog`] waits on the other end with the idle window as
//! its per-wait deadline. Both run as independently polled futures joined by
//! the caller, so a command that goes quiet without dying still times out
//! deterministically.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::{Error, Result};

/// Producer half of the idle monitor.
///
/// Dropping it closes the channel, which the watchdog reads as clean
/// completion.
#[derive(Debug)]
pub struct Heartbeat {
    tx: mpsc::Sender<()>,
}

impl Heartbeat {
    /// Signals activity. Fire-and-forget: a full slot means a pulse is
    /// already pending, which is just as good.
    pub fn pulse(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Creates a connected heartbeat pair with a one-slot channel.
pub fn heartbeat() -> (Heartbeat, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (Heartbeat { tx }, rx)
}

/// Waits for heartbeats, failing with [`Error::IdleTimeout`] if none arrives
/// within `idle_limit`.
///
/// Each received pulse restarts the wait. When every [`Heartbeat`] clone is
/// dropped the channel closes and the watchdog returns `Ok(())`.
pub async fn watchdog(mut rx: mpsc::Receiver<()>, idle_limit: Duration) -> Result<()> {
    loop {
        match tokio::time::timeout(idle_limit, rx.recv()).await {
            Ok(Some(())) => {}
            Ok(None) => {
                debug!("idle watchdog: producer finished");
                return Ok(());
            }
            Err(_) => {
                debug!(?idle_limit, "idle watchdog: no activity within the window");
                return Err(Error::IdleTimeout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_when_the_producer_goes_quiet() {
        let (beat, rx) = heartbeat();
        let guard = tokio::spawn(watchdog(rx, Duration::from_secs(2)));

        // Activity keeps the watchdog from firing.
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            beat.pulse();
        }

        // Then silence longer than the window.
        tokio::time::sleep(Duration::from_secs(3)).await;
        let result = guard.await.unwrap();
        assert!(matches!(result, Err(Error::IdleTimeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn exits_cleanly_when_the_heartbeat_is_dropped() {
        let (beat, rx) = heartbeat();
        let guard = tokio::spawn(watchdog(rx, Duration::from_secs(2)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        beat.pulse();
        drop(beat);

        assert!(guard.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_pulses_keep_it_alive_indefinitely() {
        let (beat, rx) = heartbeat();
        let guard = tokio::spawn(watchdog(rx, Duration::from_secs(2)));

        for _ in 0..100 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            beat.pulse();
        }
        drop(beat);
        assert!(guard.await.unwrap().is_ok());
    }
}
