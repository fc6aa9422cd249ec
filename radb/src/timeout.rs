//! Deadline tracking across chained protocol steps.
//!
//! One [`TimeoutTracker`] is created per logical operation and consulted by
//! every sequential network call within it, so a slow early step shrinks the
//! budget left for later steps. The tracker is immutable: it is constructed
//! once and never reset.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::{Error, Result};

/// A time budget: either a finite duration or no deadline at all.
///
/// "No deadline" is a real variant rather than a maximum-duration sentinel,
/// so no arithmetic on it can overflow and remaining time stays unbounded
/// after any finite elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeLimit {
    /// Finite budget.
    Bounded(Duration),
    /// No deadline; waits forever.
    Unbounded,
}

impl TimeLimit {
    /// Returns `true` for [`TimeLimit::Unbounded`].
    pub const fn is_unbounded(self) -> bool {
        matches!(self, Self::Unbounded)
    }
}

impl From<Duration> for TimeLimit {
    fn from(d: Duration) -> Self {
        Self::Bounded(d)
    }
}

/// Immutable deadline tracker shared by the sequential steps of one operation.
///
/// Uses [`tokio::time::Instant`], so trackers obey paused time in tests.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutTracker {
    /// When the tracked operation started.
    start: Instant,
    /// The total budget granted at construction.
    limit: TimeLimit,
}

impl TimeoutTracker {
    /// Starts tracking `limit` from now.
    pub fn new(limit: TimeLimit) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    /// A tracker that never expires.
    pub fn unbounded() -> Self {
        Self::new(TimeLimit::Unbounded)
    }

    /// Time spent since the tracker was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Budget left: the initial limit minus elapsed time, clamped at zero.
    /// An unbounded tracker reports unbounded forever.
    pub fn remaining(&self) -> TimeLimit {
        match self.limit {
            TimeLimit::Unbounded => TimeLimit::Unbounded,
            TimeLimit::Bounded(total) => TimeLimit::Bounded(total.saturating_sub(self.elapsed())),
        }
    }

    /// Fails with [`Error::Timeout`] the instant no budget remains.
    pub fn check_expired(&self) -> Result<()> {
        match self.remaining() {
            TimeLimit::Bounded(left) if left.is_zero() => Err(Error::Timeout),
            _ => Ok(()),
        }
    }

    /// Awaits `fut` under the tracker's *remaining* budget.
    ///
    /// Expiry cancels the future (dropping it) and yields [`Error::Timeout`].
    /// The same tracker is passed to each successive call, so waits compose:
    /// their sum never exceeds the original limit.
    pub async fn within<T, E>(&self, fut: impl Future<Output = std::result::Result<T, E>>) -> Result<T>
    where
        E: Into<Error>,
    {
        match self.remaining() {
            TimeLimit::Unbounded => fut.await.map_err(Into::into),
            TimeLimit::Bounded(left) if left.is_zero() => Err(Error::Timeout),
            TimeLimit::Bounded(left) => match tokio::time::timeout(left, fut).await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(Error::Timeout),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bounded_budget_shrinks_with_elapsed_time() {
        let tracker = TimeoutTracker::new(TimeLimit::Bounded(Duration::from_secs(10)));
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(
            tracker.remaining(),
            TimeLimit::Bounded(Duration::from_secs(6))
        );
        assert!(tracker.check_expired().is_ok());

        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(tracker.remaining(), TimeLimit::Bounded(Duration::ZERO));
        assert!(matches!(tracker.check_expired(), Err(Error::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_stays_unbounded_after_finite_elapsed_time() {
        let tracker = TimeoutTracker::unbounded();
        tokio::time::advance(Duration::from_secs(1_000_000)).await;
        assert!(tracker.remaining().is_unbounded());
        assert!(tracker.check_expired().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_waits_share_one_budget() {
        let tracker = TimeoutTracker::new(TimeLimit::Bounded(Duration::from_millis(100)));

        // First step consumes 60ms of the budget.
        let step = tracker.within(async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            Ok::<_, Error>(())
        });
        step.await.unwrap();

        // Second step wants 60ms more but only 40ms remain.
        let step = tracker.within(async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            Ok::<_, Error>(())
        });
        assert!(matches!(step.await, Err(Error::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_tracker_fails_without_polling_the_future() {
        let tracker = TimeoutTracker::new(TimeLimit::Bounded(Duration::from_millis(1)));
        tokio::time::advance(Duration::from_millis(2)).await;

        let polled = std::sync::atomic::AtomicBool::new(false);
        let result = tracker
            .within(async {
                polled.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, Error>(())
            })
            .await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
    }
}
