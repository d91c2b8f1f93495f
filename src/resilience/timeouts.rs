//! Timeout enforcement for engine hooks.
//!
//! # Responsibilities
//! - Bound every asynchronous hook (validators, listeners) with a deadline
//! - Report the deadline that was exceeded so callers can log it
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - A timed-out hook is abandoned, never retried

use std::future::Future;
use std::time::Duration;

use tokio::time;

/// Await `fut` for at most `limit`. On expiry returns `Err(limit)`.
pub async fn run_bounded<F>(limit: Duration, fut: F) -> Result<F::Output, Duration>
where
    F: Future,
{
    time::timeout(limit, fut).await.map_err(|_| limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_limit() {
        let out = run_bounded(Duration::from_millis(200), async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn test_expires() {
        let out = run_bounded(Duration::from_millis(20), async {
            time::sleep(Duration::from_secs(5)).await;
        })
        .await;
        assert_eq!(out, Err(Duration::from_millis(20)));
    }
}
