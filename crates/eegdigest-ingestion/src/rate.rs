//! Shared request pacing for polite clients.
//!
//! One [`RateGate`] is cloned into every worker that talks to the same host, so
//! the spacing holds across concurrent items.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct RateGate {
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl RateGate {
    /// At most one request per `seconds`. Zero or negative disables the gate.
    pub fn every_seconds(seconds: f64) -> Self {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Self::unlimited();
        }
        let limiter = Quota::with_period(Duration::from_secs_f64(seconds))
            .map(|quota| Arc::new(RateLimiter::direct(quota)));
        Self { limiter }
    }

    pub fn unlimited() -> Self {
        Self { limiter: None }
    }

    pub fn is_limited(&self) -> bool {
        self.limiter.is_some()
    }

    /// Wait until the next request may be sent.
    pub async fn wait(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

impl std::fmt::Debug for RateGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGate").field("limited", &self.is_limited()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let gate = RateGate::every_seconds(0.0);
        assert!(!gate.is_limited());
        let started = Instant::now();
        for _ in 0..10 {
            gate.wait().await;
        }
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_clones_share_one_budget() {
        let gate = RateGate::every_seconds(0.2);
        let other = gate.clone();
        let started = Instant::now();
        gate.wait().await;
        other.wait().await;
        assert!(started.elapsed() >= Duration::from_millis(150));
    }
}
