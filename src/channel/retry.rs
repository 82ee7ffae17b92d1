//! Connection retry for outbound peer-daemon channels.
//!
//! When a cross-server deployment needs a channel to a peer daemon
//! that is not up yet, the connection is retried with exponential
//! backoff instead of failing the deployment outright.

use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Backoff policy for outbound connection attempts.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Attempts before giving up; 0 disables retries.
    pub max_retries: u32,
    /// First backoff interval.
    pub base_interval_ms: u64,
    /// Backoff ceiling.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_interval_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

/// Tracks attempts against a policy.
#[derive(Clone, Copy, Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    retry_count: u32,
}

impl RetryState {
    /// Fresh state for one endpoint.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retry_count: 0,
        }
    }

    /// Attempts made so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Backoff for the current attempt: `base * 2^count`, capped.
    pub fn backoff_ms(&self) -> u64 {
        let multiplier = 1u64.checked_shl(self.retry_count).unwrap_or(u64::MAX);
        self.policy
            .base_interval_ms
            .saturating_mul(multiplier)
            .min(self.policy.max_backoff_ms)
    }

    /// Record a failed attempt. Returns the delay before the next
    /// attempt, or `None` when retries are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retry_count >= self.policy.max_retries {
            return None;
        }
        let delay = Duration::from_millis(self.backoff_ms());
        self.retry_count += 1;
        Some(delay)
    }
}

/// Connect to a peer daemon, retrying per the policy.
pub async fn connect_with_retry(addr: &str, policy: RetryPolicy) -> std::io::Result<TcpStream> {
    let mut state = RetryState::new(policy);
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                info!(%addr, retries = state.retry_count(), "Connected to peer daemon");
                return Ok(stream);
            }
            Err(err) => match state.next_delay() {
                Some(delay) => {
                    warn!(
                        %addr,
                        error = %err,
                        retry = state.retry_count(),
                        delay_ms = delay.as_millis() as u64,
                        "Peer daemon connection failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(%addr, error = %err, "Peer daemon connection retries exhausted");
                    return Err(err);
                }
            },
        }
    }
}
