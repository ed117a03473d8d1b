//! Circuit breaker around broker calls
//!
//! Consecutive failures open the circuit and calls are rejected outright
//! instead of queueing behind a broker that is down. After a cooldown the
//! breaker lets probe requests through; enough successful probes close it
//! again, one failed probe re-opens it.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Where the breaker currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BreakerState {
    /// Calls pass through normally.
    #[default]
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// Cooldown elapsed; probe calls are allowed through.
    HalfOpen,
}

/// Tracks consecutive broker-call outcomes and gates new attempts.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    probe_successes: u32,
    failure_threshold: u32,
    success_threshold: u32,
    cooldown: Duration,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    /// `failure_threshold` consecutive failures open the circuit;
    /// `success_threshold` successful probes close it again after `cooldown`.
    pub fn new(failure_threshold: u32, success_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            probe_successes: 0,
            failure_threshold,
            success_threshold,
            cooldown,
            opened_at: None,
        }
    }

    /// 5 consecutive failures, 2 probes to recover, 60s cooldown.
    pub fn with_defaults() -> Self {
        Self::new(5, 2, Duration::from_secs(60))
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }

    /// Whether the next call should be attempted at all. An open breaker
    /// whose cooldown has elapsed moves to half-open as a side effect.
    pub fn can_attempt(&mut self) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let cooled = self
                    .opened_at
                    .map(|t| t.elapsed() >= self.cooldown)
                    .unwrap_or(true);
                if cooled {
                    info!("circuit breaker half-open, probing broker");
                    self.state = BreakerState::HalfOpen;
                    self.probe_successes = 0;
                }
                cooled
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            BreakerState::Closed => self.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                self.probe_successes += 1;
                if self.probe_successes >= self.success_threshold {
                    info!("circuit breaker closed, broker recovered");
                    self.state = BreakerState::Closed;
                    self.consecutive_failures = 0;
                    self.probe_successes = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&mut self) {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.failure_threshold {
                    warn!(
                        failures = self.consecutive_failures,
                        "circuit breaker opened"
                    );
                    self.state = BreakerState::Open;
                    self.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                warn!("probe failed, circuit breaker re-opened");
                self.state = BreakerState::Open;
                self.opened_at = Some(Instant::now());
                self.probe_successes = 0;
            }
            BreakerState::Open => self.opened_at = Some(Instant::now()),
        }
    }

    /// Operator action: force the breaker back to closed.
    pub fn reset(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.probe_successes = 0;
        self.opened_at = None;
    }
}
