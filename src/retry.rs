//! Retry state machine for a single logical request.
//!
//! ```text
//! Attempting ──► Success
//!     │  ├─────► NonRetryable
//!     │  └─────► Exhausted
//!     ▼
//! RetryWait ──resume──► Attempting
//! ```

use std::{collections::BTreeSet, time::Duration};

use crate::{
    rate_limit::RateLimitPolicy,
    transport::{RawResponse, TransportError, TransportErrorKind},
};

/// Result of one transport call.
pub type AttemptOutcome = Result<RawResponse, TransportError>;

/// Why an attempt was considered worth retrying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryCause {
    RateLimited,
    Status(u16),
    Transport(TransportErrorKind),
}

impl RetryCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Status(_) => "retryable_status",
            Self::Transport(_) => "transport",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryState {
    Attempting {
        attempt: usize,
    },
    RetryWait {
        attempt: usize,
        wait: Duration,
        cause: RetryCause,
    },
    Success,
    NonRetryable,
    Exhausted {
        attempts: usize,
        cause: RetryCause,
    },
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::NonRetryable | Self::Exhausted { .. }
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    pub max_retries: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub retry_on_status: BTreeSet<u16>,
    pub rate_limit: RateLimitPolicy,
}

impl RetryPolicy {
    /// Generic wait before retry number `attempt + 1`:
    /// `min(base * 2^attempt, max)`, never decreasing with `attempt`.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exp = attempt.min(16) as u32;
        self.base_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff.max(self.base_backoff))
    }

    fn classify(&self, outcome: &AttemptOutcome) -> Classification {
        match outcome {
            Ok(response) => {
                let rate_limit = self.rate_limit.assess(response.status, &response.headers);
                if rate_limit.is_rate_limited {
                    Classification::Retry {
                        cause: RetryCause::RateLimited,
                        wait: Some(rate_limit.wait),
                    }
                } else if self.retry_on_status.contains(&response.status) {
                    Classification::Retry {
                        cause: RetryCause::Status(response.status),
                        wait: None,
                    }
                } else if response.status < 400 {
                    Classification::Success
                } else {
                    Classification::NonRetryable
                }
            }
            Err(err) if err.kind.is_retryable() => Classification::Retry {
                cause: RetryCause::Transport(err.kind),
                wait: None,
            },
            Err(_) => Classification::NonRetryable,
        }
    }
}

enum Classification {
    Success,
    NonRetryable,
    Retry {
        cause: RetryCause,
        wait: Option<Duration>,
    },
}

/// Drives [`RetryState`] transitions for one logical request.
#[derive(Debug)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Attempting { attempt: 0 },
        }
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    /// Zero-based index of the current (or last) attempt.
    pub fn attempt(&self) -> usize {
        match self.state {
            RetryState::Attempting { attempt } | RetryState::RetryWait { attempt, .. } => attempt,
            RetryState::Exhausted { attempts, .. } => attempts.saturating_sub(1),
            RetryState::Success | RetryState::NonRetryable => 0,
        }
    }

    pub fn max_retries(&self) -> usize {
        self.policy.max_retries
    }

    /// Feeds the outcome of the current attempt. Only valid while
    /// `Attempting`; in any other state the state is returned unchanged.
    pub fn observe(&mut self, outcome: &AttemptOutcome) -> &RetryState {
        let RetryState::Attempting { attempt } = self.state else {
            return &self.state;
        };

        self.state = match self.policy.classify(outcome) {
            Classification::Success => RetryState::Success,
            Classification::NonRetryable => RetryState::NonRetryable,
            Classification::Retry { cause, .. } if attempt >= self.policy.max_retries => {
                RetryState::Exhausted {
                    attempts: attempt + 1,
                    cause,
                }
            }
            Classification::Retry { cause, wait } => RetryState::RetryWait {
                attempt,
                wait: wait.unwrap_or_else(|| self.policy.backoff(attempt)),
                cause,
            },
        };
        &self.state
    }

    /// Leaves `RetryWait` for the next attempt.
    pub fn resume(&mut self) {
        if let RetryState::RetryWait { attempt, .. } = self.state {
            self.state = RetryState::Attempting {
                attempt: attempt + 1,
            };
        }
    }
}
