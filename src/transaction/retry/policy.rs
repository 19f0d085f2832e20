use std::time::Duration;

use rand::Rng;

/// What a retry re-sends to the fresh attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Replay logged writes only, in their original order
    WriteSet,
    /// Replay writes and re-run logged reads, giving up if any read result changed
    Verified,
}

/// Delay between attempts
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,

    /// Growth factor per further retry
    pub multiplier: f64,

    /// Upper bound on the delay, before jitter
    pub max_delay: Duration,

    /// Extra random delay as a fraction of the computed delay (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            multiplier: 2.0,
            max_delay: Duration::from_millis(500),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// No waiting between attempts
    pub fn none() -> Self {
        Self {
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay before the given retry (1 = first retry), without jitter
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let delay = self.base_delay.as_secs_f64() * factor;
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped.max(0.0)).unwrap_or(self.max_delay)
    }

    /// Delay before the given retry, including random jitter
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.base_delay_for(retry);
        let jitter = if self.jitter.is_nan() { 0.0 } else { self.jitter.clamp(0.0, 1.0) };
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }

        let extra = rand::thread_rng().gen_range(0.0..=jitter);
        Duration::try_from_secs_f64(delay.as_secs_f64() * extra)
            .ok()
            .and_then(|extra| delay.checked_add(extra))
            .unwrap_or(delay)
    }
}

/// Configuration for transparent transaction retries
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Whether Aborted attempts are retried internally
    pub internal_retries_enabled: bool,

    /// Maximum number of attempts per logical transaction, including the first
    pub max_attempts: u32,

    /// Give up once this much time has passed since the transaction began
    pub max_elapsed: Option<Duration>,

    /// Delay between attempts
    pub backoff: BackoffPolicy,

    /// What a write-set retry re-sends
    pub replay_mode: ReplayMode,

    /// Re-run the whole transaction body instead of replaying its log
    pub reexecute_body: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            internal_retries_enabled: true,
            max_attempts: 10,
            max_elapsed: None,
            backoff: BackoffPolicy::default(),
            replay_mode: ReplayMode::WriteSet,
            reexecute_body: false,
        }
    }
}

impl RetryPolicy {
    /// Create a new RetryPolicy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RetryPolicy that surfaces every abort
    pub fn disabled() -> Self {
        Self {
            internal_retries_enabled: false,
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Set maximum number of attempts (at least 1)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the overall time budget
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_replay_mode(mut self, replay_mode: ReplayMode) -> Self {
        self.replay_mode = replay_mode;
        self
    }

    /// Retry by running the transaction body again from scratch
    pub fn with_body_reexecution(mut self) -> Self {
        self.reexecute_body = true;
        self
    }

    /// Effective attempt limit
    pub fn attempt_limit(&self) -> u32 {
        if self.internal_retries_enabled {
            self.max_attempts.max(1)
        } else {
            1
        }
    }
}
