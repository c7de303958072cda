//! Reconnect policy for a dropped trace stream.

use std::time::Duration;

use rand::Rng;

/// What to do after the transport closes or errors.
///
/// The default never reconnects: the subscription closes and the view keeps
/// whatever sessions existed at that point.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ReconnectPolicy {
    #[default]
    Never,
    Backoff(Backoff),
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), or `None` to give up.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::Backoff(backoff) => backoff.delay(attempt),
        }
    }
}

/// Capped exponential backoff with optional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
    /// Scale each delay by a random factor in `[0.5, 1.0]`.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
            jitter: true,
        }
    }
}

impl Backoff {
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = base.min(self.max.as_secs_f64());
        let secs = if self.jitter {
            capped * rand::rng().random_range(0.5..=1.0)
        } else {
            capped
        };
        Some(Duration::from_secs_f64(secs))
    }
}
