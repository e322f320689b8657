use std::time::Duration;

/// Reconnection policy of a [`ReconnectingTypedEventSource`](super::ReconnectingTypedEventSource).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectOptions {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_factor: 2.0,
        }
    }
}

/// Exponential reconnect delay, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct Backoff {
    options: ReconnectOptions,
    current: Duration,
}

impl Backoff {
    pub fn new(options: ReconnectOptions) -> Self {
        Self {
            current: options.initial_delay,
            options,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Grow the delay after an attempt was scheduled.
    pub fn advance(&mut self) {
        let max = self.options.max_delay;
        let next = (self.current.as_secs_f64() * self.options.backoff_factor)
            .clamp(0.0, max.as_secs_f64());
        self.current = Duration::try_from_secs_f64(next).unwrap_or(max);
    }

    /// Back to the initial delay after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.options.initial_delay;
    }
}
