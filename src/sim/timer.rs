//! Tick-driven timers
//!
//! Nothing here reads a wall clock. Owners feed in frame deltas, so tests can
//! drive a whole match with synthetic ticks.

use std::time::Duration;

/// Fixed-interval repeating timer (the sampling loop)
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    interval: Duration,
    accumulator: Duration,
}

impl IntervalTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            accumulator: Duration::ZERO,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Add `dt` and return how many intervals elapsed
    pub fn advance(&mut self, dt: Duration) -> u32 {
        if self.interval.is_zero() {
            return 0;
        }
        self.accumulator += dt;
        let mut fires = 0;
        while self.accumulator >= self.interval {
            self.accumulator -= self.interval;
            fires += 1;
        }
        fires
    }

    pub fn reset(&mut self) {
        self.accumulator = Duration::ZERO;
    }
}

/// What happened during one [`Countdown::advance`] call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountdownProgress {
    /// Time remaining at each tick boundary crossed (expiry excluded)
    pub ticks: Vec<Duration>,
    /// The countdown reached zero during this call
    pub expired: bool,
}

/// One-shot countdown that reports remaining time every `tick_interval`
#[derive(Debug, Clone)]
pub struct Countdown {
    total: Duration,
    elapsed: Duration,
    tick_interval: Duration,
    fired: bool,
}

impl Countdown {
    pub fn new(total: Duration, tick_interval: Duration) -> Self {
        Self {
            total,
            elapsed: Duration::ZERO,
            tick_interval,
            fired: false,
        }
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn remaining(&self) -> Duration {
        self.total.saturating_sub(self.elapsed)
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed >= self.total
    }

    /// Advance by `dt`. Expiry is reported exactly once.
    pub fn advance(&mut self, dt: Duration) -> CountdownProgress {
        if self.fired {
            return CountdownProgress::default();
        }

        let before = self.elapsed;
        self.elapsed = (self.elapsed + dt).min(self.total);

        let mut progress = CountdownProgress::default();
        if !self.tick_interval.is_zero() {
            let step = self.tick_interval.as_nanos();
            let first = before.as_nanos() / step + 1;
            let last = self.elapsed.as_nanos() / step;
            for k in first..=last {
                let boundary = Duration::from_nanos((step * k) as u64);
                let remaining = self.total.saturating_sub(boundary);
                if !remaining.is_zero() {
                    progress.ticks.push(remaining);
                }
            }
        }

        if self.is_expired() {
            self.fired = true;
            progress.expired = true;
        }
        progress
    }
}
