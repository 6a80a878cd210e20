use std::time::Duration;

/// Exponential backoff bounded by the cumulative time spent waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max_total: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max_total: Duration) -> Self {
        Self { initial, max_total }
    }

    pub fn schedule(&self) -> BackoffSchedule {
        BackoffSchedule {
            next: self.initial.max(Duration::from_millis(1)),
            waited: Duration::ZERO,
            max_total: self.max_total,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    next: Duration,
    waited: Duration,
    max_total: Duration,
}

impl BackoffSchedule {
    /// Next delay, or `None` once it would push the total past the budget.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.next;
        if self.waited + delay > self.max_total {
            return None;
        }
        self.waited += delay;
        self.next = delay * 2;
        Some(delay)
    }

    pub fn waited(&self) -> Duration {
        self.waited
    }
}
