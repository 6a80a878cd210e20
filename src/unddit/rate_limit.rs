use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

/// Token bucket guarding one upstream service.
///
/// `next_refill` is only meaningful while the bucket is below capacity; a full
/// bucket carries `None`. The lock is never held across an await point.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    interval: Duration,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    next_refill: Option<Instant>,
}

impl RateLimiter {
    pub fn new(capacity: u32, interval: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            interval: interval.max(Duration::from_millis(1)),
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                next_refill: None,
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn bucket(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        if bucket.tokens >= self.capacity {
            bucket.next_refill = None;
            return;
        }
        let Some(due) = bucket.next_refill else {
            bucket.next_refill = Some(now + self.interval);
            return;
        };
        if now < due {
            return;
        }

        let missed = (now - due).as_nanos() / self.interval.as_nanos() + 1;
        let missed = u32::try_from(missed).unwrap_or(u32::MAX);
        let tokens = bucket.tokens.saturating_add(missed).min(self.capacity);
        bucket.tokens = tokens;
        bucket.next_refill = if tokens >= self.capacity {
            None
        } else {
            Some(due + self.interval * missed)
        };
    }

    /// Wait for one token and debit it.
    pub async fn acquire(&self) {
        loop {
            let wake_at = {
                let mut bucket = self.bucket();
                let now = Instant::now();
                self.refill(&mut bucket, now);
                if bucket.tokens > 0 {
                    if bucket.tokens == self.capacity {
                        bucket.next_refill = Some(now + self.interval);
                    }
                    bucket.tokens -= 1;
                    return;
                }
                bucket.next_refill.unwrap_or(now + self.interval)
            };
            // Several waiters may wake on the same deadline; the loop lets
            // only one of them take the refilled token.
            sleep_until(wake_at).await;
        }
    }

    /// Drain the bucket and hold off the next refill for `delay`.
    pub fn force_delay(&self, delay: Duration) {
        let mut bucket = self.bucket();
        bucket.tokens = 0;
        bucket.next_refill = Some(Instant::now() + delay);
    }

    pub fn available(&self) -> u32 {
        let mut bucket = self.bucket();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens
    }
}
