//! Per-username login attempt limiting.
//!
//! The window slides forward on every attempt inside it, not just on the
//! first: hammering the endpoint keeps a user locked out until they back off
//! for a full window.

use std::collections::HashMap;

use time::{Duration, OffsetDateTime};
use tracing::debug;

// Entries whose window has fully elapsed are pruned once the map grows past
// this many usernames.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone)]
struct Attempt {
    count: u32,
    last_time: OffsetDateTime,
}

#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    attempts: HashMap<String, Attempt>,
}

impl RateLimiter {
    pub fn new(limit: u32, window_secs: u64) -> Self {
        Self {
            limit,
            window: Duration::seconds(window_secs as i64),
            attempts: HashMap::new(),
        }
    }

    /// Record an attempt and report whether the limit is now exceeded.
    pub fn check_limit_exceeded(&mut self, username: &str) -> bool {
        self.check_limit_exceeded_at(username, OffsetDateTime::now_utc())
    }

    pub fn check_limit_exceeded_at(&mut self, username: &str, now: OffsetDateTime) -> bool {
        self.increment_at(username, now);
        let attempt = &self.attempts[username];
        if attempt.count > self.limit {
            debug!(username, count = attempt.count, "rate limit exceeded");
            return true;
        }
        false
    }

    fn increment_at(&mut self, username: &str, now: OffsetDateTime) {
        if self.attempts.len() > PRUNE_THRESHOLD {
            self.prune(now);
        }

        let Some(attempt) = self.attempts.get_mut(username) else {
            self.attempts.insert(
                username.to_string(),
                Attempt {
                    count: 1,
                    last_time: now,
                },
            );
            return;
        };

        if now - attempt.last_time > self.window {
            attempt.count = 1;
        } else {
            attempt.count += 1;
        }
        attempt.last_time = now;
    }

    fn prune(&mut self, now: OffsetDateTime) {
        let window = self.window;
        let before = self.attempts.len();
        self.attempts.retain(|_, attempt| now - attempt.last_time <= window);
        debug!(before, after = self.attempts.len(), "pruned stale rate limit entries");
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.attempts.len()
    }
}
