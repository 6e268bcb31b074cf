//! Sliding-window per-user rate accounting.
//!
//! Two windows per user: a hard one-second cap and a wider rolling-minute
//! cap. Timestamp vectors grow as requests arrive and shrink during
//! amortized cleanup, which also sweeps users that have gone quiet so the
//! table cannot grow without bound as users churn.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::FabricError;

const SECOND_WINDOW: Duration = Duration::from_millis(1000);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Cap within any rolling second.
    pub max_per_second: usize,
    /// Cap within the retention window.
    pub max_per_minute: usize,
    /// Retention window for the per-minute count.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_per_second: 100,
            max_per_minute: 1000,
            window: Duration::from_millis(60_000),
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: HashMap<String, Vec<Instant>>,
    last_cleanup: Instant,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: HashMap::new(),
            last_cleanup: Instant::now(),
        }
    }

    /// Whether `user_id` may proceed; records the request when allowed.
    pub fn is_allowed(&mut self, user_id: &str) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_cleanup) >= CLEANUP_INTERVAL {
            self.sweep_at(now);
        }

        let bucket = self.buckets.entry(user_id.to_string()).or_default();

        let last_second = bucket
            .iter()
            .filter(|ts| now.duration_since(**ts) < SECOND_WINDOW)
            .count();
        if last_second >= self.config.max_per_second {
            return false;
        }
        if bucket.len() >= self.config.max_per_minute {
            return false;
        }

        bucket.push(now);
        true
    }

    /// [`Self::is_allowed`] with an error on denial.
    pub fn check_and_record(&mut self, user_id: &str) -> Result<(), FabricError> {
        if self.is_allowed(user_id) {
            Ok(())
        } else {
            Err(FabricError::RateLimited(user_id.to_string()))
        }
    }

    /// Drop expired timestamps everywhere and forget idle users.
    pub fn sweep(&mut self) {
        self.sweep_at(Instant::now());
    }

    fn sweep_at(&mut self, now: Instant) {
        let window = self.config.window;
        for bucket in self.buckets.values_mut() {
            bucket.retain(|ts| now.duration_since(*ts) < window);
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        self.last_cleanup = now;
    }

    pub fn clear_user(&mut self, user_id: &str) {
        self.buckets.remove(user_id);
    }

    pub fn clear_all(&mut self) {
        self.buckets.clear();
    }

    /// Users currently holding a bucket.
    pub fn tracked_users(&self) -> usize {
        self.buckets.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
