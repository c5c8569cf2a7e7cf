use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Minimum spacing between two consecutive grants.
    pub min_interval: Duration,
}

impl RateLimitConfig {
    pub fn reddit_default() -> Self {
        Self {
            min_interval: Duration::from_secs(2), // Stay well under the unauthenticated budget
        }
    }

    pub fn with_interval(min_interval: Duration) -> Self {
        Self { min_interval }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::reddit_default()
    }
}

/// Global floor on the outbound request rate.
///
/// One instance is shared by every task that talks to Reddit. Grants are
/// handed out one at a time in arrival order (tokio's mutex is fair), and no
/// two grants are closer together than `min_interval`.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    /// Held by the caller whose turn it is, including its spacing sleep.
    queue: Mutex<()>,
    /// Only locked for a read or a write, never across an await.
    last_grant: StdMutex<Option<Instant>>,
    total_grants: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            queue: Mutex::new(()),
            last_grant: StdMutex::new(None),
            total_grants: AtomicU64::new(0),
        }
    }

    fn last_grant(&self) -> Option<Instant> {
        *self.last_grant.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn acquire(&self) -> RateLimitPermit {
        let start_time = Instant::now();

        // Waiters queue behind whoever is sleeping out the spacing
        let _turn = self.queue.lock().await;
        if let Some(previous) = self.last_grant() {
            let ready_at = previous + self.config.min_interval;
            if ready_at > Instant::now() {
                tracing::debug!(
                    "Rate limit spacing, waiting {:?}",
                    ready_at.saturating_duration_since(Instant::now())
                );
                sleep_until(ready_at).await;
            }
        }

        let granted_at = Instant::now();
        *self.last_grant.lock().unwrap_or_else(PoisonError::into_inner) = Some(granted_at);
        self.total_grants.fetch_add(1, Ordering::Relaxed);

        RateLimitPermit {
            granted_at,
            queue_wait_time: start_time.elapsed(),
        }
    }

    /// Snapshot of the limiter. Never waits on a pending `acquire`.
    pub fn status(&self) -> RateLimitStatus {
        let last_grant = self.last_grant();
        let now = Instant::now();
        let last_grant_age = last_grant.map(|at| now.saturating_duration_since(at));
        let next_grant_in = last_grant
            .map(|at| (at + self.config.min_interval).saturating_duration_since(now))
            .unwrap_or_default();

        RateLimitStatus {
            min_interval: self.config.min_interval,
            total_grants: self.total_grants.load(Ordering::Relaxed),
            last_grant_age,
            next_grant_in,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.config.min_interval
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitPermit {
    pub granted_at: Instant,
    pub queue_wait_time: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub min_interval: Duration,
    pub total_grants: u64,
    pub last_grant_age: Option<Duration>,
    pub next_grant_in: Duration,
}

impl RateLimitStatus {
    pub fn is_ready(&self) -> bool {
        self.next_grant_in.is_zero()
    }
}
