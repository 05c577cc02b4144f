//! Rate limiting for calls into the external audit service
//!
//! The audit provider enforces per-minute and per-hour quotas. Exceeding
//! them is a transient condition, so `acquire` delays instead of failing:
//! callers block until issuing one more request fits both windows.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Per-campaign rate limit settings, snapshotted at campaign creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 10,
            requests_per_hour: 200,
        }
    }
}

/// One fixed window: a counter that resets when its interval elapses
#[derive(Debug)]
struct Window {
    capacity: u32,
    length: Duration,
    count: u32,
    resets_at: Instant,
}

impl Window {
    fn new(capacity: u32, length: Duration) -> Self {
        Self {
            capacity,
            length,
            count: 0,
            resets_at: Instant::now() + length,
        }
    }

    /// Roll the window forward if its interval has elapsed
    fn refresh(&mut self, now: Instant) {
        if now >= self.resets_at {
            self.count = 0;
            self.resets_at = now + self.length;
        }
    }

    fn has_room(&self) -> bool {
        self.count < self.capacity
    }
}

/// Blocks callers until one more audit request fits the minute and hour
/// quotas. Safe under concurrent workers; counters are process-local.
pub struct RateLimiter {
    enabled: bool,
    windows: Mutex<(Window, Window)>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_windows(
            config.enabled,
            config.requests_per_minute,
            MINUTE,
            config.requests_per_hour,
            HOUR,
        )
    }

    /// Construct with explicit window lengths (tests use short windows)
    pub fn with_windows(
        enabled: bool,
        per_minute: u32,
        minute_len: Duration,
        per_hour: u32,
        hour_len: Duration,
    ) -> Self {
        Self {
            enabled,
            windows: Mutex::new((
                Window::new(per_minute, minute_len),
                Window::new(per_hour, hour_len),
            )),
        }
    }

    /// Wait until one more request is admissible, then count it.
    ///
    /// When a window is saturated we sleep until the nearest relevant
    /// reset and then re-check from scratch: the other window may have
    /// drained in the meantime, and recomputing avoids over-waiting.
    pub async fn acquire(&self) {
        if !self.enabled {
            return;
        }

        loop {
            let wait_until = {
                let mut guard = self.windows.lock().await;
                let (minute, hour) = &mut *guard;
                let now = Instant::now();
                minute.refresh(now);
                hour.refresh(now);

                if minute.has_room() && hour.has_room() {
                    minute.count += 1;
                    hour.count += 1;
                    return;
                }

                // Wait for the nearest saturated window to reset; the
                // re-check on wake handles the case where the other
                // window is still full at that point.
                if !minute.has_room() && !hour.has_room() {
                    minute.resets_at.min(hour.resets_at)
                } else if !minute.has_room() {
                    minute.resets_at
                } else {
                    hour.resets_at
                }
            };

            tracing::debug!(
                wait_ms = wait_until.saturating_duration_since(Instant::now()).as_millis() as u64,
                "rate limit reached, waiting for window reset"
            );
            tokio::time::sleep_until(wait_until).await;
        }
    }
}
