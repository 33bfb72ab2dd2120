//! # Expiration clock (C8)
//!
//! A coarse, second-granularity realtime clock refreshed by a 1 Hz timer
//! task. All expiration checks read it with a relaxed load (spec.md §4.5);
//! the timer never blocks partition operations and reschedules itself
//! regardless of errors.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Exptimes at or below this many seconds are interpreted as relative to
/// `now_seconds`; above it, they are absolute Unix timestamps (spec.md §4.6,
/// §8 boundary behavior: `30*86400` is relative, `30*86400 + 1` is
/// absolute).
pub const THIRTY_DAYS_SECONDS: u32 = 30 * 86_400;

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// The shared expiration clock, read by every partition on every bucket
/// walk.
pub struct ExpirationClock {
    now_seconds: AtomicU32,
}

impl ExpirationClock {
    /// Build a clock initialized to the current wall-clock time.
    pub fn new() -> Self {
        ExpirationClock {
            now_seconds: AtomicU32::new(unix_now()),
        }
    }

    /// Current coarse time, read with a relaxed load.
    pub fn now(&self) -> u32 {
        self.now_seconds.load(Ordering::Relaxed)
    }

    /// Refresh to the current wall-clock time. Called once per tick by the
    /// 1 Hz timer task.
    pub fn refresh(&self) {
        self.now_seconds.store(unix_now(), Ordering::Relaxed);
    }

    /// Run the 1 Hz refresh loop until `shutdown` resolves. Reschedules
    /// regardless of any error, since there is nothing it could do about a
    /// clock read failure other than keep the previous value.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

impl Default for ExpirationClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a client-supplied `exptime` against `now`, per spec.md §4.6: a
/// value `<= THIRTY_DAYS_SECONDS` is relative (added to `now`); `0` means
/// never expire; anything larger is already an absolute timestamp.
pub fn resolve_exptime(raw: i64, now: u32) -> u32 {
    if raw == 0 {
        0
    } else if raw < 0 {
        // Already-expired sentinel used by some clients to force immediate
        // expiry; clamp to "expired as of now".
        now.saturating_sub(1).max(1)
    } else if raw as u64 <= THIRTY_DAYS_SECONDS as u64 {
        now.saturating_add(raw as u32)
    } else {
        raw as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_exptime_is_added_to_now() {
        assert_eq!(resolve_exptime(60, 1_000), 1_060);
    }

    #[test]
    fn boundary_exptime_is_relative() {
        assert_eq!(resolve_exptime(THIRTY_DAYS_SECONDS as i64, 1_000), 1_000 + THIRTY_DAYS_SECONDS);
    }

    #[test]
    fn just_past_boundary_is_absolute() {
        let raw = THIRTY_DAYS_SECONDS as i64 + 1;
        assert_eq!(resolve_exptime(raw, 1_000), raw as u32);
    }

    #[test]
    fn zero_means_never() {
        assert_eq!(resolve_exptime(0, 1_000), 0);
    }
}
