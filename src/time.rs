//! Time / validity helper.
//!
//! All absolute timestamps are Unix seconds. Wall clock is read once at the
//! start of an acquisition attempt and never re-read mid-flight, so that
//! `lock_still_valid` measures exactly the round-trip the caller paid for.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// An absolute Unix timestamp (seconds) after which a node unilaterally
/// releases a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Expireat(pub i64);

impl Expireat {
    pub fn as_secs(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Expireat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs() as i64
}

/// Wall-clock time as seconds since the Unix epoch, with sub-second
/// resolution (the source [`crate::handle::Handle::new`] stamps queue item
/// handles with, matching the Python `time.time()` source this was ported
/// from).
pub(crate) fn wall_time_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs_f64()
}

/// Record the wall-clock instant before any node I/O and compute the
/// absolute expiry the lease should carry.
///
/// Returns `(t_start, t_expireat)`.
pub fn expireat(timeout: Duration) -> (i64, Expireat) {
    let t_start = now_unix();
    (t_start, Expireat(t_start + timeout.as_secs() as i64))
}

/// `timeout / 5`, named because both `Lock` and `Queue` and the background
/// extender all need the same figure.
pub fn polling_interval(timeout: Duration) -> Duration {
    timeout / 5
}

/// True iff the lease is still usable after accounting for the polling
/// interval and clock drift: `now() + polling_interval + clock_drift < expireat`.
///
/// Computed in sub-second floating point (not truncated to whole seconds)
/// so a `clock_drift` or `polling_interval` under one second (e.g. a
/// `timeout` not divisible by 5) still shrinks the usable lease window by
/// its full amount, rather than being rounded away to zero.
///
/// A caller that acquires a quorum but finds this false must treat the
/// acquisition as failed and release what it got.
pub fn lock_still_valid(expireat: Expireat, clock_drift: Duration, polling_interval: Duration) -> bool {
    let headroom = polling_interval.as_secs_f64() + clock_drift.as_secs_f64();
    wall_time_f64() + headroom < expireat.as_secs() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expireat_is_timeout_seconds_in_the_future() {
        let (t_start, t_expireat) = expireat(Duration::from_secs(5));
        assert_eq!(t_expireat.as_secs(), t_start + 5);
    }

    #[test]
    fn polling_interval_is_one_fifth_of_timeout() {
        assert_eq!(polling_interval(Duration::from_secs(5)), Duration::from_secs(1));
        assert_eq!(polling_interval(Duration::from_secs(10)), Duration::from_secs(2));
    }

    #[test]
    fn lock_still_valid_rejects_a_lease_consumed_by_the_round_trip() {
        let (_, expireat) = self::expireat(Duration::from_secs(5));
        // polling_interval + clock_drift larger than the remaining lease.
        assert!(!lock_still_valid(expireat, Duration::from_secs(10), Duration::from_secs(10)));
    }

    #[test]
    fn lock_still_valid_accepts_a_fresh_lease() {
        let (_, expireat) = self::expireat(Duration::from_secs(5));
        assert!(lock_still_valid(expireat, Duration::ZERO, Duration::from_secs(1)));
    }

    #[test]
    fn lock_still_valid_honors_sub_second_clock_drift() {
        // `t_start` truncates to whole seconds, so the true remaining time
        // on an expiry `t_start + 2` is somewhere in (1, 2] seconds: picking
        // margins outside that uncertainty window keeps the assertions
        // robust regardless of where `now_unix()` landed mid-second.
        let t_start = now_unix();
        let expireat = Expireat(t_start + 2);
        assert!(lock_still_valid(expireat, Duration::from_millis(500), Duration::ZERO));
        assert!(!lock_still_valid(expireat, Duration::from_millis(2500), Duration::ZERO));
    }

    #[test]
    fn lock_still_valid_honors_a_polling_interval_not_divisible_into_whole_seconds() {
        // timeout=7 -> polling_interval=1.4s, which a whole-seconds headroom
        // would truncate to 1s and silently grant an extra 400ms of validity.
        let interval = polling_interval(Duration::from_secs(7));
        let (t_start, _) = self::expireat(Duration::ZERO);
        let expireat = Expireat(t_start + 1);
        assert!(!lock_still_valid(expireat, Duration::ZERO, interval));
    }
}
