use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;

/// One hour.
pub const HOUR: Duration = Duration::from_secs(60 * 60);

/// One day, the chunk size enforced by the remote query backend.
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Milliseconds since the Unix epoch. Times before the epoch clamp to zero.
pub fn unix_millis(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

/// Convert milliseconds since the Unix epoch back to a `SystemTime`.
pub fn from_unix_millis(millis: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis.max(0) as u64)
}

/// Floor a timestamp to the given interval grid.
pub fn align_to_interval(t: SystemTime, interval: Duration) -> SystemTime {
    let step = interval.as_millis() as i64;
    let millis = unix_millis(t);
    from_unix_millis(millis - millis % step)
}

/// Uniformly pick an interval-aligned instant within `[start, end]`.
///
/// Falls back to `start` when the window contains no aligned instant, so
/// the result always stays within the given bounds.
pub fn rand_aligned_between(
    rng: &mut impl Rng,
    start: SystemTime,
    end: SystemTime,
    interval: Duration,
) -> SystemTime {
    let step = interval.as_millis() as i64;
    let lo = (unix_millis(start) + step - 1) / step;
    let hi = unix_millis(end) / step;

    if hi < lo {
        return start;
    }

    from_unix_millis(rng.gen_range(lo..=hi) * step)
}
