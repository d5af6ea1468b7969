use std::time::{Duration, SystemTime};

use rand::Rng;

use super::MetricHistory;
use crate::clock::{rand_aligned_between, DAY, HOUR};

/// An inclusive `[start, end]` range query window.
pub type TimeRange = (SystemTime, SystemTime);

/// Reasons the planner can decline to produce queries. Neither is an
/// operational failure: the caller skips the query phase for this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("no sample history to query against")]
    NoHistory,

    #[error("sample history is older than the maximum query age")]
    HistoryStale,
}

/// Plan the range-query windows and instant-query timestamps for a tick.
///
/// Windows are intersections of fixed horizons (last 1h, last 24h, the
/// 23h-24h boundary) with the validated `[query_min_time, query_max_time]`
/// window, plus one randomized sub-range. Horizons already covered by a
/// shorter one are dropped rather than duplicated.
pub fn get_query_time_ranges(
    now: SystemTime,
    history: &MetricHistory,
    max_query_age: Duration,
    write_interval: Duration,
    rng: &mut impl Rng,
) -> Result<(Vec<TimeRange>, Vec<SystemTime>), PlanError> {
    let (min_time, max_time) = match (history.query_min_time, history.query_max_time) {
        (Some(min_time), Some(max_time)) => (min_time, max_time),
        _ => return Err(PlanError::NoHistory),
    };

    // Clamp the validated window to what the backend still serves.
    let query_start = min_time.max(now - max_query_age);
    let query_end = max_time.min(now);
    if query_end < query_start {
        return Err(PlanError::HistoryStale);
    }

    let mut ranges = Vec::with_capacity(4);
    let mut instants = Vec::with_capacity(3);

    // Last 1h.
    if query_end > now - HOUR {
        ranges.push((query_start.max(now - HOUR), query_end));
        instants.push(query_end);
    }

    // Last 24h, unless the last-1h window already covers it.
    if query_end > now - DAY && query_start < now - HOUR {
        ranges.push((query_start.max(now - DAY), query_end));
        instants.push(query_start.max(now - DAY));
    }

    // Crossing the 24h boundary, where the query backend splits queries.
    if query_start < now - DAY && query_end > now - DAY + HOUR {
        ranges.push((now - DAY, query_end.min(now - DAY + HOUR)));
    }

    // A random sub-range of the validated window.
    let rand_start = rand_aligned_between(rng, query_start, query_end, write_interval);
    let rand_end = rand_aligned_between(rng, rand_start, query_end, write_interval);
    ranges.push((rand_start, rand_end));
    instants.push(rand_aligned_between(rng, rand_start, rand_end, write_interval));

    Ok((ranges, instants))
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    const MAX_QUERY_AGE: Duration = Duration::from_secs(2 * 24 * 60 * 60);
    const WRITE_INTERVAL: Duration = Duration::from_secs(20);
    const MINUTE: Duration = Duration::from_secs(60);

    fn now() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(10 * 24 * 60 * 60 + 2)
    }

    fn history(min_offset: Duration, max_offset: Duration) -> MetricHistory {
        MetricHistory {
            last_written_timestamp: Some(now() - max_offset),
            query_min_time: Some(now() - min_offset),
            query_max_time: Some(now() - max_offset),
        }
    }

    fn plan(
        history: &MetricHistory,
        max_query_age: Duration,
    ) -> Result<(Vec<TimeRange>, Vec<SystemTime>), PlanError> {
        let mut rng = StdRng::seed_from_u64(42);
        get_query_time_ranges(now(), history, max_query_age, WRITE_INTERVAL, &mut rng)
    }

    fn assert_random_within(
        ranges: &[TimeRange],
        instants: &[SystemTime],
        history: &MetricHistory,
    ) {
        let min_time = history.query_min_time.expect("min set");
        let max_time = history.query_max_time.expect("max set");

        let (rand_start, rand_end) = ranges[ranges.len() - 1];
        assert!(rand_start >= min_time && rand_start <= max_time);
        assert!(rand_end >= rand_start && rand_end <= max_time);

        let rand_instant = instants[instants.len() - 1];
        assert!(rand_instant >= min_time && rand_instant <= max_time);
    }

    #[test]
    fn test_no_history() {
        let result = plan(&MetricHistory::default(), MAX_QUERY_AGE);
        assert_eq!(result, Err(PlanError::NoHistory));
    }

    #[test]
    fn test_history_older_than_max_age() {
        let history = history(MAX_QUERY_AGE + MINUTE, MAX_QUERY_AGE + MINUTE);
        let result = plan(&history, MAX_QUERY_AGE);
        assert_eq!(result, Err(PlanError::HistoryStale));
    }

    #[test]
    fn test_min_equals_max() {
        let history = history(MINUTE, MINUTE);
        let (ranges, instants) = plan(&history, MAX_QUERY_AGE).expect("planner should succeed");

        // The last-1h and random entries collapse onto the same point but
        // are both still emitted.
        assert_eq!(
            ranges,
            vec![
                (now() - MINUTE, now() - MINUTE),
                (now() - MINUTE, now() - MINUTE),
            ],
        );
        assert_eq!(instants, vec![now() - MINUTE, now() - MINUTE]);
    }

    #[test]
    fn test_window_within_last_1h() {
        let history = history(30 * MINUTE, MINUTE);
        let (ranges, instants) = plan(&history, MAX_QUERY_AGE).expect("planner should succeed");

        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0], (now() - 30 * MINUTE, now() - MINUTE));

        assert_eq!(instants.len(), 2);
        assert_eq!(instants[0], now() - MINUTE);

        assert_random_within(&ranges, &instants, &history);
    }

    #[test]
    fn test_window_within_last_2h() {
        let history = history(90 * MINUTE, 80 * MINUTE);
        let (ranges, instants) = plan(&history, MAX_QUERY_AGE).expect("planner should succeed");

        // Only the last-24h window applies: the newest validated sample is
        // already older than 1h.
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0], (now() - 90 * MINUTE, now() - 80 * MINUTE));

        assert_eq!(instants.len(), 2);
        assert_eq!(instants[0], now() - 90 * MINUTE);

        assert_random_within(&ranges, &instants, &history);
    }

    #[test]
    fn test_min_older_than_24h() {
        let history = history(30 * HOUR, MINUTE);
        let (ranges, instants) = plan(&history, MAX_QUERY_AGE).expect("planner should succeed");

        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0], (now() - HOUR, now() - MINUTE));
        assert_eq!(ranges[1], (now() - DAY, now() - MINUTE));
        assert_eq!(ranges[2], (now() - DAY, now() - DAY + HOUR));

        assert_eq!(instants.len(), 3);
        assert_eq!(instants[0], now() - MINUTE);
        assert_eq!(instants[1], now() - DAY);

        assert_random_within(&ranges, &instants, &history);
    }

    #[test]
    fn test_max_older_than_24h_but_within_max_age() {
        let history = history(30 * HOUR, 25 * HOUR);
        let (ranges, instants) = plan(&history, MAX_QUERY_AGE).expect("planner should succeed");

        // Every fixed horizon misses the window; only the random range and
        // instant remain.
        assert_eq!(ranges.len(), 1);
        assert_eq!(instants.len(), 1);

        assert_random_within(&ranges, &instants, &history);
    }

    #[test]
    fn test_min_older_than_24h_with_10m_max_age() {
        let history = history(30 * HOUR, MINUTE);
        let (ranges, instants) =
            plan(&history, 10 * MINUTE).expect("planner should succeed");

        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0], (now() - 10 * MINUTE, now() - MINUTE));

        assert_eq!(instants.len(), 2);
        assert_eq!(instants[0], now() - MINUTE);

        assert_random_within(&ranges, &instants, &history);
    }
}
