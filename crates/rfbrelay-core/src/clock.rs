//! Wall-clock helpers shared by the recorder and the player.

use std::time::Duration;

use time::OffsetDateTime;

/// Current wall-clock time as nanoseconds since the Unix epoch.
#[must_use]
pub fn unix_nanos() -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos()).unwrap_or(i64::MAX)
}

/// Span between two nanosecond timestamps, clamped at zero.
#[must_use]
pub fn nanos_between(earlier: i64, later: i64) -> Duration {
    let delta = later.saturating_sub(earlier).max(0);
    Duration::from_nanos(u64::try_from(delta).unwrap_or(0))
}
