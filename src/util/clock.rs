//! Wall-clock helpers. All timestamps in this crate are milliseconds since the
//! Unix epoch, matching the `deadline_ms` convention of task specs.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Time left until `deadline_ms`, or `None` if it has already passed.
#[must_use]
pub fn remaining_until(deadline_ms: u128, now_ms: u128) -> Option<Duration> {
    if deadline_ms <= now_ms {
        return None;
    }
    let millis = u64::try_from(deadline_ms - now_ms).unwrap_or(u64::MAX);
    Some(Duration::from_millis(millis))
}
