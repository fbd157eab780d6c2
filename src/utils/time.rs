use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Wall clock in milliseconds, used for node ctime/mtime
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Round `millis` up to the next multiple of `interval`
pub(crate) fn round_up_to_interval(
    millis: u64,
    interval: u64,
) -> u64 {
    if interval == 0 {
        return millis;
    }
    (millis / interval + 1) * interval
}

pub(crate) fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}
