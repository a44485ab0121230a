use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// All timestamps in the data model (`createdAt`, `expiresAt`, ...) are
/// stored this way — monotonic wall-clock milliseconds — mirroring
/// `crates/cron`'s `*_ms` fields rather than pulling in `chrono::DateTime`
/// for a value that's only ever compared and serialized, never formatted.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
