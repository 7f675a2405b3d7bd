/// Identifier and clock helpers

use uuid::Uuid;

/// Returns the current time as epoch seconds
pub type TimeSource = fn() -> u64;

/// Generates a new time-ordered identifier
///
/// UUIDv7 strings sort by creation time, which keeps `ORDER BY id` meaningful.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Wall-clock epoch seconds
pub fn system_time() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
