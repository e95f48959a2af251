//! Job and record identifiers.
//!
//! Ids are ULIDs: a millisecond timestamp plus a random suffix, which keeps
//! them globally unique, caller-opaque, and lexicographically time-ordered.
//! The queue relies on the time-ordering only for human inspection; FIFO
//! dequeue ordering comes from the stored `created_at` field.

use once_cell::sync::Lazy;
use ulid::Ulid;

/// Process-level run id, generated once at first access. Worker binaries
/// attach it to their logs so overlapping sweeper instances can be told
/// apart.
static RUN_ID: Lazy<String> = Lazy::new(|| Ulid::new().to_string());

#[inline]
pub fn process_run_id() -> &'static str {
    &RUN_ID
}

/// Generates a fresh job id. 26 characters, URL-safe.
#[inline]
pub fn new_job_id() -> String {
    Ulid::new().to_string()
}
