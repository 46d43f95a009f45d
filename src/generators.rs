//! Value generators available to templates.
//!
//! Identifiers come in two flavours: random v4 UUIDs and time-ordered ULIDs.
//! ULIDs are rendered in UUID text form so callers always see one format.

use chrono::{SecondsFormat, Utc};
use std::sync::{LazyLock, Mutex};
use ulid::{Generator, Ulid};
use uuid::Uuid;

/// Millisecond precision UTC layout used by `time()` and the dispatcher
/// timestamp headers.
pub const UTC_MILLIS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

static ULID_GENERATOR: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::new()));

/// Kind of identifier produced by `uuid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdKind {
    #[default]
    V4,
    Ulid,
}

impl IdKind {
    /// Parse a kind name. Unknown names fall back to v4.
    pub fn parse(kind: &str) -> Self {
        match kind {
            "ulid" => IdKind::Ulid,
            _ => IdKind::V4,
        }
    }
}

/// Layout used by `time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeFormat {
    #[default]
    Iso8601,
    Rfc3339,
}

impl TimeFormat {
    /// Parse a format name. Unknown names fall back to ISO-8601.
    pub fn parse(format: &str) -> Self {
        match format {
            "rfc3339" => TimeFormat::Rfc3339,
            _ => TimeFormat::Iso8601,
        }
    }
}

/// Generate a new identifier in UUID text form.
pub fn generate_id(kind: IdKind) -> String {
    match kind {
        IdKind::V4 => Uuid::new_v4().to_string(),
        IdKind::Ulid => Uuid::from_u128(next_ulid().0).to_string(),
    }
}

/// Format the current UTC instant.
pub fn generate_time(format: TimeFormat) -> String {
    let now = Utc::now();
    match format {
        TimeFormat::Iso8601 => now.format(UTC_MILLIS_FORMAT).to_string(),
        TimeFormat::Rfc3339 => now.to_rfc3339_opts(SecondsFormat::Secs, true),
    }
}

/// Current instant in the millisecond UTC layout.
pub fn utc_timestamp() -> String {
    generate_time(TimeFormat::Iso8601)
}

fn next_ulid() -> Ulid {
    // Generation only fails when the random part overflows within one millisecond.
    match ULID_GENERATOR.lock() {
        Ok(mut generator) => generator.generate().unwrap_or_else(|_| Ulid::new()),
        Err(poisoned) => poisoned.into_inner().generate().unwrap_or_else(|_| Ulid::new()),
    }
}
