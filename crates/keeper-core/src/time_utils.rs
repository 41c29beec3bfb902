//! Unix-time helpers. Keeper timestamps everything in milliseconds (ledger
//! records, directory builds, capture-session prompts); the seconds variant
//! exists for coarse fields only.

/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns the current Unix timestamp in seconds.
pub fn current_unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Returns true when `expires_unix_ms` is present and no longer in the
/// future. `None` means "never expires", which is how callers model
/// directory entries without a TTL.
pub fn is_expired_unix(expires_unix_ms: Option<u64>, now_unix_ms: u64) -> bool {
    matches!(expires_unix_ms, Some(value) if value <= now_unix_ms)
}
