//! Foundational low-level utilities shared across Keeper crates.
//!
//! Provides atomic file-write helpers and time utilities used by ledger
//! persistence, directory-cache expiry, and session timestamps.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, is_expired_unix};

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use super::*;

    #[test]
    fn time_utils_ms_and_seconds_agree() {
        let now_s = current_unix_timestamp();
        let now_ms = current_unix_timestamp_ms();
        let now_ms_s = now_ms / 1_000;
        assert!(now_ms_s >= now_s);
        assert!(now_ms_s <= now_s.saturating_add(1));
    }

    #[test]
    fn is_expired_unix_respects_none_and_bounds() {
        let now = current_unix_timestamp_ms();
        assert!(!is_expired_unix(None, now));
        assert!(is_expired_unix(Some(now), now));
        assert!(is_expired_unix(Some(now.saturating_sub(1)), now));
        assert!(!is_expired_unix(Some(now.saturating_add(1)), now));
    }

    #[test]
    fn write_text_atomic_replaces_existing_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("ledger.json");
        write_text_atomic(&path, "{\"v\":1}").expect("first write");
        write_text_atomic(&path, "{\"v\":2}").expect("second write");
        let contents = read_to_string(&path).expect("read");
        assert_eq!(contents, "{\"v\":2}");
    }

    #[test]
    fn write_text_atomic_creates_missing_parent_dirs() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested/state/ledger.json");
        write_text_atomic(&path, "{}").expect("write");
        assert!(path.exists());
    }
}
