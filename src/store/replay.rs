//! Nonce replay guard.
//!
//! Every validation attempt that reaches this stage is recorded, whether or
//! not it is accepted, so a second presentation of the same nonce always
//! fails. The freshness check and the record insert run in one immediate
//! transaction: two concurrent requests with the same nonce cannot both
//! observe "not seen".

use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::params;
use tracing::debug;

use super::LaunchStore;
use crate::{REPLAY_WINDOW_SECS, Result};

/// Compute the validity floor for a presented timestamp.
///
/// A missing, non-numeric, stale (older than the replay window) or future
/// timestamp forces the floor to 0, which makes the freshness check fail
/// closed: `floor > 0` is required for acceptance.
fn validity_floor(timestamp_raw: &str, now: i64) -> i64 {
    let Ok(timestamp) = timestamp_raw.trim().parse::<i64>() else {
        return 0;
    };
    if timestamp <= 0 {
        return 0;
    }
    let age = now - timestamp;
    if age > REPLAY_WINDOW_SECS as i64 || age < 0 {
        return 0;
    }
    timestamp
}

fn epoch_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl LaunchStore {
    /// Check a (timestamp, nonce) pair for freshness and record the attempt.
    ///
    /// Returns `true` when the nonce was not previously seen within the
    /// replay window and the timestamp is acceptable. The attempt is recorded
    /// either way.
    pub fn check_and_record_nonce(
        &self,
        timestamp_raw: &str,
        nonce: &str,
        username: Option<&str>,
    ) -> Result<bool> {
        self.check_and_record_nonce_at(timestamp_raw, nonce, username, epoch_now())
    }

    /// Clock-injectable variant of [`check_and_record_nonce`](Self::check_and_record_nonce).
    pub fn check_and_record_nonce_at(
        &self,
        timestamp_raw: &str,
        nonce: &str,
        username: Option<&str>,
        now: i64,
    ) -> Result<bool> {
        let floor = validity_floor(timestamp_raw, now);
        let recorded_timestamp = timestamp_raw.trim().parse::<i64>().unwrap_or(0);
        // Any earlier record still inside the window blocks the nonce, no
        // matter which timestamp it was recorded with.
        let window_start = now - REPLAY_WINDOW_SECS as i64;

        self.in_immediate_tx(|conn| {
            let seen: i64 = conn.query_row(
                "SELECT COUNT(*) FROM replay_nonces WHERE nonce = ?1 AND timestamp >= ?2",
                params![nonce, window_start],
                |row| row.get(0),
            )?;

            conn.execute(
                "INSERT INTO replay_nonces (username, timestamp, nonce) VALUES (?1, ?2, ?3)",
                params![username, recorded_timestamp, nonce],
            )?;

            let valid = seen == 0 && floor > 0;
            if !valid {
                debug!(nonce, floor, seen, "Nonce rejected");
            }
            Ok(valid)
        })
    }

    /// Delete replay records older than the window. Housekeeping only: the
    /// freshness check is correct without pruning, this just bounds storage.
    pub fn prune_replay_records(&self) -> Result<usize> {
        let cutoff = epoch_now() - REPLAY_WINDOW_SECS as i64;
        self.in_immediate_tx(|conn| {
            let deleted = conn.execute(
                "DELETE FROM replay_nonces WHERE timestamp < ?1",
                params![cutoff],
            )?;
            Ok(deleted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn nonce() -> String {
        // 20-char minimum per the OAuth1 length rule
        "abcdefghij0123456789".to_string()
    }

    #[test]
    fn fresh_nonce_is_accepted_once() {
        // GIVEN: an empty replay table
        let store = LaunchStore::memory().unwrap();
        let ts = NOW.to_string();

        // WHEN: the same (nonce, timestamp) is presented twice
        let first = store
            .check_and_record_nonce_at(&ts, &nonce(), None, NOW)
            .unwrap();
        let second = store
            .check_and_record_nonce_at(&ts, &nonce(), None, NOW)
            .unwrap();

        // THEN: only the first presentation passes
        assert!(first);
        assert!(!second);
    }

    #[test]
    fn replay_with_different_valid_timestamp_is_rejected() {
        let store = LaunchStore::memory().unwrap();
        let accepted = store
            .check_and_record_nonce_at(&NOW.to_string(), &nonce(), None, NOW)
            .unwrap();
        assert!(accepted);

        // Same nonce, different timestamp still inside the window
        let replayed = store
            .check_and_record_nonce_at(&(NOW + 10).to_string(), &nonce(), None, NOW + 10)
            .unwrap();
        assert!(!replayed);
    }

    #[test]
    fn nonce_is_reusable_after_the_window_expires() {
        let store = LaunchStore::memory().unwrap();
        let accepted = store
            .check_and_record_nonce_at(&NOW.to_string(), &nonce(), None, NOW)
            .unwrap();
        assert!(accepted);

        // The old record has aged out of the window by now
        let later = NOW + REPLAY_WINDOW_SECS as i64 + 1;
        let reused = store
            .check_and_record_nonce_at(&later.to_string(), &nonce(), None, later)
            .unwrap();
        assert!(reused);
    }

    #[test]
    fn stale_timestamp_fails_closed() {
        let store = LaunchStore::memory().unwrap();
        let stale = (NOW - REPLAY_WINDOW_SECS as i64 - 1).to_string();
        let valid = store
            .check_and_record_nonce_at(&stale, &nonce(), None, NOW)
            .unwrap();
        assert!(!valid);
    }

    #[test]
    fn future_timestamp_fails_closed() {
        let store = LaunchStore::memory().unwrap();
        let future = (NOW + 60).to_string();
        let valid = store
            .check_and_record_nonce_at(&future, &nonce(), None, NOW)
            .unwrap();
        assert!(!valid);
    }

    #[test]
    fn non_numeric_timestamp_fails_closed() {
        let store = LaunchStore::memory().unwrap();
        let valid = store
            .check_and_record_nonce_at("not-a-number", &nonce(), None, NOW)
            .unwrap();
        assert!(!valid);
    }

    #[test]
    fn rejected_attempt_still_burns_the_nonce() {
        // GIVEN: a rejected attempt (future timestamp)
        let store = LaunchStore::memory().unwrap();
        let rejected = store
            .check_and_record_nonce_at(&(NOW + 60).to_string(), &nonce(), None, NOW)
            .unwrap();
        assert!(!rejected);

        // WHEN: the same nonce arrives later with a valid timestamp
        let retried = store
            .check_and_record_nonce_at(&(NOW + 60).to_string(), &nonce(), None, NOW + 60)
            .unwrap();

        // THEN: the earlier record still blocks it
        assert!(!retried);
    }

    #[test]
    fn validity_floor_rules() {
        assert_eq!(validity_floor(&NOW.to_string(), NOW), NOW);
        assert_eq!(validity_floor("", NOW), 0);
        assert_eq!(validity_floor("abc", NOW), 0);
        assert_eq!(validity_floor("0", NOW), 0);
        assert_eq!(validity_floor(&(NOW + 1).to_string(), NOW), 0);
        let edge = NOW - REPLAY_WINDOW_SECS as i64;
        assert_eq!(validity_floor(&edge.to_string(), NOW), edge);
        assert_eq!(validity_floor(&(edge - 1).to_string(), NOW), 0);
    }

    #[test]
    fn prune_removes_only_old_records() {
        let store = LaunchStore::memory().unwrap();
        let now = epoch_now();

        // One fresh, one ancient
        store
            .check_and_record_nonce_at(&now.to_string(), "fresh-nonce-0123456789", None, now)
            .unwrap();
        store
            .check_and_record_nonce_at("12345", "ancient-nonce-0123456789", None, now)
            .unwrap();

        let deleted = store.prune_replay_records().unwrap();
        assert_eq!(deleted, 1);
    }
}
