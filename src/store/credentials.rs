//! Credential store: the single active consumer key/secret pair.
//!
//! "Set once" is enforced by the schema (the `keysecret` row id is pinned to
//! 1), not by a read-then-write check, so concurrent seeding attempts cannot
//! race their way into two active credentials.

use rusqlite::{OptionalExtension, params};
use tracing::{info, warn};

use super::LaunchStore;
use crate::Result;

/// The active OAuth1 signing credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningCredential {
    /// Consumer key presented by the LMS
    pub consumer_key: String,
    /// Shared secret used to verify signatures
    pub secret: String,
}

impl LaunchStore {
    /// Store the consumer credential if none exists yet.
    ///
    /// Adding a second credential is an idempotent no-op: the original pair
    /// is left unchanged and a warning is logged.
    pub fn ensure_credential(&self, consumer_key: &str, secret: &str) -> Result<()> {
        self.in_immediate_tx(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO keysecret (key_secret_id, key_value, secret)
                 VALUES (1, ?1, ?2)",
                params![consumer_key, secret],
            )?;

            if inserted == 0 {
                let existing: String = conn.query_row(
                    "SELECT key_value FROM keysecret WHERE key_secret_id = 1",
                    [],
                    |row| row.get(0),
                )?;
                if existing == consumer_key {
                    info!("Consumer credential already stored");
                } else {
                    warn!(
                        presented_key = consumer_key,
                        "Ignoring attempt to replace the active consumer credential"
                    );
                }
            } else {
                info!(consumer_key, "Stored active consumer credential");
            }
            Ok(())
        })
    }

    /// Fetch the active credential, `None` when unset.
    pub fn credential(&self) -> Result<Option<SigningCredential>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT key_value, secret FROM keysecret WHERE key_secret_id = 1",
                [],
                |row| {
                    Ok(SigningCredential {
                        consumer_key: row.get(0)?,
                        secret: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn credential_absent_until_seeded() {
        let store = LaunchStore::memory().unwrap();
        assert_eq!(store.credential().unwrap(), None);
    }

    #[test]
    fn seeded_credential_is_readable() {
        let store = LaunchStore::memory().unwrap();
        store.ensure_credential("key-1", "secret-1").unwrap();

        let cred = store.credential().unwrap().unwrap();
        assert_eq!(cred.consumer_key, "key-1");
        assert_eq!(cred.secret, "secret-1");
    }

    #[test]
    fn second_credential_is_ignored() {
        // GIVEN: an active credential
        let store = LaunchStore::memory().unwrap();
        store.ensure_credential("key-1", "secret-1").unwrap();

        // WHEN: a different pair is offered
        store.ensure_credential("key-2", "secret-2").unwrap();

        // THEN: the original pair is unchanged
        let cred = store.credential().unwrap().unwrap();
        assert_eq!(cred.consumer_key, "key-1");
        assert_eq!(cred.secret, "secret-1");
    }

    #[test]
    fn reseeding_same_credential_is_idempotent() {
        let store = LaunchStore::memory().unwrap();
        store.ensure_credential("key-1", "secret-1").unwrap();
        store.ensure_credential("key-1", "secret-1").unwrap();
        assert!(store.credential().unwrap().is_some());
    }
}
