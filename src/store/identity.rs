//! Identity store: LMS user id to stable local account name.
//!
//! Local names are allocated sequentially as `user-N`. Allocation runs
//! inside an immediate transaction, and a UNIQUE violation (another launch
//! won the race between our BEGIN and the insert on a different connection)
//! is recovered by re-fetching, so resolution is idempotent under
//! concurrent first launches.

use rusqlite::{OptionalExtension, params};
use tracing::info;

use super::{LaunchStore, is_constraint_violation};
use crate::{Error, Result};

impl LaunchStore {
    /// Resolve an external LMS user id to its local account name, creating
    /// the mapping on first sight. Existing mappings are never renamed.
    pub fn resolve_or_create_user(&self, external_id: &str) -> Result<String> {
        let resolved = self.in_immediate_tx(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT unix_name FROM usermap WHERE user_id = ?1",
                    params![external_id],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(name) = existing {
                return Ok(name);
            }

            let total: i64 =
                conn.query_row("SELECT COUNT(*) FROM usermap", [], |row| row.get(0))?;
            let new_name = format!("user-{}", total + 1);

            match conn.execute(
                "INSERT INTO usermap (user_id, unix_name) VALUES (?1, ?2)",
                params![external_id, new_name],
            ) {
                Ok(_) => {
                    info!(external_id, unix_name = %new_name, "Created user mapping");
                    Ok(new_name)
                }
                Err(e) if is_constraint_violation(&e) => {
                    // Lost the creation race; the row now exists
                    conn.query_row(
                        "SELECT unix_name FROM usermap WHERE user_id = ?1",
                        params![external_id],
                        |row| row.get(0),
                    )
                    .map_err(Error::from)
                }
                Err(e) => Err(e.into()),
            }
        })?;
        Ok(resolved)
    }

    /// Look up a user mapping without creating one.
    pub fn find_user(&self, external_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT unix_name FROM usermap WHERE user_id = ?1",
                params![external_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Reverse lookup: external id by local account name.
    pub fn find_user_by_unix_name(&self, unix_name: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT user_id FROM usermap WHERE unix_name = ?1",
                params![unix_name],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
        })
    }
}
