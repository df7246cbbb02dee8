//! Session and course reconciliation.
//!
//! One session row per LMS user holding the latest grading-callback
//! coordinates; repeated launches update the result id and resource link in
//! place. Course enrollment is an append-only set.

use rusqlite::{OptionalExtension, params};

use super::LaunchStore;
use crate::Result;

/// Grading-callback coordinates recorded for a user's latest launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Consumer key the launch was signed with
    pub signing_key: String,
    /// External LMS user id
    pub user_id: String,
    /// Grade passback result id (`lis_result_sourcedid`)
    pub lis_result_sourcedid: String,
    /// Outcome service callback URL
    pub lis_outcome_service_url: String,
    /// Resource link the launch originated from
    pub resource_link_id: String,
}

impl LaunchStore {
    /// Upsert the session row for a user and enroll them in `course` when it
    /// is non-empty. Atomic: a constraint failure rolls back both writes.
    pub fn record_launch(
        &self,
        user_id: &str,
        signing_key: &str,
        lis_result_sourcedid: &str,
        lis_outcome_service_url: &str,
        resource_link_id: &str,
        course: &str,
    ) -> Result<()> {
        self.in_immediate_tx(|conn| {
            conn.execute(
                "INSERT INTO nonces
                     (key, user_id, lis_result_sourcedid, lis_outcome_service_url,
                      resource_link_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                     lis_result_sourcedid = excluded.lis_result_sourcedid,
                     resource_link_id = excluded.resource_link_id",
                params![
                    signing_key,
                    user_id,
                    lis_result_sourcedid,
                    lis_outcome_service_url,
                    resource_link_id,
                ],
            )?;

            if !course.is_empty() {
                conn.execute(
                    "INSERT OR IGNORE INTO courses (user_id, course) VALUES (?1, ?2)",
                    params![user_id, course],
                )?;
            }
            Ok(())
        })
    }

    /// Fetch the session row for a user, `None` if they never launched.
    pub fn session(&self, user_id: &str) -> Result<Option<SessionRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT key, user_id, lis_result_sourcedid, lis_outcome_service_url,
                        resource_link_id
                 FROM nonces WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(SessionRecord {
                        signing_key: row.get(0)?,
                        user_id: row.get(1)?,
                        lis_result_sourcedid: row.get(2)?,
                        lis_outcome_service_url: row.get(3)?,
                        resource_link_id: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Courses the user has launched into, in insertion order.
    pub fn user_courses(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT course FROM courses WHERE user_id = ?1 ORDER BY rowid")?;
            let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
            let mut courses = Vec::new();
            for row in rows {
                courses.push(row?);
            }
            Ok(courses)
        })
    }
}
