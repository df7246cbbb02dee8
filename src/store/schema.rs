//! SQLite schema for the launch store.
//!
//! Tables:
//! - `usermap`: LMS user id to stable local account name
//! - `nonces`: per-user grading-callback session state (legacy name kept for
//!   compatibility with existing deployments; the replay table is separate)
//! - `replay_nonces`: append-only replay-protection log
//! - `courses`: course enrollment set per user
//! - `keysecret`: the single active consumer key/secret pair

/// DDL for the launch store tables.
pub const LAUNCH_SCHEMA: &str = r"
-- LMS user id -> local account name (immutable after insert)
CREATE TABLE IF NOT EXISTS usermap (
    user_id      TEXT PRIMARY KEY,
    unix_name    TEXT NOT NULL UNIQUE
);

-- Grading-callback session state, one row per user.
-- Named 'nonces' for compatibility with the schema this replaces.
CREATE TABLE IF NOT EXISTS nonces (
    id                       INTEGER PRIMARY KEY AUTOINCREMENT,
    key                      TEXT,
    user_id                  TEXT NOT NULL UNIQUE,
    lis_result_sourcedid     TEXT,
    lis_outcome_service_url  TEXT,
    resource_link_id         TEXT
);

-- Replay protection (append-only; rows are written for every validation
-- attempt that reaches the nonce check, including rejected ones)
CREATE TABLE IF NOT EXISTS replay_nonces (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    username     TEXT,
    timestamp    INTEGER NOT NULL,
    nonce        TEXT NOT NULL
);

-- Course enrollment set (append-only, no duplicates)
CREATE TABLE IF NOT EXISTS courses (
    user_id      TEXT NOT NULL,
    course       TEXT NOT NULL,
    UNIQUE(user_id, course)
);

-- Singleton consumer credential; the CHECK pins the row id so a second
-- insert conflicts instead of appending
CREATE TABLE IF NOT EXISTS keysecret (
    key_secret_id  INTEGER PRIMARY KEY CHECK (key_secret_id = 1),
    key_value      TEXT NOT NULL,
    secret         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_replay_nonces_nonce
    ON replay_nonces(nonce);
";
