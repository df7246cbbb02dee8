//! Audit logging for launch lifecycle events.
//!
//! Every event is emitted via `tracing::info!` with structured fields, making
//! the audit trail queryable by any log aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `launch.received` | An inbound launch request enters the orchestrator |
//! | `launch.rejected` | Signature/replay validation or a required parameter failed |
//! | `launch.identity_created` | A never-seen LMS user id was mapped to a local name |
//! | `launch.authorized` | The launch completed and an authentication result was emitted |

use serde::Serialize;

/// Structured audit event emitted for every launch lifecycle transition.
#[derive(Debug, Serialize)]
pub struct LaunchEvent {
    /// Event type string (e.g., `"launch.authorized"`).
    pub event: &'static str,
    /// External LMS user id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Resolved local account name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// Course the launch targeted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    /// Whether admin elevation was granted (for `launch.authorized`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
    /// Human-readable reason for rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl LaunchEvent {
    /// Construct a `launch.received` event.
    #[must_use]
    pub fn received(user_id: Option<&str>) -> Self {
        Self {
            event: "launch.received",
            user_id: user_id.map(ToString::to_string),
            principal: None,
            course: None,
            is_admin: None,
            reason: None,
        }
    }

    /// Construct a `launch.rejected` event.
    #[must_use]
    pub fn rejected(user_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            event: "launch.rejected",
            user_id: user_id.map(ToString::to_string),
            principal: None,
            course: None,
            is_admin: None,
            reason: Some(reason.into()),
        }
    }

    /// Construct a `launch.identity_created` event.
    #[must_use]
    pub fn identity_created(user_id: &str, principal: &str) -> Self {
        Self {
            event: "launch.identity_created",
            user_id: Some(user_id.to_string()),
            principal: Some(principal.to_string()),
            course: None,
            is_admin: None,
            reason: None,
        }
    }

    /// Construct a `launch.authorized` event.
    #[must_use]
    pub fn authorized(user_id: &str, principal: &str, course: &str, is_admin: bool) -> Self {
        Self {
            event: "launch.authorized",
            user_id: Some(user_id.to_string()),
            principal: Some(principal.to_string()),
            course: (!course.is_empty()).then(|| course.to_string()),
            is_admin: Some(is_admin),
            reason: None,
        }
    }
}

/// Emit an audit event via `tracing::info!` with structured fields.
pub fn emit(event: &LaunchEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "launch audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_event_contains_reason() {
        let event = LaunchEvent::rejected(Some("canvas-42"), "signature invalid");
        assert_eq!(event.event, "launch.rejected");
        assert_eq!(event.reason.as_deref(), Some("signature invalid"));
        assert_eq!(event.user_id.as_deref(), Some("canvas-42"));
    }

    #[test]
    fn authorized_event_omits_empty_course() {
        let event = LaunchEvent::authorized("canvas-42", "user-1", "", false);
        assert_eq!(event.course, None);
        assert_eq!(event.is_admin, Some(false));
    }

    #[test]
    fn events_serialize_to_json() {
        let events = vec![
            LaunchEvent::received(None),
            LaunchEvent::rejected(None, "test"),
            LaunchEvent::identity_created("canvas-42", "user-1"),
            LaunchEvent::authorized("canvas-42", "user-1", "intro", true),
        ];
        for event in events {
            assert!(serde_json::to_string(&event).is_ok());
        }
    }

    #[test]
    fn emit_does_not_panic() {
        emit(&LaunchEvent::received(Some("canvas-42")));
    }
}
