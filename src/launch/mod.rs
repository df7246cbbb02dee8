//! Launch orchestration: the top-level authenticate operation.
//!
//! An inbound launch moves through a fixed pipeline: signature and replay
//! verification, identity resolution, session/course reconciliation, then
//! role-derived authorization. Any validation failure short-circuits to a
//! denial (`Ok(None)`); a data-layer failure aborts the launch with an error
//! and leaves the stores rolled back.

pub mod audit;
pub mod roles;

use std::collections::HashMap;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Config;
use crate::oauth1::{SignatureValidator, collect_params};
use crate::store::LaunchStore;
use crate::{Error, Result};
use audit::LaunchEvent;
use roles::RoleSet;

/// Launch parameters the orchestrator refuses to proceed without.
const REQUIRED_PARAMS: [&str; 4] = [
    "user_id",
    "roles",
    "resource_link_id",
    "lis_outcome_service_url",
];

/// Fixed variable names injected into a spawned worker's environment.
const WORKER_VARS: [&str; 5] = [
    "COURSE",
    "FIRST_NAME",
    "LAST_NAME",
    "USERNAME",
    "ADMIN_API_TOKEN",
];

/// The authentication result emitted for a successful launch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthOutcome {
    /// Name the host session runs under. For admin-flagged launches this is
    /// the shared admin principal, not the resolved local name.
    pub principal_name: String,
    /// Whether admin elevation was granted.
    pub is_admin: bool,
    /// Resolved local account name (`user-N`), regardless of elevation.
    pub local_name: String,
    /// Opaque state the host must persist for the session and later feed
    /// into worker provisioning.
    pub auth_state: HashMap<String, String>,
}

/// Coordinates signature validation, identity resolution and session
/// reconciliation for inbound launches.
pub struct Orchestrator {
    store: LaunchStore,
    validator: SignatureValidator,
    launch_url: String,
    admin_principal: String,
    passthrough: HashMap<String, String>,
}

impl Orchestrator {
    /// Create an orchestrator over an injected store.
    #[must_use]
    pub fn new(store: LaunchStore, config: &Config) -> Self {
        let validator = SignatureValidator::new(store.clone());
        Self {
            store,
            validator,
            launch_url: config.launch.launch_url(),
            admin_principal: config.launch.admin_principal.clone(),
            passthrough: config.passthrough.clone(),
        }
    }

    /// Authenticate an inbound launch request.
    ///
    /// Returns `Ok(None)` when the launch is denied (bad signature, replayed
    /// nonce, missing required parameter). Data-layer failures propagate as
    /// errors; no partial identity or session writes survive them.
    pub fn authenticate(
        &self,
        raw_body: &str,
        headers: &HeaderMap,
    ) -> Result<Option<AuthOutcome>> {
        let params = collect_params(raw_body, headers);
        let get = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        let user_id = get("user_id");
        audit::emit(&LaunchEvent::received(user_id));

        // Signature first: an incomplete launch still burns its nonce, so it
        // cannot be replayed after the missing parameter is filled in.
        if !self
            .validator
            .verify(&self.launch_url, "POST", raw_body, headers)
        {
            audit::emit(&LaunchEvent::rejected(
                user_id,
                "signature or replay validation failed",
            ));
            return Ok(None);
        }

        for required in REQUIRED_PARAMS {
            if get(required).is_none_or(str::is_empty) {
                warn!(param = required, "Launch missing required parameter");
                audit::emit(&LaunchEvent::rejected(
                    user_id,
                    format!("missing required parameter {required}"),
                ));
                return Ok(None);
            }
        }
        // Non-empty by the check above
        let user_id = get("user_id").unwrap_or_default();

        let known_before = self.store.find_user(user_id)?.is_some();
        let local_name = self.store.resolve_or_create_user(user_id)?;
        if !known_before {
            audit::emit(&LaunchEvent::identity_created(user_id, &local_name));
        }

        let course = get("custom_course").unwrap_or_default();
        self.store.record_launch(
            user_id,
            get("oauth_consumer_key").unwrap_or_default(),
            get("lis_result_sourcedid").unwrap_or_default(),
            get("lis_outcome_service_url").unwrap_or_default(),
            get("resource_link_id").unwrap_or_default(),
            course,
        )?;

        let role_set = RoleSet::parse(get("roles").unwrap_or_default());
        let admin_requested = get("custom_admin").is_some_and(|flag| !flag.is_empty());
        let is_admin = role_set.admin_eligible() && admin_requested;
        let principal_name = if is_admin {
            self.admin_principal.clone()
        } else {
            local_name.clone()
        };

        let mut auth_state = self.passthrough.clone();
        auth_state.insert("course".to_string(), course.to_string());
        auth_state.insert(
            "first_name".to_string(),
            get("lis_person_name_given").unwrap_or_default().to_string(),
        );
        auth_state.insert(
            "surname".to_string(),
            get("lis_person_name_family").unwrap_or_default().to_string(),
        );

        audit::emit(&LaunchEvent::authorized(
            user_id,
            &principal_name,
            course,
            is_admin,
        ));

        Ok(Some(AuthOutcome {
            principal_name,
            is_admin,
            local_name,
            auth_state,
        }))
    }
}

/// Build the environment for a worker spawned from an authorized session.
///
/// Copies the fixed allow-list of variables out of the session's auth state.
/// Fails loudly when expected state is missing; a worker spawned without its
/// grading credentials is worse than a failed spawn.
pub fn worker_env(outcome: &AuthOutcome) -> Result<HashMap<String, String>> {
    let state = &outcome.auth_state;
    let fetch = |key: &str| {
        state.get(key).cloned().ok_or_else(|| {
            tracing::error!(key, "Auth state missing required value for worker spawn");
            Error::MissingState(key.to_string())
        })
    };

    let mut env = HashMap::new();
    for var in crate::config::PASSTHROUGH_VARS {
        env.insert(var.to_string(), fetch(var)?);
    }
    env.insert("COURSE".to_string(), fetch("course")?);
    env.insert("FIRST_NAME".to_string(), fetch("first_name")?);
    env.insert("LAST_NAME".to_string(), fetch("surname")?);
    env.insert("USERNAME".to_string(), outcome.principal_name.clone());
    env.insert(
        "ADMIN_API_TOKEN".to_string(),
        fetch("JUPYTERHUB_API_TOKEN")?,
    );

    debug_assert!(WORKER_VARS.iter().all(|var| env.contains_key(*var)));
    Ok(env)
}
