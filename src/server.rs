//! HTTP host adapter for the launch gateway.
//!
//! The LMS posts OAuth1-signed launches to `/hub/login`. On success the
//! authentication result is parked in an in-memory session cache keyed by an
//! opaque cookie token; the host's provisioning hook reads the worker
//! environment back out through `/hub/spawn-env`. Everything else (cookies
//! beyond this simple token, process spawning, the grading roster) belongs
//! to the surrounding host environment.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use dashmap::DashMap;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::launch::{AuthOutcome, Orchestrator, worker_env};
use crate::store::LaunchStore;
use crate::{Error, Result};

const SESSION_COOKIE: &str = "ltigw_session";

/// How long a launch session stays readable after authentication.
const SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// How often the background reaper sweeps expired sessions.
const SESSION_REAP_INTERVAL: Duration = Duration::from_secs(300);

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// A cached authentication result with its expiry time (Unix epoch seconds).
struct SessionEntry {
    outcome: AuthOutcome,
    exp: u64,
}

impl SessionEntry {
    fn is_expired(&self) -> bool {
        epoch_secs() >= self.exp
    }
}

/// In-memory cache of authenticated sessions, keyed by cookie token.
///
/// Holds the auth state the host must persist between the launch and the
/// worker spawn. Tokens are random and unguessable. Entries expire after a
/// TTL: lookups lazily evict, and a background reaper sweeps the rest.
pub struct SessionCache {
    by_token: DashMap<String, SessionEntry>,
    ttl: Duration,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(SESSION_TTL)
    }
}

impl SessionCache {
    /// Create an empty cache whose entries expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            by_token: DashMap::new(),
            ttl,
        }
    }

    /// Generate a cryptographically random opaque session token.
    ///
    /// Format: `ltigw_<43-char URL-safe base64>` (256 bits of entropy).
    #[must_use]
    pub fn generate_token() -> String {
        use rand::RngExt;
        let random_bytes: [u8; 32] = rand::rng().random();
        format!(
            "ltigw_{}",
            base64::Engine::encode(
                &base64::engine::general_purpose::URL_SAFE_NO_PAD,
                random_bytes,
            )
        )
    }

    /// Store an outcome, returning its new token.
    pub fn insert(&self, outcome: AuthOutcome) -> String {
        let token = Self::generate_token();
        let entry = SessionEntry {
            outcome,
            exp: epoch_secs() + self.ttl.as_secs(),
        };
        self.by_token.insert(token.clone(), entry);
        token
    }

    /// Look up an outcome by token. Expired entries are evicted on access.
    #[must_use]
    pub fn get(&self, token: &str) -> Option<AuthOutcome> {
        let entry = self.by_token.get(token)?;
        if entry.is_expired() {
            drop(entry);
            self.by_token.remove(token);
            debug!("Lazy-evicted expired session");
            return None;
        }
        Some(entry.outcome.clone())
    }

    /// Remove all expired entries, returning how many were dropped.
    pub fn reap_expired(&self) -> usize {
        let before = self.by_token.len();
        self.by_token.retain(|_, entry| !entry.is_expired());
        before - self.by_token.len()
    }
}

/// Spawn a background task that reaps expired sessions every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_session_reaper(
    sessions: Arc<SessionCache>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = sessions.reap_expired();
                    if reaped > 0 {
                        debug!(count = reaped, "Reaped expired sessions");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Session reaper shutting down");
                    break;
                }
            }
        }
    });
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    sessions: Arc<SessionCache>,
    post_login_redirect: String,
}

/// Build the router for the launch gateway.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/hub/login", post(handle_launch))
        .route("/login", post(handle_launch))
        .route("/hub/spawn-env", get(handle_spawn_env))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Handle an inbound LTI launch POST.
async fn handle_launch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let orchestrator = Arc::clone(&state.orchestrator);
    // The store is synchronous SQLite; keep it off the async worker threads.
    let result = tokio::task::spawn_blocking(move || orchestrator.authenticate(&body, &headers))
        .await
        .map_err(|e| Error::Internal(format!("launch task panicked: {e}")));

    match result {
        Ok(Ok(Some(outcome))) => {
            let token = state.sessions.insert(outcome);
            let cookie = format!("{SESSION_COOKIE}={token}; HttpOnly; Path=/; SameSite=None");
            (
                StatusCode::SEE_OTHER,
                [
                    (header::SET_COOKIE, cookie),
                    (header::LOCATION, state.post_login_redirect.clone()),
                ],
            )
                .into_response()
        }
        Ok(Ok(None)) => {
            // Denial detail stays in the logs; the LMS only sees a 403
            (StatusCode::FORBIDDEN, "Launch denied").into_response()
        }
        Ok(Err(e)) | Err(e) => {
            error!(error = %e, "Launch failed with internal error");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

/// Return the worker environment for the caller's session.
///
/// This is the pre-provisioning boundary: the host spawner calls it with the
/// launch cookie and injects the returned map into the worker's environment.
async fn handle_spawn_env(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = session_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, "No session").into_response();
    };
    let Some(outcome) = state.sessions.get(&token) else {
        return (StatusCode::UNAUTHORIZED, "Unknown session").into_response();
    };

    match worker_env(&outcome) {
        Ok(env) => Json(env).into_response(),
        Err(e) => {
            error!(error = %e, "Cannot build worker environment");
            (StatusCode::INTERNAL_SERVER_ERROR, "Missing auth state").into_response()
        }
    }
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

/// Spawn a background task that prunes old replay records.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_replay_pruner(
    store: LaunchStore,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.prune_replay_records() {
                        Ok(pruned) if pruned > 0 => {
                            debug!(count = pruned, "Pruned old replay records");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "Replay pruning failed");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Replay pruner shutting down");
                    break;
                }
            }
        }
    });
}

/// Run the launch gateway until ctrl-c.
pub async fn run(config: Config) -> Result<()> {
    let store = if config.database.path == ":memory:" {
        LaunchStore::memory()?
    } else {
        LaunchStore::open(std::path::Path::new(&config.database.path))?
    };

    // Seed the credential singleton from configuration, once, at startup.
    // The validator itself only ever reads.
    let key = config.credential.key();
    let secret = config.credential.secret();
    if key.is_empty() || secret.is_empty() {
        return Err(Error::Config(
            "consumer_key and consumer_secret must be configured".to_string(),
        ));
    }
    store.ensure_credential(&key, &secret)?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    if config.database.prune_interval_secs > 0 {
        spawn_replay_pruner(
            store.clone(),
            Duration::from_secs(config.database.prune_interval_secs),
            shutdown_tx.subscribe(),
        );
    }

    let sessions = Arc::new(SessionCache::new(SESSION_TTL));
    spawn_session_reaper(
        Arc::clone(&sessions),
        SESSION_REAP_INTERVAL,
        shutdown_tx.subscribe(),
    );

    let state = AppState {
        orchestrator: Arc::new(Orchestrator::new(store, &config)),
        sessions,
        post_login_redirect: config.launch.post_login_redirect.clone(),
    };
    let router = create_router(state);

    let addr = SocketAddr::new(
        config
            .server
            .host
            .parse()
            .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
        config.server.port,
    );
    let listener = TcpListener::bind(addr).await?;
    info!(
        %addr,
        launch_url = %config.launch.launch_url(),
        "LTI gateway listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(());
        })
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_have_prefix_and_entropy() {
        let token = SessionCache::generate_token();
        assert!(token.starts_with("ltigw_"));
        assert!(token.len() > 40);
        assert_ne!(token, SessionCache::generate_token());
    }

    fn outcome() -> AuthOutcome {
        AuthOutcome {
            principal_name: "user-1".to_string(),
            is_admin: false,
            local_name: "user-1".to_string(),
            auth_state: std::collections::HashMap::new(),
        }
    }

    #[test]
    fn session_cache_round_trip() {
        let cache = SessionCache::new(SESSION_TTL);
        let token = cache.insert(outcome());
        assert_eq!(cache.get(&token), Some(outcome()));
        assert_eq!(cache.get("ltigw_unknown"), None);
    }

    #[test]
    fn expired_session_is_evicted_on_access() {
        // Zero TTL: entries are born expired
        let cache = SessionCache::new(Duration::ZERO);
        let token = cache.insert(outcome());
        assert_eq!(cache.get(&token), None);
        assert_eq!(cache.by_token.len(), 0);
    }

    #[test]
    fn reaper_drops_only_expired_sessions() {
        let expired = SessionCache::new(Duration::ZERO);
        expired.insert(outcome());
        expired.insert(outcome());
        assert_eq!(expired.reap_expired(), 2);

        let live = SessionCache::new(SESSION_TTL);
        live.insert(outcome());
        assert_eq!(live.reap_expired(), 0);
        assert_eq!(live.by_token.len(), 1);
    }

    #[test]
    fn session_token_parsed_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "other=1; ltigw_session=ltigw_abc; trailing=2".parse().unwrap(),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("ltigw_abc"));

        let empty = HeaderMap::new();
        assert_eq!(session_token(&empty), None);
    }
}
