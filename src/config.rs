//! Configuration management
//!
//! Configuration is loaded once at startup (file + environment) and treated
//! as read-only afterwards. The operational variables the downstream
//! provisioner needs are captured from the process environment here, so no
//! request-handling code ever reads the environment.

use std::{collections::HashMap, env, path::Path};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variables passed through to the spawned worker unchanged.
pub const PASSTHROUGH_VARS: [&str; 4] = [
    "JUPYTERHUB_API_URL",
    "JUPYTERHUB_API_TOKEN",
    "GRADEBOOK_DB",
    "MONGO_PW",
];

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Launch URL reconstruction and routing
    pub launch: LaunchConfig,
    /// Active OAuth1 consumer credential
    pub credential: CredentialConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Operational variables captured from the process environment at load
    /// time, persisted into each authenticated session's auth state.
    #[serde(skip)]
    pub passthrough: HashMap<String, String>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Launch URL and redirect configuration
///
/// The gateway typically sits behind a reverse proxy, so the canonical URL
/// the LMS signed against is reconstructed from configuration rather than
/// taken from the inbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// External-facing protocol (`http` or `https`)
    pub proto: String,
    /// External-facing domain
    pub domain: String,
    /// Login path the LMS posts to
    pub login_path: String,
    /// Where the browser is sent after a successful launch
    pub post_login_redirect: String,
    /// Principal name emitted for admin-flagged launches.
    ///
    /// All admin launches share this single grading account. Deployments
    /// that need per-admin audit trails should run one instance per course
    /// with distinct values.
    pub admin_principal: String,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            proto: "http".to_string(),
            domain: "localhost".to_string(),
            login_path: "/hub/login".to_string(),
            post_login_redirect: "/hub/home".to_string(),
            admin_principal: "instructor".to_string(),
        }
    }
}

impl LaunchConfig {
    /// The canonical launch URL used as the OAuth1 signature base URL.
    #[must_use]
    pub fn launch_url(&self) -> String {
        format!("{}://{}{}", self.proto, self.domain, self.login_path)
    }
}

/// Active consumer key/secret pair
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CredentialConfig {
    /// OAuth1 consumer key (supports `env:VAR_NAME`)
    pub consumer_key: String,
    /// OAuth1 shared secret (supports `env:VAR_NAME`)
    pub consumer_secret: String,
}

impl CredentialConfig {
    /// Resolve a value that may reference an environment variable.
    fn resolve(value: &str) -> String {
        if let Some(var_name) = value.strip_prefix("env:") {
            env::var(var_name).unwrap_or_else(|_| value.to_string())
        } else {
            value.to_string()
        }
    }

    /// Resolved consumer key
    #[must_use]
    pub fn key(&self) -> String {
        Self::resolve(&self.consumer_key)
    }

    /// Resolved shared secret
    #[must_use]
    pub fn secret(&self) -> String {
        Self::resolve(&self.consumer_secret)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file. The string `:memory:` selects an
    /// in-memory database (useful for local testing only).
    pub path: String,
    /// Seconds between replay-record pruning passes (0 disables pruning)
    pub prune_interval_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "lti.db".to_string(),
            prune_interval_secs: 3600,
        }
    }
}

/// The `env_files` key alone, extracted before the full config so the files
/// can be loaded first.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EnvFileList {
    env_files: Vec<String>,
}

impl EnvFileList {
    /// Load each file into the process environment.
    /// Files that don't exist are silently skipped; later files override
    /// earlier ones.
    fn load(&self) {
        for path_str in &self.env_files {
            let path = Path::new(path_str);
            if path.exists() {
                match dotenvy::from_path_override(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {path_str}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {path_str}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {path_str}");
            }
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            // Env files must hit the process environment before the full
            // figment is extracted, so `LTI_GATEWAY_` variables they set
            // participate in the merge. The file list itself is read from
            // the YAML alone in a pre-pass.
            let env_files: EnvFileList = Figment::new()
                .merge(Yaml::file(p))
                .extract()
                .map_err(|e| Error::Config(e.to_string()))?;
            env_files.load();

            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (LTI_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("LTI_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.capture_passthrough();

        Ok(config)
    }

    /// Capture the pass-through operational variables from the environment.
    /// Missing variables are logged but tolerated: the launch still succeeds,
    /// and worker provisioning fails loudly later if they are needed.
    fn capture_passthrough(&mut self) {
        for var in PASSTHROUGH_VARS {
            match env::var(var) {
                Ok(value) => {
                    self.passthrough.insert(var.to_string(), value);
                }
                Err(_) => {
                    tracing::warn!(var, "Pass-through variable not set in environment");
                }
            }
        }
    }

    /// A copy of the configuration with secrets masked, for `check-config`.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.credential.consumer_secret.is_empty() {
            copy.credential.consumer_secret = "<redacted>".to_string();
        }
        for value in copy.passthrough.values_mut() {
            *value = "<redacted>".to_string();
        }
        copy
    }
}
