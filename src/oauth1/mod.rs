//! OAuth1 launch-signature validation.
//!
//! [`SignatureValidator::verify`] is the security-critical entry point: it
//! checks the presented HMAC-SHA1 signature against the stored consumer
//! credential and consults the nonce replay guard. Every failure path
//! returns `false` and logs its reason; callers only ever see pass/fail.

pub mod signature;

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::store::LaunchStore;

/// OAuth1 core limits on client key and nonce lengths.
const CLIENT_KEY_MAX: usize = 64;
const NONCE_MIN: usize = 20;
const NONCE_MAX: usize = 64;

/// Validates OAuth1-signed launch requests against the launch store.
#[derive(Debug, Clone)]
pub struct SignatureValidator {
    store: LaunchStore,
}

impl SignatureValidator {
    /// Create a validator reading credentials and nonces from `store`.
    #[must_use]
    pub fn new(store: LaunchStore) -> Self {
        Self { store }
    }

    /// Verify an inbound launch request.
    ///
    /// `base_url` is the canonical external URL the LMS signed against
    /// (reconstructed from configuration when behind a proxy), `raw_body`
    /// the unmodified form-encoded request body.
    ///
    /// Never returns an error: any validation or store failure is logged
    /// and reported as `false`. A valid signature with a stale or reused
    /// nonce is an overall failure. The presented (nonce, timestamp) is
    /// recorded for every attempt that passes structural checks, so a
    /// replayed nonce fails even when the first attempt was itself denied.
    pub fn verify(
        &self,
        base_url: &str,
        method: &str,
        raw_body: &str,
        headers: &HeaderMap,
    ) -> bool {
        let params = collect_params(raw_body, headers);
        let get = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        let Some(consumer_key) = get("oauth_consumer_key") else {
            warn!("Launch missing oauth_consumer_key");
            return false;
        };
        let Some(presented_signature) = get("oauth_signature") else {
            warn!("Launch missing oauth_signature");
            return false;
        };
        let Some(nonce) = get("oauth_nonce") else {
            warn!("Launch missing oauth_nonce");
            return false;
        };
        let Some(timestamp) = get("oauth_timestamp") else {
            warn!("Launch missing oauth_timestamp");
            return false;
        };

        // Structural checks, per OAuth1 core
        if get("oauth_signature_method") != Some("HMAC-SHA1") {
            warn!("Unsupported or missing oauth_signature_method");
            return false;
        }
        if let Some(version) = get("oauth_version") {
            if version != "1.0" {
                warn!(version, "Unsupported oauth_version");
                return false;
            }
        }
        if consumer_key.len() > CLIENT_KEY_MAX {
            warn!("Client key exceeds maximum length");
            return false;
        }
        if nonce.len() < NONCE_MIN || nonce.len() > NONCE_MAX {
            warn!(len = nonce.len(), "Nonce length out of bounds");
            return false;
        }

        let credential = match self.store.credential() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Credential lookup failed");
                return false;
            }
        };

        let key_ok = match &credential {
            Some(cred) => {
                let matches: bool = consumer_key
                    .as_bytes()
                    .ct_eq(cred.consumer_key.as_bytes())
                    .into();
                if !matches {
                    debug!("Unknown consumer key");
                }
                matches
            }
            None => {
                warn!("No active consumer credential; treating key as invalid");
                false
            }
        };

        // Record the attempt before judging it: a reused nonce must fail on
        // its second presentation regardless of this attempt's outcome.
        let username = get("user_id");
        let nonce_ok = match self.store.check_and_record_nonce(timestamp, nonce, username) {
            Ok(fresh) => {
                if !fresh {
                    debug!("Stale timestamp or replayed nonce");
                }
                fresh
            }
            Err(e) => {
                warn!(error = %e, "Replay check failed");
                false
            }
        };

        let sig_ok = credential.is_some_and(|cred| {
            let signed_params: Vec<(String, String)> = params
                .iter()
                .filter(|(k, _)| k != "oauth_signature")
                .cloned()
                .collect();

            match signature::sign(method, base_url, &signed_params, &cred.secret) {
                Some(expected) => {
                    let matches: bool = expected
                        .as_bytes()
                        .ct_eq(presented_signature.as_bytes())
                        .into();
                    if !matches {
                        debug!("Signature mismatch");
                    }
                    matches
                }
                None => {
                    warn!(base_url, "Unparseable base URL for signature");
                    false
                }
            }
        });

        key_ok && nonce_ok && sig_ok
    }
}

/// Collect request parameters from the form-encoded body and any
/// `Authorization: OAuth` header. `realm` is excluded per RFC 5849.
#[must_use]
pub fn collect_params(raw_body: &str, headers: &HeaderMap) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url::form_urlencoded::parse(raw_body.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if let Some(auth) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(rest) = auth.strip_prefix("OAuth ") {
            for pair in rest.split(',') {
                let Some((key, value)) = pair.trim().split_once('=') else {
                    continue;
                };
                if key.eq_ignore_ascii_case("realm") {
                    continue;
                }
                let value = value.trim_matches('"');
                let decoded = percent_encoding::percent_decode_str(value)
                    .decode_utf8_lossy()
                    .into_owned();
                params.push((key.to_string(), decoded));
            }
        }
    }

    params
}
