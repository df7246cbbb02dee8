//! OAuth1 signature base string construction and HMAC-SHA1 signing.
//!
//! Implements the "signature-only" subset of RFC 5849 used by LTI 1.x
//! launches: no token exchange, so the signing key is the encoded consumer
//! secret followed by a trailing `&`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha1::Sha1;
use url::Url;

type HmacSha1 = Hmac<Sha1>;

/// RFC 5849 §3.6: everything except ALPHA / DIGIT / `-` / `.` / `_` / `~`
/// is percent-encoded, spaces as `%20` (never `+`).
const OAUTH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode a string per RFC 5849.
#[must_use]
pub fn encode(value: &str) -> String {
    utf8_percent_encode(value, OAUTH_ENCODE_SET).to_string()
}

/// Normalize the base URL for the signature base string: lowercase scheme
/// and host, default ports dropped, query and fragment excluded.
///
/// Returns `None` for unparseable URLs.
#[must_use]
pub fn normalize_base_url(base_url: &str) -> Option<String> {
    let url = Url::parse(base_url).ok()?;
    let scheme = url.scheme();
    let host = url.host_str()?;
    let authority = match url.port() {
        Some(port) if !is_default_port(scheme, port) => format!("{host}:{port}"),
        _ => host.to_string(),
    };
    Some(format!("{scheme}://{authority}{}", url.path()))
}

fn is_default_port(scheme: &str, port: u16) -> bool {
    matches!((scheme, port), ("http", 80) | ("https", 443))
}

/// Build the signature base string from the HTTP method, base URL and the
/// request parameters (which must already exclude `oauth_signature`).
#[must_use]
pub fn base_string(method: &str, base_url: &str, params: &[(String, String)]) -> Option<String> {
    let normalized_url = normalize_base_url(base_url)?;

    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    // Sorted by encoded name, then encoded value
    encoded.sort();

    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    Some(format!(
        "{}&{}&{}",
        method.to_uppercase(),
        encode(&normalized_url),
        encode(&param_string)
    ))
}

/// Compute the base64 HMAC-SHA1 signature for a request.
///
/// `params` must exclude `oauth_signature`. Returns `None` when the base URL
/// does not parse.
#[must_use]
pub fn sign(
    method: &str,
    base_url: &str,
    params: &[(String, String)],
    consumer_secret: &str,
) -> Option<String> {
    let base = base_string(method, base_url, params)?;
    // Signature-only flow: empty token secret
    let signing_key = format!("{}&", encode(consumer_secret));

    let mut mac = HmacSha1::new_from_slice(signing_key.as_bytes()).ok()?;
    mac.update(base.as_bytes());
    Some(BASE64.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encode_leaves_unreserved_untouched() {
        assert_eq!(encode("abcXYZ019-._~"), "abcXYZ019-._~");
    }

    #[test]
    fn encode_uses_percent20_for_spaces() {
        assert_eq!(encode("a b+c"), "a%20b%2Bc");
    }

    #[test]
    fn encode_uppercases_hex_digits() {
        assert_eq!(encode("/"), "%2F");
        assert_eq!(encode("="), "%3D");
    }

    #[test]
    fn normalize_drops_default_ports_and_query() {
        assert_eq!(
            normalize_base_url("https://lms.example.edu:443/hub/login?a=1#frag"),
            Some("https://lms.example.edu/hub/login".to_string())
        );
        assert_eq!(
            normalize_base_url("http://lms.example.edu:8000/hub/login"),
            Some("http://lms.example.edu:8000/hub/login".to_string())
        );
        assert_eq!(normalize_base_url("not a url"), None);
    }

    #[test]
    fn base_string_sorts_parameters() {
        let params = vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ];
        let base = base_string("post", "http://example.com/launch", &params).unwrap();
        assert_eq!(
            base,
            "POST&http%3A%2F%2Fexample.com%2Flaunch&a%3D1%26b%3D2"
        );
    }

    #[test]
    fn base_string_sorts_by_value_for_equal_names() {
        let params = vec![
            ("a".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ];
        let base = base_string("POST", "http://example.com/", &params).unwrap();
        assert!(base.ends_with("a%3D1%26a%3D2"));
    }

    #[test]
    fn sign_is_deterministic_and_secret_sensitive() {
        let params = vec![("user_id".to_string(), "canvas-42".to_string())];
        let sig1 = sign("POST", "http://example.com/launch", &params, "secret").unwrap();
        let sig2 = sign("POST", "http://example.com/launch", &params, "secret").unwrap();
        let sig3 = sign("POST", "http://example.com/launch", &params, "other").unwrap();
        assert_eq!(sig1, sig2);
        assert_ne!(sig1, sig3);
    }

    #[test]
    fn sign_changes_with_any_parameter() {
        let base = vec![("user_id".to_string(), "canvas-42".to_string())];
        let mut tampered = base.clone();
        tampered[0].1 = "canvas-43".to_string();
        let sig = sign("POST", "http://example.com/launch", &base, "secret").unwrap();
        let sig_t = sign("POST", "http://example.com/launch", &tampered, "secret").unwrap();
        assert_ne!(sig, sig_t);
    }
}
