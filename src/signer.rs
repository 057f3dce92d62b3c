//! SigV4 signing of broker WebSocket connection URLs.
//!
//! Pure function: time is an explicit input and no ambient state is read, so
//! identical inputs always produce byte-identical URLs. The broker
//! authenticates the WebSocket upgrade against the embedded signature, which
//! is computed with the standard derive-signing-key -> canonical-request ->
//! string-to-sign -> HMAC chain over a GET of `/mqtt` with a single `host`
//! header and an empty body hash.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret as _;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::credentials::Credentials;

/// Service name of the AWS IoT device gateway.
pub const SIGNING_SERVICE: &str = "iotdevicegateway";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const CANONICAL_URI: &str = "/mqtt";

/// Signing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// No usable credential snapshot. Expected while the identity fetch is
    /// still pending; the caller schedules a retry rather than treating this
    /// as a defect.
    #[error("no credentials available to sign with")]
    MissingCredentials,
    #[error("signed URL failed to parse: {0}")]
    InvalidUrl(String),
}

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

fn uri_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Build a signed `wss://` connection URL for the broker endpoint.
///
/// `endpoint` is the bare broker host; `service` is normally
/// [`SIGNING_SERVICE`]. Returns [`SignerError::MissingCredentials`] when the
/// snapshot lacks an access key.
pub fn sign_connection_url(
    credentials: &Credentials,
    endpoint: &str,
    region: &str,
    service: &str,
    now: DateTime<Utc>,
) -> Result<Url, SignerError> {
    if !credentials.has_access_key() {
        return Err(SignerError::MissingCredentials);
    }

    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();

    let credential_scope = format!("{date_stamp}/{region}/{service}/aws4_request");
    let credential = format!("{}/{credential_scope}", credentials.access_key_id);

    // Query parameters in the fixed order the broker's authentication layer
    // canonicalizes them: Algorithm, Credential, Date, SignedHeaders.
    let mut canonical_querystring = format!("X-Amz-Algorithm={ALGORITHM}");
    canonical_querystring.push_str("&X-Amz-Credential=");
    canonical_querystring.push_str(&uri_encode(&credential));
    canonical_querystring.push_str("&X-Amz-Date=");
    canonical_querystring.push_str(&amz_date);
    canonical_querystring.push_str("&X-Amz-SignedHeaders=host");

    let canonical_headers = format!("host:{endpoint}\n");
    let payload_hash = sha256_hex("");
    let canonical_request = format!(
        "GET\n{CANONICAL_URI}\n{canonical_querystring}\n{canonical_headers}\nhost\n{payload_hash}"
    );

    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{credential_scope}\n{}",
        sha256_hex(&canonical_request)
    );

    let secret = credentials.secret_access_key.expose_secret();
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), &date_stamp);
    let k_region = hmac_sha256(&k_date, region);
    let k_service = hmac_sha256(&k_region, service);
    let k_signing = hmac_sha256(&k_service, "aws4_request");
    let signature = hex::encode(hmac_sha256(&k_signing, &string_to_sign));

    let mut signed =
        format!("wss://{endpoint}{CANONICAL_URI}?{canonical_querystring}&X-Amz-Signature={signature}");

    // Temporary credentials carry a session token which rides along as an
    // unsigned query parameter.
    if let Some(token) = &credentials.session_token {
        signed.push_str("&X-Amz-Security-Token=");
        signed.push_str(&uri_encode(token));
    }

    Url::parse(&signed).map_err(|e| SignerError::InvalidUrl(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ENDPOINT: &str = "a1b2c3-ats.iot.us-east-1.amazonaws.com";

    fn test_credentials(token: Option<&str>) -> Credentials {
        Credentials::new(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            token.map(str::to_string),
            None,
        )
    }

    fn test_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 5, 12, 30, 45).unwrap()
    }

    #[test]
    fn test_missing_access_key_is_recoverable_error() {
        let creds = Credentials::new("", "secret", None, None);
        let result = sign_connection_url(&creds, ENDPOINT, "us-east-1", SIGNING_SERVICE, test_now());
        assert_eq!(result.unwrap_err(), SignerError::MissingCredentials);
    }

    #[test]
    fn test_deterministic_for_identical_inputs() {
        let creds = test_credentials(Some("token/abc+def=="));
        let a = sign_connection_url(&creds, ENDPOINT, "us-east-1", SIGNING_SERVICE, test_now())
            .unwrap();
        let b = sign_connection_url(&creds, ENDPOINT, "us-east-1", SIGNING_SERVICE, test_now())
            .unwrap();
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn test_url_shape() {
        let creds = test_credentials(None);
        let url = sign_connection_url(&creds, ENDPOINT, "us-east-1", SIGNING_SERVICE, test_now())
            .unwrap();

        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some(ENDPOINT));
        assert_eq!(url.path(), "/mqtt");

        let query = url.query().unwrap();
        assert!(query.starts_with("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(query.contains("X-Amz-Date=20260805T123045Z"));
        assert!(query.contains("X-Amz-SignedHeaders=host"));
        assert!(query.contains("X-Amz-Signature="));
        assert!(!query.contains("X-Amz-Security-Token"));

        // Signature is the trailing parameter when no token is present.
        let (_, tail) = query.rsplit_once('&').unwrap();
        assert!(tail.starts_with("X-Amz-Signature="));
    }

    #[test]
    fn test_credential_scope_is_percent_encoded() {
        let creds = test_credentials(None);
        let url = sign_connection_url(&creds, ENDPOINT, "eu-west-1", SIGNING_SERVICE, test_now())
            .unwrap();
        assert!(url
            .query()
            .unwrap()
            .contains("X-Amz-Credential=AKIDEXAMPLE%2F20260805%2Feu-west-1%2Fiotdevicegateway%2Faws4_request"));
    }

    #[test]
    fn test_session_token_appended_and_encoded() {
        let creds = test_credentials(Some("tok/en+pad=="));
        let url = sign_connection_url(&creds, ENDPOINT, "us-east-1", SIGNING_SERVICE, test_now())
            .unwrap();
        let query = url.query().unwrap();
        assert!(query.ends_with("&X-Amz-Security-Token=tok%2Fen%2Bpad%3D%3D"));
    }

    #[test]
    fn test_signature_varies_with_time() {
        let creds = test_credentials(None);
        let later = Utc.with_ymd_and_hms(2026, 8, 5, 12, 30, 46).unwrap();
        let a = sign_connection_url(&creds, ENDPOINT, "us-east-1", SIGNING_SERVICE, test_now())
            .unwrap();
        let b =
            sign_connection_url(&creds, ENDPOINT, "us-east-1", SIGNING_SERVICE, later).unwrap();
        assert_ne!(a.as_str(), b.as_str());
    }

    #[test]
    fn test_signature_varies_with_secret() {
        let a_creds = test_credentials(None);
        let b_creds = Credentials::new("AKIDEXAMPLE", "another-secret", None, None);
        let a = sign_connection_url(&a_creds, ENDPOINT, "us-east-1", SIGNING_SERVICE, test_now())
            .unwrap();
        let b = sign_connection_url(&b_creds, ENDPOINT, "us-east-1", SIGNING_SERVICE, test_now())
            .unwrap();
        assert_ne!(a.as_str(), b.as_str());
    }
}
