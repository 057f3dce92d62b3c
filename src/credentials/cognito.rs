//! Cognito identity-pool credential source.
//!
//! Implements the unauthenticated identity flow: `GetId` resolves the pool to
//! an identity id (cached for the process lifetime), then
//! `GetCredentialsForIdentity` exchanges it for temporary signing
//! credentials. Both are `application/x-amz-json-1.1` POSTs against the
//! regional Cognito identity endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{CredentialError, CredentialSource, Credentials};

const TARGET_GET_ID: &str = "AWSCognitoIdentityService.GetId";
const TARGET_GET_CREDENTIALS: &str = "AWSCognitoIdentityService.GetCredentialsForIdentity";
const AMZ_JSON: &str = "application/x-amz-json-1.1";

/// Credential source backed by a Cognito identity pool.
pub struct CognitoCredentialSource {
    http: Client,
    endpoint: String,
    identity_pool_id: String,
    identity_id: RwLock<Option<String>>,
    cached: RwLock<Option<Credentials>>,
    refresh_in_flight: AtomicBool,
}

impl CognitoCredentialSource {
    /// Source for the standard regional endpoint.
    pub fn new(region: &str, identity_pool_id: impl Into<String>) -> Self {
        Self::with_endpoint(
            format!("https://cognito-identity.{region}.amazonaws.com"),
            identity_pool_id,
        )
    }

    /// Source with an explicit endpoint. Used by tests to point at a mock
    /// server.
    pub fn with_endpoint(endpoint: impl Into<String>, identity_pool_id: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
            identity_pool_id: identity_pool_id.into(),
            identity_id: RwLock::new(None),
            cached: RwLock::new(None),
            refresh_in_flight: AtomicBool::new(false),
        }
    }

    async fn post_target<T: DeserializeOwned>(
        &self,
        target: &str,
        body: serde_json::Value,
    ) -> Result<T, CredentialError> {
        // Not `.json()`: the identity service expects the x-amz-json-1.1
        // content type, which reqwest's json helper would overwrite.
        let response = self
            .http
            .post(&self.endpoint)
            .header("content-type", AMZ_JSON)
            .header("x-amz-target", target)
            .body(body.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CredentialError::Service(format!(
                "{target} returned {status}: {text}"
            )));
        }

        Ok(response.json::<T>().await?)
    }

    async fn resolve_identity_id(&self) -> Result<String, CredentialError> {
        if let Some(id) = read_lock(&self.identity_id).clone() {
            return Ok(id);
        }

        let response: GetIdResponse = self
            .post_target(
                TARGET_GET_ID,
                json!({ "IdentityPoolId": self.identity_pool_id }),
            )
            .await?;
        debug!(identity_id = %response.identity_id, "resolved pool identity");

        *write_lock(&self.identity_id) = Some(response.identity_id.clone());
        Ok(response.identity_id)
    }

    async fn fetch_from_service(&self) -> Result<Credentials, CredentialError> {
        let identity_id = self.resolve_identity_id().await?;

        let response: GetCredentialsResponse = match self
            .post_target(
                TARGET_GET_CREDENTIALS,
                json!({ "IdentityId": identity_id }),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => {
                // The cached identity may have been deleted from the pool;
                // drop it so the next attempt re-resolves.
                if matches!(err, CredentialError::Service(_)) {
                    *write_lock(&self.identity_id) = None;
                }
                return Err(err);
            }
        };

        let wire = response.credentials.ok_or(CredentialError::Missing)?;
        let expiration = wire
            .expiration
            .and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0) as i64));
        let credentials = Credentials::new(
            wire.access_key_id,
            wire.secret_key,
            wire.session_token,
            expiration,
        );
        if !credentials.has_access_key() {
            return Err(CredentialError::Missing);
        }

        *write_lock(&self.cached) = Some(credentials.clone());
        Ok(credentials)
    }
}

#[async_trait]
impl CredentialSource for CognitoCredentialSource {
    async fn fetch_initial(&self) -> Result<Credentials, CredentialError> {
        if let Some(cached) = self.current() {
            return Ok(cached);
        }
        self.fetch_from_service().await
    }

    async fn refresh(&self) -> Result<Credentials, CredentialError> {
        if self.refresh_in_flight.swap(true, Ordering::SeqCst) {
            warn!("credential refresh already in progress");
            return Err(CredentialError::RefreshInFlight);
        }

        let result = self.fetch_from_service().await;
        self.refresh_in_flight.store(false, Ordering::SeqCst);
        result
    }

    fn current(&self) -> Option<Credentials> {
        read_lock(&self.cached).clone()
    }
}

// Lock poisoning cannot leave the cache in a torn state (values are replaced
// wholesale), so recover the inner value instead of panicking.
fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Deserialize)]
struct GetIdResponse {
    #[serde(rename = "IdentityId")]
    identity_id: String,
}

#[derive(Debug, Deserialize)]
struct GetCredentialsResponse {
    #[serde(rename = "Credentials")]
    credentials: Option<WireCredentials>,
}

#[derive(Debug, Deserialize)]
struct WireCredentials {
    #[serde(rename = "AccessKeyId")]
    access_key_id: String,
    #[serde(rename = "SecretKey")]
    secret_key: String,
    #[serde(rename = "SessionToken")]
    session_token: Option<String>,
    #[serde(rename = "Expiration")]
    expiration: Option<f64>,
}
