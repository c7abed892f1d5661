//! Thin authenticated client for the PayPal REST API.
//!
//! The client only moves bytes: it obtains and caches an OAuth2 access token,
//! attaches it to each call and hands back the raw status and body. Deciding
//! whether a response means success belongs to the checkout workflow.

use crate::{config::PayPalConfig, errors::ServiceError};
use reqwest::{header, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub const PAYPAL_REQUEST_ID_HEADER: &str = "PayPal-Request-Id";
const TOKEN_PATH: &str = "/v1/oauth2/token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// Status and body of a provider call, untouched
#[derive(Debug, Clone)]
pub struct PayPalResponse {
    pub status: StatusCode,
    pub body: String,
}

impl PayPalResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

#[derive(Clone)]
pub struct PayPalClient {
    http: reqwest::Client,
    config: PayPalConfig,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl PayPalClient {
    pub fn new(config: PayPalConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to build PayPal HTTP client: {}", e))
            })?;
        Ok(Self {
            http,
            config,
            token: Arc::new(Mutex::new(None)),
        })
    }

    pub fn config(&self) -> &PayPalConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Cached bearer token, refreshed once it reaches
    /// `issued_at + expires_in - safety_margin`. The lock is held across the
    /// refresh so concurrent callers wait for a single token request.
    pub async fn access_token(&self) -> Result<String, ServiceError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.access_token.clone());
            }
        }

        let fresh = self.fetch_token().await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }

    /// Drop the cached token so the next call authenticates again
    pub async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    #[instrument(skip(self))]
    async fn fetch_token(&self) -> Result<CachedToken, ServiceError> {
        if !self.config.has_credentials() {
            return Err(ServiceError::ExternalServiceError(
                "PayPal credentials are not configured".to_string(),
            ));
        }

        let issued_at = Instant::now();
        let response = self
            .http
            .post(self.url(TOKEN_PATH))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header(header::ACCEPT, "application/json")
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("PayPal token request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "PayPal token endpoint rejected credentials");
            return Err(ServiceError::ExternalServiceError(format!(
                "PayPal token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("Malformed PayPal token response: {}", e))
        })?;

        let lifetime = Duration::from_secs(token.expires_in)
            .saturating_sub(self.config.token_safety_margin());
        info!(expires_in = token.expires_in, "obtained PayPal access token");

        Ok(CachedToken {
            access_token: token.access_token,
            refresh_at: issued_at + lifetime,
        })
    }

    /// Authenticated POST. `request_id` becomes the `PayPal-Request-Id`
    /// header so the provider deduplicates retries.
    #[instrument(skip(self, body))]
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        request_id: Option<&str>,
    ) -> Result<PayPalResponse, ServiceError> {
        let token = self.access_token().await?;
        let mut request = self
            .http
            .post(self.url(path))
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .header("Prefer", "return=representation")
            .json(body);
        if let Some(id) = request_id {
            request = request.header(PAYPAL_REQUEST_ID_HEADER, id);
        }
        self.execute(request).await
    }

    #[instrument(skip(self))]
    pub async fn get_json(&self, path: &str) -> Result<PayPalResponse, ServiceError> {
        let token = self.access_token().await?;
        let request = self
            .http
            .get(self.url(path))
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json");
        self.execute(request).await
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<PayPalResponse, ServiceError> {
        let response = request.send().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("PayPal request failed: {}", e))
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("Failed to read PayPal response: {}", e))
        })?;

        if status == StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
        }
        debug!(status = %status, bytes = body.len(), "PayPal response received");
        Ok(PayPalResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{basic_auth, bearer_token, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String, margin: u64) -> PayPalConfig {
        PayPalConfig {
            base_url,
            client_id: "client".into(),
            client_secret: "secret".into(),
            token_safety_margin_secs: margin,
            ..Default::default()
        }
    }

    async fn mount_token(server: &MockServer, expires_in: u64, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(basic_auth("client", "secret"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok-1",
                "token_type": "Bearer",
                "expires_in": expires_in
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn token_is_cached_between_calls() {
        let server = MockServer::start().await;
        mount_token(&server, 3600, 1).await;
        Mock::given(method("GET"))
            .and(path("/v2/checkout/orders/ABC"))
            .and(bearer_token("tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "ABC"})))
            .expect(2)
            .mount(&server)
            .await;

        let client = PayPalClient::new(config(server.uri(), 60)).unwrap();
        for _ in 0..2 {
            let response = client.get_json("/v2/checkout/orders/ABC").await.unwrap();
            assert!(response.is_success());
            let body: serde_json::Value = response.json().unwrap();
            assert_eq!(body["id"], "ABC");
        }
    }

    #[tokio::test]
    async fn token_inside_safety_margin_is_refreshed() {
        let server = MockServer::start().await;
        // expires_in equal to the margin leaves no usable lifetime
        mount_token(&server, 60, 2).await;

        let client = PayPalClient::new(config(server.uri(), 60)).unwrap();
        client.access_token().await.unwrap();
        client.access_token().await.unwrap();
    }

    #[tokio::test]
    async fn request_id_header_is_forwarded() {
        let server = MockServer::start().await;
        mount_token(&server, 3600, 1).await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders"))
            .and(header(PAYPAL_REQUEST_ID_HEADER, "key-123"))
            .and(header("Prefer", "return=representation"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "NEW"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = PayPalClient::new(config(server.uri(), 60)).unwrap();
        let response = client
            .post_json("/v2/checkout/orders", &json!({"intent": "CAPTURE"}), Some("key-123"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn non_success_is_returned_not_raised() {
        let server = MockServer::start().await;
        mount_token(&server, 3600, 1).await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/ABC/capture"))
            .respond_with(ResponseTemplate::new(422).set_body_string("UNPROCESSABLE"))
            .mount(&server)
            .await;

        let client = PayPalClient::new(config(server.uri(), 60)).unwrap();
        let response = client
            .post_json("/v2/checkout/orders/ABC/capture", &json!({}), None)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.body, "UNPROCESSABLE");
    }

    #[tokio::test]
    async fn token_endpoint_failure_is_external_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let client = PayPalClient::new(config(server.uri(), 60)).unwrap();
        assert_matches!(
            client.access_token().await,
            Err(ServiceError::ExternalServiceError(msg)) if msg.contains("401")
        );
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_request() {
        let client = PayPalClient::new(PayPalConfig::default()).unwrap();
        assert_matches!(
            client.access_token().await,
            Err(ServiceError::ExternalServiceError(_))
        );
    }
}
