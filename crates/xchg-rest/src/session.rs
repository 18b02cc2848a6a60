//! Authenticated REST session client.
//!
//! One `SessionClient` per venue account. Every call acquires a flood
//! control permit, injects authentication when asked, and runs the
//! venue's error classifier over the response. Business rejections
//! surface immediately; rate-limit and transient failures retry with
//! bounded attempts and exponential backoff. Callers must treat
//! `send` as a blocking operation covering the whole round trip,
//! retries included.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::classifier::{ErrorClassifier, Outcome};
use crate::error::{RestError, RestResult};
use crate::flood::{FloodControl, Priority};
use crate::signer::{Credentials, Signer};

/// HTTP method, venue-adapter facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl RestMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One REST request, before signing.
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: RestMethod,
    /// Path relative to the session base URL (leading slash).
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Whether the venue auth provider must sign this request.
    pub authenticated: bool,
    pub priority: Priority,
}

impl RestRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(RestMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(RestMethod::Post, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(RestMethod::Delete, path)
    }

    fn new(method: RestMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            authenticated: false,
            priority: Priority::MarketData,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn authenticated(mut self) -> Self {
        self.authenticated = true;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Query string in insertion order, the usual signing payload base.
    pub fn query_string(&self) -> String {
        self.query
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Response payload plus the local receive timestamp.
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub received_at: DateTime<Utc>,
    pub status: u16,
    pub body: String,
}

impl RestResponse {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> RestResult<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| RestError::Communication(format!("response decode: {e}")))
    }
}

/// Injects venue authentication (signed headers/params) into a request.
///
/// Implemented by the venue plugin on top of a `Signer`; invoked once
/// per attempt so timestamps and nonces stay fresh across retries.
pub trait AuthProvider: Send + Sync {
    fn authorize(&self, request: &mut RestRequest, timestamp: DateTime<Utc>) -> RestResult<()>;
}

/// The common query-string scheme: api key in a header, millisecond
/// timestamp as a query parameter, HMAC of the query string appended
/// as the signature parameter. Venues with a different canonical
/// payload implement `AuthProvider` themselves.
pub struct QueryStringAuth {
    credentials: Credentials,
    signer: Arc<dyn Signer>,
    api_key_header: String,
    timestamp_param: String,
    signature_param: String,
}

impl QueryStringAuth {
    pub fn new(
        credentials: Credentials,
        signer: Arc<dyn Signer>,
        api_key_header: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            signer,
            api_key_header: api_key_header.into(),
            timestamp_param: "timestamp".to_string(),
            signature_param: "signature".to_string(),
        }
    }

    pub fn with_param_names(
        mut self,
        timestamp_param: impl Into<String>,
        signature_param: impl Into<String>,
    ) -> Self {
        self.timestamp_param = timestamp_param.into();
        self.signature_param = signature_param.into();
        self
    }
}

impl AuthProvider for QueryStringAuth {
    fn authorize(&self, request: &mut RestRequest, timestamp: DateTime<Utc>) -> RestResult<()> {
        request.headers.push((
            self.api_key_header.clone(),
            self.credentials.api_key.clone(),
        ));
        request.query.push((
            self.timestamp_param.clone(),
            timestamp.timestamp_millis().to_string(),
        ));

        let payload = request.query_string();
        let signature = self.signer.sign(&payload, self.credentials.secret())?;
        request.query.push((self.signature_param.clone(), signature));
        Ok(())
    }
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Base URL, e.g. "https://api.venue.example".
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Total attempts per call (first try included).
    pub max_attempts: u32,
    /// Base delay for retry backoff.
    pub backoff_base_ms: u64,
    /// Ceiling for retry backoff.
    pub backoff_max_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: 10_000,
            max_attempts: 3,
            backoff_base_ms: 250,
            backoff_max_ms: 5_000,
        }
    }
}

/// What to do with one attempt's classified outcome.
#[derive(Debug)]
enum AttemptAction {
    Succeed,
    Retry,
    Fail(RestError),
}

/// Map a classified outcome to the retry decision.
///
/// Extracted as a pure function so the retry policy is testable
/// without a live endpoint.
fn decide(outcome: Outcome, attempt: u32, max_attempts: u32) -> AttemptAction {
    match outcome {
        Outcome::Ok => AttemptAction::Succeed,
        Outcome::InsufficientFunds => AttemptAction::Fail(RestError::InsufficientFunds),
        Outcome::OrderUnknown => AttemptAction::Fail(RestError::OrderUnknown),
        Outcome::RateLimited | Outcome::Transient if attempt < max_attempts => AttemptAction::Retry,
        Outcome::RateLimited => AttemptAction::Fail(RestError::Communication(
            "rate limited, attempts exhausted".to_string(),
        )),
        Outcome::Transient => AttemptAction::Fail(RestError::Communication(
            "transient failure, attempts exhausted".to_string(),
        )),
        Outcome::Fatal(message) => AttemptAction::Fail(RestError::Communication(message)),
    }
}

/// Exponential backoff with jitter: base * 2^(attempt-1), capped.
fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let delay = base_ms.saturating_mul(1u64 << exponent).min(max_ms);
    let jitter = rand::thread_rng().gen_range(0..=base_ms.max(1) / 2);
    Duration::from_millis(delay + jitter)
}

/// Issues authenticated/unauthenticated requests over a reusable
/// connection, applying flood control and the retry policy.
pub struct SessionClient {
    config: SessionConfig,
    client: reqwest::Client,
    flood: Arc<FloodControl>,
    classifier: Arc<dyn ErrorClassifier>,
    auth: Option<Arc<dyn AuthProvider>>,
}

impl SessionClient {
    pub fn new(
        config: SessionConfig,
        flood: Arc<FloodControl>,
        classifier: Arc<dyn ErrorClassifier>,
        auth: Option<Arc<dyn AuthProvider>>,
    ) -> RestResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RestError::Connection(format!("client build: {e}")))?;

        Ok(Self {
            config,
            client,
            flood,
            classifier,
            auth,
        })
    }

    /// Send a request, applying flood control, signing and the retry
    /// policy. Returns the local receive timestamp with the payload.
    pub async fn send(&self, request: &RestRequest) -> RestResult<RestResponse> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let _permit = self.flood.acquire(request.priority).await;

            let mut prepared = request.clone();
            if prepared.authenticated {
                let auth = self.auth.as_ref().ok_or_else(|| {
                    RestError::InvalidRequest("authenticated request without credentials".into())
                })?;
                auth.authorize(&mut prepared, Utc::now())?;
            }

            match self.execute(&prepared).await {
                Ok(response) => {
                    let outcome =
                        self.classifier
                            .classify(response.status, &response.body, attempt);
                    match decide(outcome, attempt, self.config.max_attempts) {
                        AttemptAction::Succeed => return Ok(response),
                        AttemptAction::Retry => {
                            let delay = backoff_delay(
                                attempt,
                                self.config.backoff_base_ms,
                                self.config.backoff_max_ms,
                            );
                            warn!(
                                path = %request.path,
                                attempt,
                                status = response.status,
                                delay_ms = delay.as_millis() as u64,
                                "retrying request"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        AttemptAction::Fail(err) => {
                            if let RestError::Communication(msg) = &err {
                                error!(path = %request.path, attempt, raw = %msg, "request failed");
                            } else {
                                debug!(path = %request.path, attempt, %err, "request rejected");
                            }
                            return Err(err);
                        }
                    }
                }
                Err(err) if is_retryable_transport(&err) && attempt < self.config.max_attempts => {
                    let delay = backoff_delay(
                        attempt,
                        self.config.backoff_base_ms,
                        self.config.backoff_max_ms,
                    );
                    warn!(
                        path = %request.path,
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "transport failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    error!(path = %request.path, attempt, error = %err, "transport failure");
                    return Err(map_transport_error(err));
                }
            }
        }
    }

    async fn execute(&self, request: &RestRequest) -> Result<RestResponse, reqwest::Error> {
        let url = format!("{}{}", self.config.base_url, request.path);
        let mut builder = self
            .client
            .request(request.method.as_reqwest(), url)
            .query(&request.query);

        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(RestResponse {
            received_at: Utc::now(),
            status,
            body,
        })
    }
}

fn is_retryable_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn map_transport_error(err: reqwest::Error) -> RestError {
    if err.is_connect() {
        RestError::Connection(err.to_string())
    } else {
        RestError::Communication(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_success() {
        assert!(matches!(decide(Outcome::Ok, 1, 3), AttemptAction::Succeed));
    }

    #[test]
    fn test_business_rejections_never_retry() {
        // Even on the first attempt with retries left.
        assert!(matches!(
            decide(Outcome::InsufficientFunds, 1, 3),
            AttemptAction::Fail(RestError::InsufficientFunds)
        ));
        assert!(matches!(
            decide(Outcome::OrderUnknown, 1, 3),
            AttemptAction::Fail(RestError::OrderUnknown)
        ));
    }

    #[test]
    fn test_rate_limited_retries_until_exhausted() {
        assert!(matches!(
            decide(Outcome::RateLimited, 1, 3),
            AttemptAction::Retry
        ));
        assert!(matches!(
            decide(Outcome::RateLimited, 2, 3),
            AttemptAction::Retry
        ));
        assert!(matches!(
            decide(Outcome::RateLimited, 3, 3),
            AttemptAction::Fail(RestError::Communication(_))
        ));
    }

    #[test]
    fn test_fatal_fails_without_retry_and_keeps_message() {
        let action = decide(Outcome::Fatal("vendor code 1234".to_string()), 1, 3);
        match action {
            AttemptAction::Fail(RestError::Communication(msg)) => {
                assert_eq!(msg, "vendor code 1234");
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let d1 = backoff_delay(1, 100, 1_000);
        let d4 = backoff_delay(4, 100, 1_000);
        // Jitter is at most base/2, growth dominates.
        assert!(d4 > d1);
        assert!(d4 <= Duration::from_millis(1_000 + 50));
    }

    #[test]
    fn test_query_string_preserves_order() {
        let request = RestRequest::get("/api/v1/orders")
            .with_query("symbol", "BTCUSDT")
            .with_query("timestamp", "1700000000000");
        assert_eq!(
            request.query_string(),
            "symbol=BTCUSDT&timestamp=1700000000000"
        );
    }

    #[test]
    fn test_query_string_auth_signs_query() {
        use crate::signer::{HmacSha256Signer, SignatureEncoding};

        let auth = QueryStringAuth::new(
            Credentials::new("key-id", "secret"),
            Arc::new(HmacSha256Signer {
                encoding: SignatureEncoding::Hex,
            }),
            "X-API-KEY",
        );

        let mut request = RestRequest::get("/account").with_query("symbol", "BTCUSDT");
        let ts = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        auth.authorize(&mut request, ts).unwrap();

        assert!(request
            .headers
            .iter()
            .any(|(k, v)| k == "X-API-KEY" && v == "key-id"));
        assert_eq!(request.query[1], ("timestamp".into(), "1700000000000".into()));
        // Signature is over the query string up to (not including) itself.
        let (name, sig) = request.query.last().unwrap();
        assert_eq!(name, "signature");
        assert_eq!(sig.len(), 64);

        // Same request, same timestamp: identical signature.
        let mut again = RestRequest::get("/account").with_query("symbol", "BTCUSDT");
        auth.authorize(&mut again, ts).unwrap();
        assert_eq!(again.query.last().unwrap().1, *sig);
    }

    #[test]
    fn test_request_builder_defaults() {
        let request = RestRequest::post("/orders");
        assert!(!request.authenticated);
        assert_eq!(request.priority, Priority::MarketData);

        let request = request.authenticated().with_priority(Priority::Order);
        assert!(request.authenticated);
        assert_eq!(request.priority, Priority::Order);
    }
}
