//! Request gateway for the library server API.
//!
//! Exposes a single `request` operation that is transparent to callers
//! regardless of platform: native builds call the server directly with a
//! bearer token, web builds tunnel every call through a same-origin relay
//! proxy to sidestep cross-origin restrictions on binary fetches.

use crate::credentials::{CredentialStore, KEY_BASE_URL, KEY_TOKEN};
use crate::error::ApiError;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Default relay proxy endpoint for web builds.
pub const DEFAULT_PROXY_ENDPOINT: &str = "http://localhost:8787";

/// Target substrings that mark an endpoint as image-bearing.
const IMAGE_TARGET_MARKERS: &[&str] = &[
    "/image",
    "/cover",
    "series-cover",
    "volume-cover",
    "chapter-cover",
];

/// Network-security model the client is running under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Direct authenticated calls to the server.
    Native,
    /// All calls tunneled through the relay proxy.
    Web,
}

/// HTTP methods supported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// Response payload from a gateway request.
#[derive(Debug)]
pub enum Payload {
    /// Parsed JSON body.
    Json(Value),
    /// Raw bytes for image-bearing endpoints, with the upstream
    /// `Content-Type` when the server supplied one.
    Binary {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
}

impl Payload {
    /// Extracts the JSON value, or fails with `UnexpectedBody`.
    pub fn into_json(self) -> Result<Value, ApiError> {
        match self {
            Payload::Json(value) => Ok(value),
            Payload::Binary { .. } => Err(ApiError::UnexpectedBody(
                "expected JSON, got binary".to_string(),
            )),
        }
    }
}

/// Query parameters: `None` values are omitted from the query string.
pub type Params<'a> = &'a [(&'a str, Option<String>)];

/// Authenticated HTTP gateway to the library server.
///
/// Holds no cache; every call goes to the network.
pub struct Gateway {
    client: reqwest::Client,
    platform: Platform,
    credentials: Arc<dyn CredentialStore>,
    proxy_endpoint: String,
    /// Latched when the proxy cannot be reached; cleared by a passing
    /// health check. Web platform only.
    proxy_down: AtomicBool,
}

impl Gateway {
    /// Creates a gateway for the given platform and credential store.
    pub fn new(platform: Platform, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            client: create_http_client().expect("Failed to create HTTP client"),
            platform,
            credentials,
            proxy_endpoint: DEFAULT_PROXY_ENDPOINT.to_string(),
            proxy_down: AtomicBool::new(false),
        }
    }

    /// Overrides the relay proxy endpoint (web platform).
    pub fn with_proxy_endpoint(mut self, endpoint: &str) -> Self {
        self.proxy_endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    /// Returns the platform this gateway was built for.
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Issues an authenticated request for a server-relative `target`
    /// (no leading slash) and returns the JSON or binary payload.
    pub async fn request(
        &self,
        target: &str,
        method: Method,
        body: Option<Value>,
        params: Params<'_>,
    ) -> Result<Payload, ApiError> {
        // Config is validated before any network attempt.
        let base_url = self
            .credentials
            .get(KEY_BASE_URL)
            .ok()
            .flatten()
            .ok_or(ApiError::MissingBaseUrl)?;

        match self.platform {
            Platform::Native => self.request_direct(&base_url, target, method, body, params).await,
            Platform::Web => self.request_via_proxy(target, method, body, params).await,
        }
    }

    /// Native path: direct call against `{base}/api/{target}`.
    async fn request_direct(
        &self,
        base_url: &str,
        target: &str,
        method: Method,
        body: Option<Value>,
        params: Params<'_>,
    ) -> Result<Payload, ApiError> {
        let url = format!("{}/api/{}", base_url.trim_end_matches('/'), target);

        let mut request = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };

        let query = present_params(params);
        if !query.is_empty() {
            request = request.query(&query);
        }
        if let Some(token) = self.credentials.get(KEY_TOKEN).ok().flatten() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        read_response(target, response).await
    }

    /// Web path: wrap the real call in the relay proxy's JSON envelope.
    async fn request_via_proxy(
        &self,
        target: &str,
        method: Method,
        body: Option<Value>,
        params: Params<'_>,
    ) -> Result<Payload, ApiError> {
        if self.proxy_down.load(Ordering::Relaxed) {
            return Err(ApiError::ProxyUnavailable);
        }

        let envelope = proxy_envelope(target, method, body, params);
        let mut request = self
            .client
            .post(format!("{}/api-proxy", self.proxy_endpoint))
            .json(&envelope);

        if let Some(token) = self.credentials.get(KEY_TOKEN).ok().flatten() {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(_) => {
                // Could not reach the proxy at all; block further calls
                // until a health check passes.
                self.proxy_down.store(true, Ordering::Relaxed);
                return Err(ApiError::ProxyUnavailable);
            }
        };

        read_response(target, response).await
    }

    /// Checks `GET {proxy}/health` and unlatches the proxy-down flag on
    /// success. Returns `ProxyUnavailable` on any other outcome.
    pub async fn check_proxy_health(&self) -> Result<(), ApiError> {
        let url = format!("{}/health", self.proxy_endpoint);

        let healthy = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let body: Value = response.json().await.unwrap_or(Value::Null);
                body.get("status").and_then(Value::as_str) == Some("ok")
            }
            _ => false,
        };

        self.proxy_down.store(!healthy, Ordering::Relaxed);
        if healthy { Ok(()) } else { Err(ApiError::ProxyUnavailable) }
    }
}

/// Common HTTP client configuration.
pub fn create_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(concat!("yomu/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .build()
}

/// Classifies a target as image-bearing by substring match.
pub fn is_image_target(target: &str) -> bool {
    IMAGE_TARGET_MARKERS
        .iter()
        .any(|marker| target.contains(marker))
}

/// Drops `None` values, keeping present parameters in order.
fn present_params(params: Params<'_>) -> Vec<(&str, String)> {
    params
        .iter()
        .filter_map(|(key, value)| value.clone().map(|v| (*key, v)))
        .collect()
}

/// Builds the relay proxy's request envelope.
fn proxy_envelope(target: &str, method: Method, body: Option<Value>, params: Params<'_>) -> Value {
    let mut envelope = json!({
        "target": target,
        "method": method.as_str(),
    });

    if let Some(body) = body {
        envelope["body"] = body;
    }

    let present = present_params(params);
    if !present.is_empty() {
        let map: serde_json::Map<String, Value> = present
            .into_iter()
            .map(|(key, value)| (key.to_string(), Value::String(value)))
            .collect();
        envelope["params"] = Value::Object(map);
    }

    envelope
}

/// Turns a response into a payload, surfacing non-2xx as `ApiError::Status`.
async fn read_response(target: &str, response: reqwest::Response) -> Result<Payload, ApiError> {
    let status = response.status();

    if !status.is_success() {
        let bytes = response.bytes().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            message: extract_error_message(&bytes),
        });
    }

    if is_image_target(target) {
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;

        Ok(Payload::Binary {
            bytes: bytes.to_vec(),
            content_type,
        })
    } else {
        Ok(Payload::Json(response.json().await?))
    }
}

/// Pulls a human-readable message out of an error body, if one exists.
fn extract_error_message(bytes: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        for field in ["message", "title", "detail"] {
            if let Some(message) = value.get(field).and_then(Value::as_str) {
                return message.to_string();
            }
        }
    }

    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        "request failed".to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response on a loopback port and returns
    /// the base URL.
    async fn spawn_upstream(response: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = stream.read(&mut request).await;
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
        });

        format!("http://{addr}")
    }

    fn canned_response(status: u16, reason: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[test]
    fn test_image_target_detection() {
        assert!(is_image_target("reader/image"));
        assert!(is_image_target("image/series-cover"));
        assert!(is_image_target("image/volume-cover"));
        assert!(is_image_target("image/chapter-cover"));
        assert!(!is_image_target("series/all"));
        assert!(!is_image_target("reader/chapter-info"));
    }

    #[test]
    fn test_present_params_drops_none() {
        let params: Vec<(&str, Option<String>)> = vec![
            ("chapterId", Some("12".to_string())),
            ("page", None),
            ("extract", Some("false".to_string())),
        ];
        let present = present_params(&params);
        assert_eq!(
            present,
            vec![
                ("chapterId", "12".to_string()),
                ("extract", "false".to_string())
            ]
        );
    }

    #[test]
    fn test_proxy_envelope_shape() {
        let params: Vec<(&str, Option<String>)> =
            vec![("seriesId", Some("3".to_string())), ("skip", None)];
        let envelope = proxy_envelope("image/series-cover", Method::Get, None, &params);

        assert_eq!(envelope["target"], "image/series-cover");
        assert_eq!(envelope["method"], "GET");
        assert_eq!(envelope["params"]["seriesId"], "3");
        assert!(envelope["params"].get("skip").is_none());
        assert!(envelope.get("body").is_none());
    }

    #[test]
    fn test_proxy_envelope_with_body() {
        let envelope = proxy_envelope(
            "reader/progress",
            Method::Post,
            Some(json!({"pageNum": 4})),
            &[],
        );
        assert_eq!(envelope["method"], "POST");
        assert_eq!(envelope["body"]["pageNum"], 4);
        assert!(envelope.get("params").is_none());
    }

    #[test]
    fn test_extract_error_message() {
        assert_eq!(
            extract_error_message(br#"{"message":"chapter not found"}"#),
            "chapter not found"
        );
        assert_eq!(
            extract_error_message(br#"{"title":"Unauthorized"}"#),
            "Unauthorized"
        );
        assert_eq!(extract_error_message(b"plain text"), "plain text");
        assert_eq!(extract_error_message(b""), "request failed");
    }

    #[tokio::test]
    async fn test_request_without_base_url_fails_before_network() {
        let store = Arc::new(MemoryCredentialStore::new());
        // Unroutable proxy endpoint: if this test ever hit the network it
        // would error with Transport, not MissingBaseUrl.
        let gateway =
            Gateway::new(Platform::Web, store).with_proxy_endpoint("http://127.0.0.1:1");

        let result = gateway
            .request("reader/image", Method::Get, None, &[])
            .await;
        assert!(matches!(result, Err(ApiError::MissingBaseUrl)));
    }

    #[tokio::test]
    async fn test_upstream_500_maps_to_status_error() {
        let endpoint = spawn_upstream(canned_response(
            500,
            "Internal Server Error",
            r#"{"message":"database unavailable"}"#,
        ))
        .await;
        let store = Arc::new(MemoryCredentialStore::with_connection(
            "https://manga.local",
            "key",
        ));
        let gateway = Gateway::new(Platform::Web, store).with_proxy_endpoint(&endpoint);

        let result = gateway.request("reader/image", Method::Get, None, &[]).await;
        match result {
            Err(ApiError::Status { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "database unavailable");
            }
            other => panic!("expected Status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_proxy_down_blocks_requests() {
        let store = Arc::new(MemoryCredentialStore::with_connection(
            "https://manga.local",
            "key",
        ));
        let gateway = Gateway::new(Platform::Web, store);
        gateway.proxy_down.store(true, Ordering::Relaxed);

        let result = gateway.request("series/all", Method::Post, None, &[]).await;
        assert!(matches!(result, Err(ApiError::ProxyUnavailable)));
    }
}
