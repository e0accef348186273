//! HTTP plumbing for ArcGIS REST calls

use super::error::{ArcGisError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_CHARSET};
use reqwest::Client;
use serde_json::Value;

/// Maximum length of response body to log
const MAX_LOG_BODY_LENGTH: usize = 200;

const DEFAULT_USER_AGENT: &str = concat!("arcgis-import/", env!("CARGO_PKG_VERSION"));

/// Sanitize response body for logging
/// Truncates long responses and drops control characters
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| c.is_control() && c != ' ', "")
}

/// Client configuration injected into the reqwest transport.
///
/// ArcGIS servers in the wild are frequently fronted by self-signed or
/// mismatched certificates, so the default disables both peer and host
/// verification. With the rustls backend there is no separate hostname
/// switch: turning off either check turns off certificate verification as a
/// whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientConfig {
    /// Verify the peer certificate chain
    pub verify_peer: bool,
    /// Verify that the certificate matches the requested host
    pub verify_host: bool,
    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            verify_peer: false,
            verify_host: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpClientConfig {
    /// Configuration with full TLS verification
    pub fn verified() -> Self {
        Self {
            verify_peer: true,
            verify_host: true,
            ..Self::default()
        }
    }

    fn accepts_invalid_certs(&self) -> bool {
        !self.verify_peer || !self.verify_host
    }
}

/// Raw answer of a GET request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// The one HTTP operation the connector needs
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET and return status and body, whatever the status
    async fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// reqwest backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport from an explicit client configuration
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_CHARSET, HeaderValue::from_static("utf-8"));

        if config.accepts_invalid_certs() {
            tracing::warn!("TLS certificate verification disabled for ArcGIS requests");
        }

        // reqwest follows up to 10 redirects by default and negotiates gzip
        // when the feature is enabled
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .gzip(true)
            .danger_accept_invalid_certs(config.accepts_invalid_certs())
            .build()
            .map_err(ArcGisError::ClientSetup)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        tracing::debug!("GET {}", url);

        let transport_err = |e: reqwest::Error| ArcGisError::Transport {
            url: url.to_string(),
            source: Box::new(e),
        };

        let response = self.client.get(url).send().await.map_err(transport_err)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_err)?;

        Ok(HttpResponse { status, body })
    }
}

/// GET `url` and parse the body as JSON.
///
/// Anything but a 200 is a [`ArcGisError::DataDownload`] carrying the full
/// body; a body that is not JSON is a [`ArcGisError::Response`].
pub(crate) async fn get_json<T: Transport + ?Sized>(transport: &T, url: &str) -> Result<Value> {
    let response = transport.get(url).await?;

    if response.status != 200 {
        tracing::error!(
            "ArcGIS error: {} - {}",
            response.status,
            sanitize_for_log(&response.body)
        );
        return Err(ArcGisError::DataDownload {
            url: url.to_string(),
            status: response.status,
            body: response.body,
        });
    }

    serde_json::from_str(&response.body)
        .map_err(|e| ArcGisError::response(format!("malformed JSON from {url}: {e}")))
}


#[cfg(test)]
mod tests {
    use super::fake::StaticTransport;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.starts_with(&"x".repeat(200)));
        assert!(sanitized.contains("[truncated, 500 bytes total]"));
    }

    #[test]
    fn test_sanitize_respects_char_boundaries() {
        let body = "é".repeat(150);
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.contains("[truncated, 300 bytes total]"));
    }

    #[test]
    fn test_sanitize_strips_control_characters() {
        assert_eq!(sanitize_for_log("a\nb\tc d"), "abc d");
    }

    #[test]
    fn test_default_config_disables_verification() {
        let config = HttpClientConfig::default();
        assert!(!config.verify_peer);
        assert!(!config.verify_host);
        assert!(config.accepts_invalid_certs());
        assert!(!HttpClientConfig::verified().accepts_invalid_certs());
    }

    #[test]
    fn test_reqwest_transport_builds_with_defaults() {
        assert!(ReqwestTransport::new(&HttpClientConfig::default()).is_ok());
        assert!(ReqwestTransport::new(&HttpClientConfig::verified()).is_ok());
    }

    #[tokio::test]
    async fn test_get_json_non_200_is_data_download() {
        let transport = StaticTransport::new().with("http://h/x", 503, "busy");
        let err = get_json(&transport, "http://h/x").await.unwrap_err();
        match err {
            ArcGisError::DataDownload { url, status, body } => {
                assert_eq!(url, "http://h/x");
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_json_malformed_body_is_response_error() {
        let transport = StaticTransport::new().with("http://h/x", 200, "<html>");
        let err = get_json(&transport, "http://h/x").await.unwrap_err();
        assert!(matches!(err, ArcGisError::Response { .. }));
    }

    #[tokio::test]
    async fn test_get_json_parses_body() {
        let transport = StaticTransport::new().with_json("http://h/x", &json!({"a": 1}));
        let value = get_json(&transport, "http://h/x").await.unwrap();
        assert_eq!(value["a"], 1);
        assert_eq!(transport.requested(), vec!["http://h/x".to_string()]);
    }
}
