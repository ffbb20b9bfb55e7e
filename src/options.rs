//! Transport and client configuration.

use std::collections::HashMap;
use std::time::Duration;

use crate::client::ClientError;

/// Default path of the completion endpoint, relative to the base URL.
pub const DEFAULT_CHAT_PATH: &str = "/api/chat";

/// A secret string type for sensitive data like API keys.
/// Prevents accidental logging or display of secrets.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new secret string.
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Get the underlying secret value.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// Generic transport options containing truly generic transport fields
/// and transport-specific configuration.
///
/// `timeout` defaults to `None`: bounding a completion's total duration is
/// left to the endpoint.
///
/// # Example
/// ```rust
/// use chatrelay::options::{TransportOptions, HttpTransport};
/// use std::time::Duration;
///
/// let options = TransportOptions::new(
///     HttpTransport::default().with_base_url("http://localhost:3000".to_string()),
/// )
/// .with_timeout(Duration::from_secs(30));
/// assert_eq!(options.timeout, Some(Duration::from_secs(30)));
/// ```
#[derive(Debug, Clone)]
pub struct TransportOptions<T> {
    /// Request timeout (applies to all transports)
    pub timeout: Option<Duration>,

    /// Transport-specific options
    pub provider: T,
}

impl<T> TransportOptions<T> {
    /// Create new transport options with transport-specific configuration.
    pub fn new(provider: T) -> Self {
        Self {
            timeout: None,
            provider,
        }
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// HTTP-specific transport options.
/// Used as the provider field in `TransportOptions<HttpTransport>`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    /// Bearer token sent with every request
    pub api_key: Option<SecretString>,

    /// Base URL the endpoint paths are appended to
    pub base_url: Option<String>,

    /// HTTP proxy URL
    pub proxy: Option<String>,

    /// Additional HTTP headers to include in requests
    pub extra_headers: Option<HashMap<String, String>>,
}

impl HttpTransport {
    /// Create new HTTP transport options with an API key.
    pub fn new(api_key: impl Into<SecretString>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Set the proxy URL.
    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Set extra headers.
    pub fn with_extra_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.extra_headers = Some(headers);
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key, value);
        self
    }

    /// Join the base URL and an endpoint path.
    pub fn endpoint(&self, path: &str) -> Result<String, ClientError> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| ClientError::Config("base URL is not set".to_string()))?;
        Ok(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }
}

/// Everything needed to reach the chat backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Path of the completion endpoint
    pub chat_path: String,

    pub transport: TransportOptions<HttpTransport>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            transport: TransportOptions::new(HttpTransport::default().with_base_url(base_url.into())),
        }
    }

    /// Load configuration from the process environment.
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `CHATRELAY_BASE_URL` | required, `http://` or `https://` URL |
    /// | `CHATRELAY_API_KEY` | optional bearer token |
    /// | `CHATRELAY_PROXY` | optional proxy URL |
    /// | `CHATRELAY_TIMEOUT_SECS` | optional whole-request timeout |
    /// | `CHATRELAY_CHAT_PATH` | defaults to `/api/chat` |
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Every invalid entry is reported, one per line.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut problems = Vec::new();

        let base_url = match get("CHATRELAY_BASE_URL") {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => Some(url),
            Some(url) => {
                problems.push(format!("CHATRELAY_BASE_URL: not a valid URL: {url}"));
                None
            }
            None => {
                problems.push("CHATRELAY_BASE_URL: base URL is required".to_string());
                None
            }
        };

        let timeout = match get("CHATRELAY_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
                _ => {
                    problems.push(format!(
                        "CHATRELAY_TIMEOUT_SECS: expected a positive integer, got {raw}"
                    ));
                    None
                }
            },
            None => None,
        };

        if !problems.is_empty() {
            return Err(ClientError::Config(format!(
                "Invalid client configuration:\n{}",
                problems.join("\n")
            )));
        }

        let mut provider = HttpTransport {
            api_key: get("CHATRELAY_API_KEY").map(SecretString::from),
            base_url,
            ..Default::default()
        };
        if let Some(proxy) = get("CHATRELAY_PROXY") {
            provider = provider.with_proxy(proxy);
        }

        tracing::debug!(
            base_url = provider.base_url.as_deref().unwrap_or_default(),
            has_api_key = provider.api_key.is_some(),
            "Loaded client configuration"
        );

        Ok(Self {
            chat_path: get("CHATRELAY_CHAT_PATH").unwrap_or_else(|| DEFAULT_CHAT_PATH.to_string()),
            transport: TransportOptions {
                timeout,
                provider,
            },
        })
    }

    /// Full URL of the completion endpoint.
    pub fn chat_url(&self) -> Result<String, ClientError> {
        self.transport.provider.endpoint(&self.chat_path)
    }
}
