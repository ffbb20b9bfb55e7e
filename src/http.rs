//! HTTP client utilities shared by the completion transport and the files
//! client.

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::collections::HashMap;

use crate::client::ClientError;
use crate::options::{HttpTransport, TransportOptions};

/// Build a configured HTTP client from transport options.
///
/// This applies common configuration like timeouts and proxies.
///
/// # Example
/// ```ignore
/// let client = build_http_client(&transport_options)?;
/// ```
pub fn build_http_client(
    transport_options: &TransportOptions<HttpTransport>,
) -> Result<Client, ClientError> {
    let mut builder = Client::builder();

    if let Some(timeout) = transport_options.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = &transport_options.provider.proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| ClientError::Config(format!("invalid proxy {proxy_url}: {e}")))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Add extra headers to a request if specified in transport options.
///
/// # Example
/// ```ignore
/// let mut req = client.post(url);
/// req = add_extra_headers(req, &transport_options.provider.extra_headers);
/// ```
pub fn add_extra_headers(
    mut request: RequestBuilder,
    extra_headers: &Option<HashMap<String, String>>,
) -> RequestBuilder {
    if let Some(headers) = extra_headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    request
}

/// Apply bearer auth and extra headers from the transport options.
pub fn authorize(request: RequestBuilder, transport: &HttpTransport) -> RequestBuilder {
    let request = match &transport.api_key {
        Some(key) => request.header(AUTHORIZATION, format!("Bearer {}", key.expose_secret())),
        None => request,
    };
    add_extra_headers(request, &transport.extra_headers)
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Build the error for a non-success response.
///
/// The message is taken from a JSON body of the form `{"error": "..."}`;
/// when the body is missing or not of that shape it falls back to
/// `HTTP <status>: <reason>`.
pub fn api_error(status: u16, reason: &str, body: &[u8]) -> ClientError {
    let parsed = serde_json::from_slice::<ErrorBody>(body).unwrap_or_default();
    let message = parsed
        .error
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {status}: {reason}"));

    ClientError::Api {
        status,
        message,
        code: parsed.code,
    }
}

/// Collect a non-success `reqwest` response into an [`ClientError::Api`].
pub async fn error_from_response(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let reason = status.canonical_reason().unwrap_or_default().to_string();
    let body = response.bytes().await.unwrap_or_default();
    api_error(status.as_u16(), &reason, &body)
}
