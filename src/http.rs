//! Shared reqwest plumbing for the embedding and generation clients.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};

/// Placeholder used when an error response body cannot be read.
pub(crate) const BODY_UNAVAILABLE: &str = "<body unavailable>";

/// How the API key travels with each request.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ApiKeyHeader {
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// A dedicated header carrying the raw key.
    Named(&'static str),
}

/// Builds a JSON client that sends `api_key` on every request.
pub(crate) fn json_client(
    api_key: &str,
    header: ApiKeyHeader,
    timeout: Duration,
) -> Result<Client, String> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err("missing API key".into());
    }
    let mut headers = HeaderMap::new();
    match header {
        ApiKeyHeader::Bearer => {
            let auth = format!("Bearer {api_key}");
            let value = HeaderValue::from_str(&auth).map_err(|_| "invalid API key".to_string())?;
            headers.insert(AUTHORIZATION, value);
        }
        ApiKeyHeader::Named(name) => {
            let mut value =
                HeaderValue::from_str(api_key).map_err(|_| "invalid API key".to_string())?;
            value.set_sensitive(true);
            headers.insert(HeaderName::from_static(name), value);
        }
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .map_err(|err| format!("failed to build HTTP client: {err}"))
}

/// Reads an error body without failing the caller.
pub(crate) async fn error_body(response: Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| BODY_UNAVAILABLE.to_string())
}

/// Joins a base URL and a path with exactly one slash.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_with_single_slash() {
        assert_eq!(
            endpoint("https://api.openai.com/v1/", "/embeddings"),
            "https://api.openai.com/v1/embeddings"
        );
    }

    #[test]
    fn blank_keys_are_rejected() {
        let err = json_client("  ", ApiKeyHeader::Bearer, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err, "missing API key");
    }
}
