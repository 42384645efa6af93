use std::fmt::Display;

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    RequestError(#[source] reqwest::Error),
    // All non-success status codes, once retries are exhausted
    ApiError(u16, Box<Url>, String),
    InvalidUrl(String),
    ParseError(Box<Url>, #[source] serde_json::Error),
    InvalidConfig(String),
}

impl Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::RequestError(err) => write!(f, "Request error: {err}"),
            ClientError::InvalidUrl(msg) => write!(f, "Failed to build URL: {msg}"),
            ClientError::InvalidConfig(msg) => write!(f, "Invalid client configuration: {msg}"),
            ClientError::ParseError(url, err) => {
                write!(f, "Failed to parse response from '{url}': {err}")
            }
            ClientError::ApiError(status, url, body) => {
                // We only parse the api error on display, so that non-JSON bodies are kept as-is
                match serde_json::from_str::<ApiErrorResponse>(body) {
                    Ok(api_error) => write!(f, "API error: status='{status}' {api_error}"),
                    Err(_) => write!(
                        f,
                        "API error: status='{status}' url='{url}' message='{body}'",
                    ),
                }
            }
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        ClientError::RequestError(error)
    }
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::ApiError(status, _, _) => Some(*status),
            ClientError::RequestError(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True when the service refused to create something because it already exists.
    /// Statsig answers duplicate tags with a 400 rather than a 409, so the body is checked too.
    pub fn is_conflict(&self) -> bool {
        match self {
            ClientError::ApiError(409, _, _) => true,
            ClientError::ApiError(400, _, body) => {
                body.to_ascii_lowercase().contains("already exists")
            }
            _ => false,
        }
    }
}

/// Error body shape shared (loosely) by both flag services.
#[derive(Deserialize, Debug)]
pub struct ApiErrorResponse {
    code: Option<String>,
    message: String,
}

impl Display for ApiErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(code) = &self.code {
            write!(f, "code='{code}' ")?;
        }
        write!(f, "message='{}'", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(status: u16, body: &str) -> ClientError {
        let url = Url::parse("https://statsigapi.net/console/v1/tags").unwrap();
        ClientError::ApiError(status, Box::new(url), body.to_string())
    }

    #[test]
    fn test_conflict_detection() {
        assert!(api_error(409, "").is_conflict());
        assert!(api_error(400, r#"{"status":400,"message":"Tag already exists"}"#).is_conflict());
        assert!(!api_error(400, r#"{"status":400,"message":"name is required"}"#).is_conflict());
        assert!(!api_error(500, "already exists").is_conflict());
    }

    #[test]
    fn test_display_parses_json_error_bodies() {
        let err = api_error(404, r#"{"code":"not_found","message":"Unknown project"}"#);

        assert_eq!(
            err.to_string(),
            "API error: status='404' code='not_found' message='Unknown project'"
        );
    }

    #[test]
    fn test_display_keeps_raw_bodies() {
        let err = api_error(502, "bad gateway");

        assert_eq!(
            err.to_string(),
            "API error: status='502' url='https://statsigapi.net/console/v1/tags' message='bad gateway'"
        );
        assert_eq!(err.status(), Some(502));
    }
}
