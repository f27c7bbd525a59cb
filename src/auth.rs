//! API-key authentication for the HTTP adapter.
//!
//! When auth is enabled, every non-preflight request must present the
//! configured key, either as `Authorization: Bearer <key>` or in an
//! `x-api-key` header. Key comparison is constant-time.

use crate::config::ApiConfig;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

#[derive(Clone)]
pub struct AuthState {
    pub config: ApiConfig,
}

pub fn create_auth_state(config: ApiConfig) -> Arc<AuthState> {
    Arc::new(AuthState { config })
}

/// How a request presented its credential.
enum Credential<'a> {
    Bearer(&'a str),
    ApiKeyHeader(&'a str),
}

impl<'a> Credential<'a> {
    fn token(&self) -> &'a str {
        match self {
            Credential::Bearer(token) | Credential::ApiKeyHeader(token) => token,
        }
    }
}

/// Pull the credential out of the request headers. A standard
/// `Authorization` header wins over the custom one when both are present.
fn extract_credential(headers: &HeaderMap) -> std::result::Result<Credential<'_>, &'static str> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let text = value
            .to_str()
            .map_err(|_| "authorization header is not valid ASCII")?;
        return match text.split_once(' ') {
            Some(("Bearer", token)) if !token.trim().is_empty() => {
                Ok(Credential::Bearer(token.trim()))
            }
            _ => Err("authorization header is not a Bearer credential"),
        };
    }

    if let Some(value) = headers.get("x-api-key") {
        let text = value
            .to_str()
            .map_err(|_| "x-api-key header is not valid ASCII")?;
        return Ok(Credential::ApiKeyHeader(text));
    }

    Err("no credential supplied")
}

/// Constant-time key check; mismatch reveals nothing about where the
/// strings diverge.
fn key_matches(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn deny(status: StatusCode) -> Response {
    let label = if status == StatusCode::UNAUTHORIZED {
        "Unauthorized"
    } else {
        "Internal Server Error"
    };
    (status, Json(json!({ "error": label }))).into_response()
}

pub async fn auth_middleware(
    State(auth): State<Arc<AuthState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if !auth.config.enable_auth {
        return next.run(request).await;
    }

    // Browsers send CORS preflights without credentials; they must pass
    // for the credentialed request to ever happen.
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let route = request.uri().path().to_string();
    let Some(expected) = auth.config.api_key.as_deref() else {
        warn!(route = %route, "authentication enabled without a configured key");
        return deny(StatusCode::INTERNAL_SERVER_ERROR);
    };

    match extract_credential(&headers) {
        Ok(credential) if key_matches(credential.token(), expected) => next.run(request).await,
        Ok(_) => {
            warn!(route = %route, "credential did not match the configured key");
            deny(StatusCode::UNAUTHORIZED)
        }
        Err(reason) => {
            warn!(route = %route, reason, "request carried no usable credential");
            deny(StatusCode::UNAUTHORIZED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_credential_extraction() {
        let headers = headers_with("authorization", "Bearer sekrit-token");
        match extract_credential(&headers) {
            Ok(credential) => assert_eq!(credential.token(), "sekrit-token"),
            Err(reason) => panic!("expected credential, got: {reason}"),
        }
    }

    #[test]
    fn test_authorization_without_bearer_scheme_is_rejected() {
        let headers = headers_with("authorization", "Basic dXNlcjpwdw==");
        assert!(extract_credential(&headers).is_err());

        let empty = headers_with("authorization", "Bearer   ");
        assert!(extract_credential(&empty).is_err());
    }

    #[test]
    fn test_api_key_header_is_fallback() {
        let headers = headers_with("x-api-key", "direct-key");
        match extract_credential(&headers) {
            Ok(credential) => assert_eq!(credential.token(), "direct-key"),
            Err(reason) => panic!("expected credential, got: {reason}"),
        }

        assert!(extract_credential(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_key_matching() {
        assert!(key_matches("abc123", "abc123"));
        assert!(!key_matches("abc123", "abc124"));
        assert!(!key_matches("short", "a-much-longer-key"));
    }
}
