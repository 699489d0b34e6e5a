// Security gate for both API surfaces
//
// Desktop surface: a shared secret from the `x-api-key` header or the
// `api_key` query parameter, compared in constant time.
// Session surface: no secret, only an identity fingerprint for attribution.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use shared_types::{Identity, Surface};
use subtle::ConstantTimeEq;

use crate::ErrorResponse;

/// Desktop-surface credential header
pub const API_KEY_HEADER: &str = "x-api-key";
/// Desktop-surface credential query parameter
pub const API_KEY_QUERY_PARAM: &str = "api_key";

/// What the gate needs to know about an inbound request
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub remote_addr: Option<SocketAddr>,
    pub user_agent: String,
    pub header_key: Option<String>,
    pub query_key: Option<String>,
}

impl RequestContext {
    pub fn from_parts(
        headers: &HeaderMap,
        query: Option<&HashMap<String, String>>,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let header_value = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };

        Self {
            remote_addr,
            user_agent: header_value(USER_AGENT.as_str()).unwrap_or_default(),
            header_key: header_value(API_KEY_HEADER),
            query_key: query.and_then(|q| q.get(API_KEY_QUERY_PARAM).cloned()),
        }
    }

    /// Header credential if non-empty, else the query credential
    fn credential(&self) -> Option<&str> {
        self.header_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .or(self.query_key.as_deref())
    }

    fn origin(&self) -> String {
        self.remote_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Unauthorized")]
    Unauthorized,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

/// Authenticates requests for either surface. Holds no per-request state.
#[derive(Clone)]
pub struct SecurityGate {
    api_key: Option<String>,
}

impl std::fmt::Debug for SecurityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityGate")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl SecurityGate {
    /// `None` (or an empty key) rejects every desktop call
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|key| !key.is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Fingerprint used for attribution on both surfaces
    pub fn fingerprint(&self, ctx: &RequestContext) -> Identity {
        Identity::derive(&ctx.origin(), &ctx.user_agent)
    }

    fn credential_matches(&self, provided: &str) -> bool {
        match &self.api_key {
            Some(expected) => provided.as_bytes().ct_eq(expected.as_bytes()).into(),
            None => false,
        }
    }

    pub fn authenticate(&self, surface: Surface, ctx: &RequestContext) -> Result<Identity, AuthError> {
        match surface {
            Surface::Session => Ok(self.fingerprint(ctx)),
            Surface::Desktop => {
                let authorized = ctx
                    .credential()
                    .map(|key| self.credential_matches(key))
                    .unwrap_or(false);
                if authorized {
                    Ok(self.fingerprint(ctx))
                } else {
                    tracing::warn!(origin = %ctx.origin(), "Rejected desktop request with bad or missing API key");
                    Err(AuthError::Unauthorized)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn ctx(header: Option<&str>, query: Option<&str>) -> RequestContext {
        let mut headers = HeaderMap::new();
        if let Some(key) = header {
            headers.insert(API_KEY_HEADER, HeaderValue::from_str(key).unwrap());
        }
        headers.insert(USER_AGENT, HeaderValue::from_static("pbi-desktop/1.0"));
        let mut params = HashMap::new();
        if let Some(key) = query {
            params.insert(API_KEY_QUERY_PARAM.to_string(), key.to_string());
        }
        RequestContext::from_parts(&headers, Some(&params), "192.168.1.20:5123".parse().ok())
    }

    #[test]
    fn test_desktop_accepts_header_or_query_key() {
        let gate = SecurityGate::new(Some("s3cret".to_string()));
        assert!(gate.authenticate(Surface::Desktop, &ctx(Some("s3cret"), None)).is_ok());
        assert!(gate.authenticate(Surface::Desktop, &ctx(None, Some("s3cret"))).is_ok());
        assert!(gate.authenticate(Surface::Desktop, &ctx(Some(""), Some("s3cret"))).is_ok());
    }

    #[test]
    fn test_desktop_rejects_wrong_or_missing_key() {
        let gate = SecurityGate::new(Some("s3cret".to_string()));
        assert_eq!(
            gate.authenticate(Surface::Desktop, &ctx(Some("s3cret2"), None)),
            Err(AuthError::Unauthorized)
        );
        assert_eq!(
            gate.authenticate(Surface::Desktop, &ctx(None, None)),
            Err(AuthError::Unauthorized)
        );
        // header wins over query
        assert!(gate
            .authenticate(Surface::Desktop, &ctx(Some("wrong"), Some("s3cret")))
            .is_err());
    }

    #[test]
    fn test_unconfigured_gate_rejects_everything() {
        let gate = SecurityGate::new(Some(String::new()));
        assert!(!gate.is_configured());
        assert!(gate.authenticate(Surface::Desktop, &ctx(Some(""), Some(""))).is_err());
    }

    #[test]
    fn test_session_surface_only_fingerprints() {
        let gate = SecurityGate::new(None);
        let identity = gate.authenticate(Surface::Session, &ctx(None, None)).unwrap();
        assert_eq!(identity, Identity::derive("192.168.1.20", "pbi-desktop/1.0"));
    }
}
