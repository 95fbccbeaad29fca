use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;

use conduit_core::config::GatewayConfig;

use crate::state::AppState;

/// Extractor that enforces the gateway token, when one is configured, via
/// `Authorization: Bearer` or a `?token=` query parameter.
pub struct Authenticated;

impl FromRequestParts<Arc<AppState>> for Authenticated {
    type Rejection = StatusCode;

    fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let bearer = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "));
        let query_token = parts.uri.query().and_then(extract_token_from_query);

        let allowed = is_authorized(&state.config, bearer, query_token);

        async move {
            if allowed {
                Ok(Authenticated)
            } else {
                Err(StatusCode::UNAUTHORIZED)
            }
        }
    }
}

/// No configured token means open access.
fn is_authorized(config: &GatewayConfig, bearer: Option<&str>, query_token: Option<&str>) -> bool {
    match config.token.as_deref() {
        None => true,
        Some(expected) => bearer.or(query_token) == Some(expected),
    }
}

fn extract_token_from_query(query: &str) -> Option<&str> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|t| !t.is_empty())
}
