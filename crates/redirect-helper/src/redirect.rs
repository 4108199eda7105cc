//! Redirect answers: the domain-match layer that runs before routing, and the
//! `/go/{name}` handler.

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::header::{HOST, LOCATION};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::Instrument;

use crate::error::ApiError;
use crate::server::AppState;
use crate::store::EntryKind;
use crate::target;

/// Answer with a redirect when the request's host is a configured domain.
///
/// Runs for every path, API routes included; a matching host never reaches the
/// router.
pub async fn domain_redirect(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(host) = request_host(&request) else {
        return next.run(request).await;
    };

    let target = match state.store.get_target(EntryKind::Domain, &host).await {
        Ok(target) => target,
        Err(_) => return next.run(request).await,
    };

    let uri = request.uri().clone();
    let span = redirect_tracing::redirect_span!(EntryKind::Domain, host);
    async {
        match target::domain_location(&target, &uri) {
            Ok(location) => found(location),
            Err(e) => {
                // host:port pairs that are not URLs (e.g. a named port) go out as-is.
                tracing::warn!(
                    target = %target,
                    error = %e,
                    "Domain target is not a URL, redirecting without the request path"
                );
                found(target::path_location(&target))
            }
        }
    }
    .instrument(span)
    .await
}

/// `GET /go/{*name}`
pub async fn handle_go(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    let span = redirect_tracing::redirect_span!(EntryKind::Path, name);
    async {
        match state.store.get_target(EntryKind::Path, &name).await {
            Ok(target) => found(target::path_location(&target)),
            Err(e) => {
                tracing::debug!(error = %e, "No forwarding");
                ApiError::from(e).into_response()
            }
        }
    }
    .instrument(span)
    .await
}

/// `GET /go/` with nothing after the prefix.
pub async fn handle_go_empty() -> ApiError {
    ApiError::BadRequest("No forwarding name specified".to_string())
}

/// 302 to `location`.
fn found(location: String) -> Response {
    tracing::Span::current().record("location", location.as_str());
    match HeaderValue::try_from(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(e) => ApiError::Internal(format!("Invalid redirect location: {e}")).into_response(),
    }
}

/// Lowercased host of the request without its port, from the `Host` header or
/// the URI authority.
fn request_host(request: &Request) -> Option<String> {
    let raw = request
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| request.uri().authority().map(|a| a.as_str()))?;
    let host = strip_port(raw.trim());
    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 literal: keep through the closing bracket.
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.split_once(':') {
        Some((name, _)) => name,
        None => host,
    }
}
