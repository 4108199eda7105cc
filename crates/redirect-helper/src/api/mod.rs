//! JSON API under `/api`: token-gated upserts, admin listing and removal, and
//! batch updates.

mod extract;
pub mod request_id;

pub use extract::{Params, RequestContext};

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Serialize;
use tracing::Instrument;

use crate::auth::{self, TokenKind};
use crate::batch::{self, BatchRequest};
use crate::error::{ApiError, Envelope, State as Outcome};
use crate::server::AppState;
use crate::store::{Entry, EntryKind, Store, Upserted};
use crate::target;

#[derive(Debug, Serialize)]
struct ForwardingView {
    name: String,
    #[serde(flatten)]
    entry: Entry,
}

#[derive(Debug, Serialize)]
struct DomainView {
    domain: String,
    #[serde(flatten)]
    entry: Entry,
}

#[derive(Debug, Serialize)]
struct ForwardingList {
    state: Outcome,
    forwardings: Vec<ForwardingView>,
}

#[derive(Debug, Serialize)]
struct DomainList {
    state: Outcome,
    domains: Vec<DomainView>,
}

/// `GET /api/update?name=&token=&target=`
pub async fn update(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    params: Params,
) -> Response {
    let work = set_target(&state.store, EntryKind::Path, &params);
    instrumented(&ctx, "/api/update", &params, work).await
}

/// `GET /api/update-domain?domain=&token=&target=`
pub async fn update_domain(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    params: Params,
) -> Response {
    let work = set_target(&state.store, EntryKind::Domain, &params);
    instrumented(&ctx, "/api/update-domain", &params, work).await
}

/// `GET /api/list?admin_token=`
pub async fn list(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    params: Params,
) -> Response {
    let work = async {
        require_admin(&state.store, &params).await?;
        let forwardings = state
            .store
            .list(EntryKind::Path)
            .await
            .into_iter()
            .map(|(name, entry)| ForwardingView { name, entry })
            .collect::<Vec<_>>();
        tracing::debug!(count = forwardings.len(), "Listed forwardings");
        Ok::<_, ApiError>(Json(ForwardingList {
            state: Outcome::Success,
            forwardings,
        })
        .into_response())
    };
    instrumented(&ctx, "/api/list", &params, work).await
}

/// `GET /api/list-domains?admin_token=`
pub async fn list_domains(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    params: Params,
) -> Response {
    let work = async {
        require_admin(&state.store, &params).await?;
        let domains = state
            .store
            .list(EntryKind::Domain)
            .await
            .into_iter()
            .map(|(domain, entry)| DomainView { domain, entry })
            .collect::<Vec<_>>();
        tracing::debug!(count = domains.len(), "Listed domains");
        Ok::<_, ApiError>(Json(DomainList {
            state: Outcome::Success,
            domains,
        })
        .into_response())
    };
    instrumented(&ctx, "/api/list-domains", &params, work).await
}

/// `DELETE /api/remove?name=&admin_token=`
pub async fn remove(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    params: Params,
) -> Response {
    let work = remove_entry(&state.store, EntryKind::Path, &params);
    instrumented(&ctx, "/api/remove", &params, work).await
}

/// `DELETE /api/remove-domain?domain=&admin_token=`
pub async fn remove_domain(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    params: Params,
) -> Response {
    let work = remove_entry(&state.store, EntryKind::Domain, &params);
    instrumented(&ctx, "/api/remove-domain", &params, work).await
}

/// `GET /api/batch-update` with suffixed query parameters.
pub async fn batch_update_query(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    params: Params,
) -> Response {
    let work = run_batch(&state.store, batch::parse_query(params.pairs()));
    instrumented(&ctx, "/api/batch-update", &params, work).await
}

/// `POST /api/batch-update` with a JSON body.
pub async fn batch_update_json(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    params: Params,
    body: Bytes,
) -> Response {
    let work = async {
        let request: BatchRequest = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))?;
        run_batch(&state.store, request).await
    };
    instrumented(&ctx, "/api/batch-update", &params, work).await
}

async fn set_target(
    store: &Store,
    kind: EntryKind,
    params: &Params,
) -> Result<Response, ApiError> {
    let (key_param, token_kind) = match kind {
        EntryKind::Path => ("name", TokenKind::Redirect),
        EntryKind::Domain => ("domain", TokenKind::Domain),
    };
    let key = params.get(key_param);
    let target = params.get("target");

    // An absent token is an authorization failure, not a 400.
    if key.is_empty() || target.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "Missing required parameters: {key_param}, token, target"
        )));
    }
    if !target::is_valid(target) {
        return Err(ApiError::BadRequest(
            "Invalid target format. Expected a URL or host:port".to_string(),
        ));
    }
    authorize(store, token_kind, params.token("token")).await?;

    let outcome = store.upsert(kind, key, target).await?;
    tracing::info!(
        kind = %kind,
        key = %key,
        target = %target,
        created = outcome == Upserted::Created,
        "Entry saved"
    );
    Ok(Json(Envelope::success()).into_response())
}

async fn remove_entry(
    store: &Store,
    kind: EntryKind,
    params: &Params,
) -> Result<Response, ApiError> {
    require_admin(store, params).await?;

    let key_param = match kind {
        EntryKind::Path => "name",
        EntryKind::Domain => "domain",
    };
    let key = params.get(key_param);
    if key.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "Missing required parameter: {key_param}"
        )));
    }

    store.remove(kind, key).await?;
    tracing::info!(kind = %kind, key = %key, "Entry removed");
    Ok(Json(Envelope::success()).into_response())
}

async fn run_batch(store: &Store, request: BatchRequest) -> Result<Response, ApiError> {
    if request.entries.is_empty() {
        return Err(ApiError::BadRequest("No entries to update".to_string()));
    }
    let response = batch::apply(store, request).await;
    tracing::info!(
        total = response.summary.total,
        succeeded = response.summary.succeeded,
        failed = response.summary.failed,
        "Batch applied"
    );
    Ok(Json(response).into_response())
}

async fn require_admin(store: &Store, params: &Params) -> Result<(), ApiError> {
    authorize(store, TokenKind::Admin, params.token("admin_token")).await
}

/// Check `presented` against the stored token of `kind`. Missing, empty and
/// wrong tokens all answer 401; the precise reason only goes to the log.
async fn authorize(store: &Store, kind: TokenKind, presented: &str) -> Result<(), ApiError> {
    let settings = store.settings().await;
    auth::authorize(kind, presented, &settings).map_err(|reason| {
        tracing::warn!(
            reason = %reason,
            presented = %auth::mask(presented),
            "Authorization failed"
        );
        ApiError::Unauthorized(format!("Unauthorized. Valid {kind} token required."))
    })
}

/// Run `work` inside a request span, then log and tag the outcome.
async fn instrumented<F>(ctx: &RequestContext, endpoint: &str, params: &Params, work: F) -> Response
where
    F: Future<Output = Result<Response, ApiError>>,
{
    let span = redirect_tracing::api_request_span!(ctx.request_id, endpoint);
    async {
        let result = work.await;
        finish(ctx, endpoint, params, result)
    }
    .instrument(span)
    .await
}

fn finish(
    ctx: &RequestContext,
    endpoint: &str,
    params: &Params,
    result: Result<Response, ApiError>,
) -> Response {
    let (mut response, label) = match result {
        Ok(response) => (response, "success"),
        Err(e) => {
            let label = e.label();
            (e.into_response(), label)
        }
    };
    let status = response.status().as_u16();

    let span = tracing::Span::current();
    span.record("status", status);
    span.record("result", label);
    tracing::info!(
        method = %ctx.method,
        endpoint = %endpoint,
        client = %ctx.client,
        status,
        params = %loggable(params),
        result = label,
        "API request"
    );

    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response
            .headers_mut()
            .insert(request_id::REQUEST_ID_HEADER, value);
    }
    response
}

/// Query pairs for the log line, with token values masked.
fn loggable(params: &Params) -> String {
    params
        .pairs()
        .iter()
        .map(|(key, value)| {
            if key.contains("token") {
                format!("{key}={}", auth::mask(value))
            } else {
                format!("{key}={value}")
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}
