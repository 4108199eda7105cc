//! Axum HTTP server: router, listener, graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{Method, Uri};
use axum::middleware;
use axum::response::Html;
use axum::routing::{delete, get};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::error::ApiError;
use crate::redirect;
use crate::store::Store;

/// Shared application state.
pub struct AppState {
    pub store: Store,
}

/// All routes, with the domain-redirect layer in front of every one of them
/// (the 404 fallback included).
pub fn router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/", get(handle_index).fallback(method_not_allowed))
        .route("/go/", get(redirect::handle_go_empty).fallback(method_not_allowed))
        .route("/go/{*name}", get(redirect::handle_go).fallback(method_not_allowed))
        .route("/api/update", get(api::update).fallback(method_not_allowed))
        .route("/api/update-domain", get(api::update_domain).fallback(method_not_allowed))
        .route("/api/list", get(api::list).fallback(method_not_allowed))
        .route("/api/list-domains", get(api::list_domains).fallback(method_not_allowed))
        .route("/api/remove", delete(api::remove).fallback(method_not_allowed))
        .route("/api/remove-domain", delete(api::remove_domain).fallback(method_not_allowed))
        .route(
            "/api/batch-update",
            get(api::batch_update_query)
                .post(api::batch_update_json)
                .fallback(batch_method_not_allowed),
        )
        .fallback(handle_not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            redirect::domain_redirect,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build and run the HTTP server until Ctrl+C.
pub async fn run(state: AppState, listen_addr: &str) -> anyhow::Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(address = %listen_addr, "redirect-helper listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("redirect-helper shut down gracefully");
    Ok(())
}

async fn handle_index() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

async fn handle_not_found(uri: Uri) -> ApiError {
    tracing::debug!(path = %uri.path(), "No route");
    ApiError::NotFound("Not found".to_string())
}

async fn method_not_allowed(method: Method, uri: Uri) -> ApiError {
    tracing::warn!(method = %method, path = %uri.path(), "Method not allowed");
    ApiError::MethodNotAllowed("Method not allowed".to_string())
}

async fn batch_method_not_allowed(method: Method) -> ApiError {
    tracing::warn!(method = %method, path = "/api/batch-update", "Method not allowed");
    ApiError::MethodNotAllowed("Method not allowed. Use GET or POST".to_string())
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C; shutting down");
        return;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::header::{HOST, LOCATION};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::store::{Document, Settings};

    const ADMIN: &str = "admin-token-0001";
    const REDIRECT: &str = "redirect-token-0002";
    const DOMAIN: &str = "domain-token-0003";

    fn document() -> Document {
        Document {
            server: Settings {
                admin_token: ADMIN.into(),
                redirect_token: REDIRECT.into(),
                domain_token: DOMAIN.into(),
                ..Settings::default()
            },
            ..Document::default()
        }
    }

    fn app_with(document: Document) -> Router {
        router(AppState {
            store: Store::in_memory(document),
        })
    }

    fn app() -> Router {
        app_with(document())
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, location, body)
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, Option<String>, Value) {
        send(app, Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn delete(app: &Router, uri: &str) -> (StatusCode, Option<String>, Value) {
        send(app, Request::delete(uri).body(Body::empty()).unwrap()).await
    }

    #[tokio::test]
    async fn test_update_then_go_redirects() {
        let app = app();
        let (status, _, body) = get(
            &app,
            &format!("/api/update?name=docs&token={REDIRECT}&target=docs.internal:8080"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "state": "success" }));

        let (status, location, _) = get(&app, "/go/docs").await;
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(location.as_deref(), Some("http://docs.internal:8080"));

        let target = "https://wiki.example.com/x";
        get(&app, &format!("/api/update?name=team/wiki&token={REDIRECT}&target={target}")).await;
        let (status, location, _) = get(&app, "/go/team/wiki").await;
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(location.as_deref(), Some("https://wiki.example.com/x"));
    }

    #[tokio::test]
    async fn test_update_is_idempotent() {
        let app = app();
        let uri = format!("/api/update?name=a&token={REDIRECT}&target=x:1");
        for _ in 0..3 {
            let (status, _, _) = get(&app, &uri).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (_, _, body) = get(&app, &format!("/api/list?admin_token={ADMIN}")).await;
        let forwardings = body["forwardings"].as_array().unwrap();
        assert_eq!(forwardings.len(), 1);
        assert_eq!(forwardings[0]["name"], "a");
        assert_eq!(forwardings[0]["target"], "x:1");
    }

    #[tokio::test]
    async fn test_update_rejects_wrong_or_empty_token() {
        let app = app();
        get(&app, &format!("/api/update?name=a&token={REDIRECT}&target=x:1")).await;

        // The domain token does not open path updates.
        let with_domain_token = format!("/api/update?name=a&token={DOMAIN}&target=x:2");
        for uri in [
            "/api/update?name=a&token=wrong&target=x:2",
            "/api/update?name=a&token=&target=x:2",
            "/api/update?name=a&target=x:2",
            "/api/update?name=new&token=wrong&target=x:2",
            with_domain_token.as_str(),
        ] {
            let (status, _, body) = get(&app, uri).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(body["state"], "error");
        }

        let (_, location, _) = get(&app, "/go/a").await;
        assert_eq!(location.as_deref(), Some("http://x:1"));
    }

    #[tokio::test]
    async fn test_update_validates_parameters() {
        let app = app();
        let (status, _, body) =
            get(&app, &format!("/api/update?token={REDIRECT}&target=x:1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Missing required parameters: name, token, target");

        let (status, _, _) =
            get(&app, &format!("/api/update?name=a&token={REDIRECT}&target=nope")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bearer_token_accepted() {
        let app = app();
        let request = Request::get("/api/list")
            .header("authorization", format!("Bearer {ADMIN}"))
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "state": "success", "forwardings": [] }));
    }

    #[tokio::test]
    async fn test_list_requires_admin_token() {
        let app = app();
        for uri in [
            "/api/list".to_string(),
            "/api/list?admin_token=wrong".to_string(),
            format!("/api/list?admin_token={REDIRECT}"),
            "/api/list-domains".to_string(),
            format!("/api/list-domains?admin_token={DOMAIN}"),
        ] {
            let (status, _, _) = get(&app, &uri).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_list_rejects_unconfigured_admin_token() {
        let mut document = document();
        document.server.admin_token.clear();
        let app = app_with(document);
        let (status, _, _) = get(&app, "/api/list?admin_token=").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_domain_update_and_redirect() {
        let app = app();
        let target = "https://new.example.org";
        let uri =
            format!("/api/update-domain?domain=Old.Example.com&token={DOMAIN}&target={target}");
        let (status, _, _) = get(&app, &uri).await;
        assert_eq!(status, StatusCode::OK);

        let request = Request::get("/some/page?x=1")
            .header(HOST, "old.example.com:8001")
            .body(Body::empty())
            .unwrap();
        let (status, location, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(location.as_deref(), Some("https://new.example.org/some/page?x=1"));

        let (_, _, body) = get(&app, &format!("/api/list-domains?admin_token={ADMIN}")).await;
        assert_eq!(body["domains"][0]["domain"], "old.example.com");
        assert_eq!(body["domains"][0]["target"], "https://new.example.org");
    }

    #[tokio::test]
    async fn test_domain_match_preempts_api_routes() {
        let app = app();
        let target = "elsewhere.example:8443";
        let uri = format!("/api/update-domain?domain=short.example&token={DOMAIN}&target={target}");
        get(&app, &uri).await;

        let request = Request::get(format!("/api/list?admin_token={ADMIN}"))
            .header(HOST, "short.example")
            .body(Body::empty())
            .unwrap();
        let (status, location, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(
            location.as_deref(),
            Some(format!("http://elsewhere.example:8443/api/list?admin_token={ADMIN}").as_str())
        );

        // Unknown paths and wrong methods redirect too.
        let request = Request::post("/nowhere")
            .header(HOST, "short.example")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::FOUND);

        // Other hosts still reach the API.
        let request = Request::get(format!("/api/list?admin_token={ADMIN}"))
            .header(HOST, "localhost:8001")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_go_missing_and_empty() {
        let app = app();
        let (status, _, body) = get(&app, "/go/absent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["state"], "error");

        let (status, _, body) = get(&app, "/go/").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No forwarding name specified");
    }

    #[tokio::test]
    async fn test_remove_flow() {
        let app = app();
        get(&app, &format!("/api/update?name=a&token={REDIRECT}&target=x:1")).await;

        let (status, _, _) = delete(&app, "/api/remove?name=a&admin_token=wrong").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, _) = delete(&app, &format!("/api/remove?admin_token={ADMIN}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, body) =
            delete(&app, &format!("/api/remove?name=a&admin_token={ADMIN}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "state": "success" }));

        let (status, _, _) = delete(&app, &format!("/api/remove?name=a&admin_token={ADMIN}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = get(&app, "/go/a").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let uri = format!("/api/remove-domain?domain=none.example&admin_token={ADMIN}");
        let (status, _, _) = delete(&app, &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wrong_method_is_json_405() {
        let app = app();
        let (status, _, body) = delete(&app, "/api/update?name=a").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body, json!({ "state": "error", "message": "Method not allowed" }));

        let (status, _, _) = get(&app, &format!("/api/remove?name=a&admin_token={ADMIN}")).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _, body) = delete(&app, "/api/batch-update").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["message"], "Method not allowed. Use GET or POST");
    }

    #[tokio::test]
    async fn test_capacity_over_http() {
        let mut document = document();
        document.server.max_redirect_count = 1;
        let app = app_with(document);

        let (status, _, _) =
            get(&app, &format!("/api/update?name=a&token={REDIRECT}&target=x:1")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, body) =
            get(&app, &format!("/api/update?name=b&token={REDIRECT}&target=x:2")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "maximum redirect count (1) reached");

        let (status, _, _) =
            get(&app, &format!("/api/update?name=a&token={REDIRECT}&target=x:3")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_batch_partial_over_get() {
        let app = app();
        let uri = format!(
            "/api/batch-update?redirect_token={REDIRECT}&name1=a&target1=x:1&domain2=b.io&target2=z"
        );
        let (status, _, body) = get(&app, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "partial");
        assert_eq!(body["summary"], json!({ "total": 2, "succeeded": 1, "failed": 1 }));
        assert_eq!(body["results"][0]["success"], true);
        assert_eq!(body["results"][1]["success"], false);

        let (_, location, _) = get(&app, "/go/a").await;
        assert_eq!(location.as_deref(), Some("http://x:1"));
    }

    #[tokio::test]
    async fn test_batch_over_post() {
        let app = app();
        let body = json!({
            "redirect_token": REDIRECT,
            "domain_token": DOMAIN,
            "entries": [
                { "name": "a", "target": "x:1" },
                { "domain": "d.example.com", "target": "https://github.com" }
            ]
        });
        let request = Request::post("/api/batch-update")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "success");
        assert_eq!(body["message"], "All entries updated successfully");

        let request = Request::post("/api/batch-update")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().starts_with("Invalid JSON body"));

        let request = Request::post("/api/batch-update")
            .body(Body::from(r#"{"entries": []}"#))
            .unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No entries to update");
    }

    #[tokio::test]
    async fn test_batch_get_without_items() {
        let app = app();
        let (status, _, body) =
            get(&app, &format!("/api/batch-update?redirect_token={REDIRECT}&name1=a")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No entries to update");
    }

    #[tokio::test]
    async fn test_index_and_unknown_paths() {
        let app = app();
        let response = app
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("/api/batch-update"));

        let (status, _, body) = get(&app, "/favicon.ico").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "state": "error", "message": "Not found" }));
    }

    #[tokio::test]
    async fn test_persist_failure_is_500_and_keeps_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        let (store, created) = Store::open_or_init(sub.join("store.json")).await.unwrap();
        assert!(created);
        let token = store.settings().await.redirect_token;

        // The store's directory becomes a plain file, so every rewrite fails.
        std::fs::remove_dir_all(&sub).unwrap();
        std::fs::write(&sub, b"").unwrap();
        let app = router(AppState { store });

        let (status, _, body) =
            get(&app, &format!("/api/update?name=a&token={token}&target=x:1")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "state": "error", "message": "storage failure" }));

        let (status, location, _) = get(&app, "/go/a").await;
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(location.as_deref(), Some("http://x:1"));
    }

    #[tokio::test]
    async fn test_domain_target_that_is_not_a_url() {
        let app = app();
        let target = "backend:notaport";
        let uri = format!("/api/update-domain?domain=h.example&token={DOMAIN}&target={target}");
        let (status, _, _) = get(&app, &uri).await;
        assert_eq!(status, StatusCode::OK);

        let request = Request::get("/x")
            .header(HOST, "h.example")
            .body(Body::empty())
            .unwrap();
        let (status, location, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(location.as_deref(), Some("http://backend:notaport"));
    }

    #[tokio::test]
    async fn test_api_responses_carry_request_id() {
        let app = app();
        let response = app
            .oneshot(Request::get("/api/list").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.headers().contains_key(api::request_id::REQUEST_ID_HEADER));
    }
}
