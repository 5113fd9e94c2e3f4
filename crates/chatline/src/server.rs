//! HTTP server: router assembly, middleware stack and graceful shutdown

use axum::{
    extract::{DefaultBodyLimit, MatchedPath, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, patch},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::api;
use crate::chat_db::ChatDatabase;
use crate::completion::OpenAiCompatibleProvider;
use crate::config::Config;
use crate::metrics;
use crate::service::ChatService;
use crate::shared_state::AppState;

/// Opens the database, wires the service and serves until SIGINT/SIGTERM
pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    info!("Starting chatline server");
    cfg.print_config();
    metrics::init_metrics()?;

    let db = Arc::new(ChatDatabase::new(&cfg.database_path, cfg.db_pool_size)?);
    let provider = Arc::new(OpenAiCompatibleProvider::new(
        cfg.llm_base_url.clone(),
        cfg.llm_api_key.clone(),
        cfg.request_timeout(),
    )?);
    let service = ChatService::new(db, provider, cfg.llm_model.clone());

    let addr = cfg.api_addr().await?;
    let app = build_router(AppState::new(service, cfg));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("chatline server stopped");
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
        ])
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/chats", get(api::list_chats).post(api::create_chat))
        .route("/chats/:chat_id", patch(api::rename_chat).delete(api::delete_chat))
        .route(
            "/chats/:chat_id/messages",
            get(api::get_chat_messages).post(api::stream_chat_messages),
        )
        .route("/admin", get(api::admin_index))
        .route("/admin/stats", get(api::admin_stats));

    Router::new()
        .route("/", get(api::root))
        .route("/hello", get(api::hello))
        .route("/healthz", get(api::healthz))
        .route("/metrics", get(metrics::get_metrics))
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.config.max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .with_state(state)
}

async fn track_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    state.counters.inc_total_requests();

    let response = next.run(req).await;
    metrics::inc_request(&route, response.status().as_str());
    response
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl-C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received; draining connections");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{CompletionEvent, CompletionProvider, CompletionStream, PromptMessage};
    use crate::error::Result;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request as HttpRequest, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    /// Replies "Hello world" to anything
    struct CannedProvider;

    #[async_trait]
    impl CompletionProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn stream_completion(&self, _model: &str, _messages: Vec<PromptMessage>) -> Result<CompletionStream> {
            let events: Vec<Result<CompletionEvent>> = vec![
                Ok(CompletionEvent::TextDelta("Hello ".into())),
                Ok(CompletionEvent::TextDelta("world".into())),
                Ok(CompletionEvent::Finish { usage: None, finish_reason: Some("stop".into()) }),
            ];
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    fn test_router_with(config: Config) -> Router {
        let db = Arc::new(ChatDatabase::new_in_memory().unwrap());
        let service = ChatService::new(db, Arc::new(CannedProvider), "test-model");
        build_router(AppState::new(service, config))
    }

    fn test_router() -> Router {
        test_router_with(Config::default())
    }

    async fn send(app: &Router, request: HttpRequest<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn json_request(method: &str, uri: &str, body: Value) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str, roles: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().method(method).uri(uri);
        if let Some(roles) = roles {
            builder = builder.header("x-user-roles", roles);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn create_chat_id(app: &Router) -> String {
        let (status, body) = send(app, empty_request("POST", "/api/v1/chats", None)).await;
        assert_eq!(status, StatusCode::CREATED);
        let chat: Value = serde_json::from_slice(&body).unwrap();
        chat["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_greeting_routes() {
        let app = test_router();
        let (status, body) = send(&app, empty_request("GET", "/", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"Hello from chatline!");

        let (_, body) = send(&app, empty_request("GET", "/hello", None)).await;
        let hello: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(hello["success"], true);

        let (status, _) = send(&app, empty_request("GET", "/healthz", None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_then_list_chats() {
        let app = test_router();
        let chat_id = create_chat_id(&app).await;

        let (status, body) = send(&app, empty_request("GET", "/api/v1/chats", None)).await;
        assert_eq!(status, StatusCode::OK);
        let chats: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(chats[0]["id"], chat_id.as_str());
        assert!(chats[0]["title"].is_null());
        assert!(chats[0]["createdAt"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_chat_is_404_json() {
        let app = test_router();
        let (status, body) = send(&app, empty_request("GET", "/api/v1/chats/nope/messages", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let error: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["code"], 404);
        assert!(error["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_stream_returns_sse_and_persists() {
        let app = test_router();
        let chat_id = create_chat_id(&app).await;
        let uri = format!("/api/v1/chats/{}/messages", chat_id);

        let request = json_request(
            "POST",
            &uri,
            json!({"messages": [{"id": "u1", "role": "user", "parts": [{"type": "text", "text": "Explain Rust ownership"}]}]}),
        );
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let body = String::from_utf8(body).unwrap();
        assert!(body.contains("\"type\":\"start\""));
        assert!(body.contains("\"type\":\"text-delta\""));
        assert!(body.contains("\"type\":\"finish\""));
        assert!(body.trim_end().ends_with("data: [DONE]"));

        let (_, body) = send(&app, empty_request("GET", &uri, None)).await;
        let messages: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(messages.as_array().unwrap().len(), 2);
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["parts"][0]["text"], "Hello world");
        assert_eq!(messages[1]["parts"][0]["providerMetadata"]["finishReason"], "stop");

        let (_, body) = send(&app, empty_request("GET", "/api/v1/chats", None)).await;
        let chats: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(chats[0]["title"], "Explain Rust Ownership Hello World");
    }

    #[tokio::test]
    async fn test_stream_rejects_bad_bodies_without_side_effects() {
        let app = test_router();
        let chat_id = create_chat_id(&app).await;
        let uri = format!("/api/v1/chats/{}/messages", chat_id);

        let malformed = HttpRequest::builder()
            .method("POST")
            .uri(&uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _) = send(&app, malformed).await;
        assert!(status.is_client_error());

        let (status, _) = send(&app, json_request("POST", &uri, json!({"messages": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(&app, empty_request("GET", &uri, None)).await;
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!([]));
    }

    #[tokio::test]
    async fn test_rename_validates_title() {
        let app = test_router();
        let chat_id = create_chat_id(&app).await;
        let uri = format!("/api/v1/chats/{}", chat_id);

        let (status, body) = send(&app, json_request("PATCH", &uri, json!({"title": "Trip plans"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap()["title"], "Trip plans");

        let (status, _) = send(&app, json_request("PATCH", &uri, json!({"title": "x".repeat(201)}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, json_request("PATCH", &uri, json!({"title": null}))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(serde_json::from_slice::<Value>(&body).unwrap()["title"].is_null());

        let (status, _) = send(&app, json_request("PATCH", "/api/v1/chats/missing", json!({"title": "x"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_requires_admin_role() {
        let app = test_router();
        let chat_id = create_chat_id(&app).await;
        let uri = format!("/api/v1/chats/{}", chat_id);

        let (status, _) = send(&app, empty_request("DELETE", &uri, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&app, empty_request("DELETE", &uri, Some("user"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(&app, empty_request("DELETE", &uri, Some("user, admin"))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, empty_request("GET", &format!("{}/messages", uri), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, empty_request("DELETE", &uri, Some("admin"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_routes() {
        let app = test_router();
        create_chat_id(&app).await;

        let (status, _) = send(&app, empty_request("GET", "/api/v1/admin", Some("user"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&app, empty_request("GET", "/api/v1/admin", Some("admin"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"ok": true}));

        let (status, body) = send(&app, empty_request("GET", "/api/v1/admin/stats", Some("admin"))).await;
        assert_eq!(status, StatusCode::OK);
        let stats: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats["database"]["totalChats"], 1);
        assert_eq!(stats["database"]["untitledChats"], 1);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let app = test_router_with(Config { max_body_bytes: 64, ..Config::default() });
        let chat_id = create_chat_id(&app).await;

        let body = json!({"messages": [{"id": "u1", "role": "user", "parts": [{"type": "text", "text": "y".repeat(500)}]}]})
            .to_string();
        let request = HttpRequest::builder()
            .method("POST")
            .uri(format!("/api/v1/chats/{}/messages", chat_id))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders() {
        metrics::init_metrics().unwrap();
        let app = test_router();
        send(&app, empty_request("GET", "/hello", None)).await;

        let (status, body) = send(&app, empty_request("GET", "/metrics", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("requests_total"));
    }
}
