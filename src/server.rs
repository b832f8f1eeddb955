use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::execution::ExecutionEngine;
use crate::loader::parse_grab;
use crate::rate_limit::{limit_by_ip, ClientRateLimit};

const WELCOME_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Welcome to webGrabber</title>
    <style>
        body { font-family: Arial, sans-serif; margin: 0; padding: 0; height: 100vh; display: flex; justify-content: center; align-items: flex-start; background-color: #f4f4f4; }
        .card { margin-top: 40px; width: 430px; background-color: #fff; box-shadow: 0 4px 8px rgba(0,0,0,0.1); padding: 20px; border-radius: 8px; text-align: center; }
        h1 { color: #4A90E2; font-size: 24px; }
        p { color: #555; font-size: 16px; }
        .info { margin-top: 20px; font-size: 14px; color: #333; }
        .code { background-color: #f5f5f5; border-left: 3px solid #4A90E2; padding: 10px; margin: 10px 0; word-wrap: break-word; }
    </style>
</head>
<body>
    <div class="card">
        <h1>Welcome to webGrabber</h1>
        <p>The robust, config-based web scraping and automation tool.</p>
        <div class="info">
            To run a grab configuration, send a <b>POST</b> request to the following endpoint:
            <div class="code">http://localhost:{port}/grab</div>
            Include your grab configuration in the request's JSON payload.<br>
            Check the documentation for more information.
        </div>
    </div>
</body>
</html>
"#;

#[derive(Clone)]
struct AppState {
    engine: Arc<ExecutionEngine>,
}

pub fn welcome_page(port: u16) -> String {
    WELCOME_PAGE.replace("{port}", &port.to_string())
}

/// `GET /` and `POST /grab`, rate limited per client address
pub fn router(engine: Arc<ExecutionEngine>, limit: ClientRateLimit) -> Router {
    Router::new()
        .route("/", get(handle_welcome))
        .route("/grab", post(handle_grab))
        .layer(middleware::from_fn_with_state(limit, limit_by_ip))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { engine })
}

/// Serve until Ctrl-C, then close the shared browser
pub async fn serve(engine: Arc<ExecutionEngine>) -> Result<()> {
    let port = engine.settings().port;
    let limit = ClientRateLimit::from_settings(engine.settings());
    let app = router(engine.clone(), limit);

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    engine.logger().banner(&format!("Server started on port {}", port));
    tracing::info!(port, "Listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    engine.browser().close().await.context("Failed to close the browser")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

async fn handle_welcome(State(state): State<AppState>) -> Html<String> {
    Html(welcome_page(state.engine.settings().port))
}

async fn handle_grab(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let started = Instant::now();
    let grab_name = body
        .as_ref()
        .ok()
        .and_then(|Json(b)| b.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    tracing::info!(request_id = %request_id, grab = ?grab_name, event = "grab_request", "Grab request received");

    match run_grab(&state.engine, body, &request_id).await {
        Ok(response) => {
            tracing::info!(
                request_id = %request_id,
                grab = ?grab_name,
                duration_ms = started.elapsed().as_millis() as u64,
                event = "grab_success",
                "Grab request completed"
            );
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                grab = ?grab_name,
                duration_ms = started.elapsed().as_millis() as u64,
                error = ?e,
                event = "grab_error",
                "Grab request failed"
            );
            state
                .engine
                .logger()
                .error(None, &format!("Server Error: {:#}", e));
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

async fn run_grab(
    engine: &Arc<ExecutionEngine>,
    body: Result<Json<Value>, JsonRejection>,
    request_id: &str,
) -> Result<Value> {
    let Json(document) = body.context("Request body is not a JSON recipe")?;
    let grab = parse_grab(&document, engine.registry())?;
    let response = engine
        .run(std::slice::from_ref(&grab), None, Some(request_id))
        .await?;
    response.context("Run produced no result")
}
