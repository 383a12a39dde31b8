// HTTP service for the command gateway
//
// Routes:
// - POST /api/execute  translate, validate and execute a request
// - GET  /             banner
// - GET  /health       liveness
// - GET  /metrics      Prometheus text (when enabled)

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::GatewayError;
use crate::metrics;
use crate::tools::{CommandGateway, ExecutionResult};
use crate::translator::{translate_command, Translator};

/// Plain-text banner served on `/`
pub const BANNER: &str = "Kubernetes NLP Command Executor API";

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub gateway: CommandGateway,
    pub translator: Arc<dyn Translator>,
}

impl AppState {
    pub fn new(gateway: CommandGateway, translator: Arc<dyn Translator>) -> Self {
        Self {
            gateway,
            translator,
        }
    }
}

/// Inbound request body
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub nlp: Option<String>,
}

/// Outbound success body, also used for timed-out executions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub command: String,
    pub output: String,
    pub error_output: String,
    pub exit_code: i32,
}

impl From<ExecutionResult> for ExecuteResponse {
    fn from(result: ExecutionResult) -> Self {
        Self {
            command: result.display_command,
            output: result.stdout,
            error_output: result.stderr,
            exit_code: result.exit_code,
        }
    }
}

impl GatewayError {
    /// HTTP status for this error class
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MalformedInput(_) => StatusCode::BAD_REQUEST,
            GatewayError::TranslationFailure { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::GenerationFailure => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::PolicyViolation { .. } => StatusCode::FORBIDDEN,
            GatewayError::SpawnFailure(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });

        match &self {
            GatewayError::PolicyViolation {
                verb,
                allowed,
                command,
            } => {
                body["rejectedVerb"] = verb.clone().into();
                body["allowedVerbs"] = allowed.clone().into();
                body["command"] = command.clone().into();
            }
            GatewayError::TranslationFailure {
                upstream_status: Some(code),
                ..
            } => {
                body["upstreamStatus"] = (*code).into();
            }
            _ => {}
        }

        if status.is_server_error() {
            error!("{}", self);
        }

        (status, Json(body)).into_response()
    }
}

/// Build the application router
pub fn router(state: AppState, metrics_enabled: bool) -> Router {
    let mut app = Router::new()
        .route("/", get(banner_handler))
        .route("/health", get(health_handler))
        .route("/api/execute", post(execute_handler));

    if metrics_enabled {
        app = app.route("/metrics", get(metrics_handler));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server and run until Ctrl-C
pub async fn start_server(config: &Config) -> Result<()> {
    if config.metrics.enabled {
        metrics::init().context("Failed to initialize metrics")?;
    }

    let translator = config
        .translator
        .build()
        .context("Failed to build translator client")?;
    let gateway = CommandGateway::new(config.gateway.to_gateway_config());
    let app = router(AppState::new(gateway, translator), config.metrics.enabled);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(
        "Starting server on {} (binary: {}, timeout: {}s, translator: {})",
        addr, config.gateway.binary, config.gateway.timeout_secs, config.translator.backend
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

/// Translate, validate and execute one request
async fn execute_handler(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, GatewayError> {
    let Json(request) = payload.map_err(|e| {
        metrics::record_rejection("malformed_input");
        GatewayError::MalformedInput(e.body_text())
    })?;

    let nlp = match request.nlp {
        Some(nlp) if !nlp.trim().is_empty() => nlp,
        _ => {
            metrics::record_rejection("malformed_input");
            return Err(GatewayError::MalformedInput(
                "Missing or invalid 'nlp' field".to_string(),
            ));
        }
    };

    let command = translate_command(state.translator.as_ref(), &nlp).await?;
    info!("Translated {:?} -> {:?}", nlp, command);

    let result = state.gateway.execute(&command).await?;
    Ok(Json(result.into()))
}

async fn banner_handler() -> &'static str {
    BANNER
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Metrics endpoint handler
async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}
