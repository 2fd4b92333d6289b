use crate::config::BenchConfig;
use crate::{metrics, report};

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use kyutai_stt_loadgen::{CancellationToken, Engine, RunOutcome};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(8);

#[derive(Debug, serde::Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, serde::Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<f64>,
}

fn bad_request(error: String, time: Option<f64>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { error, time })).into_response()
}

struct AppStateInner {
    config: BenchConfig,
    engine: Engine,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct AppState(Arc<AppStateInner>);

impl AppState {
    /// `cancel` is the process-wide token, each run gets a child of it.
    pub fn new(config: BenchConfig, cancel: CancellationToken) -> Self {
        let mut engine = Engine::new(config.engine.clone());
        if let Some(diagnostics) = config.diagnostics() {
            engine = engine.with_diagnostics(diagnostics);
        }
        Self(Arc::new(AppStateInner { config, engine, cancel }))
    }

    fn target(&self, url: String) -> String {
        if url.trim().is_empty() {
            self.0.config.default_url.clone()
        } else {
            url
        }
    }

    async fn run(&self, target: &str, requested: usize) -> Result<RunOutcome> {
        if let Some(diagnostics) = self.0.config.diagnostics() {
            diagnostics.prepare().await.context("resetting diagnostics directories")?;
        }
        let audio = self.0.config.audio_path();
        let source = tokio::fs::File::open(&audio)
            .await
            .with_context(|| format!("opening audio file {}", audio.display()))?;
        let outcome = self.0.engine.run(target, requested, source, self.0.cancel.child_token()).await?;
        Ok(outcome)
    }

    fn reports_dir(&self) -> PathBuf {
        PathBuf::from(&self.0.config.reports_dir)
    }
}

fn requested_sessions(count: i64) -> usize {
    usize::try_from(count).ok().filter(|&c| c > 0).unwrap_or(1)
}

async fn start(
    State(state): State<AppState>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "rejecting start request");
            return bad_request(rejection.body_text(), None);
        }
    };
    let requested = requested_sessions(req.count);
    let target = state.target(req.url);
    tracing::info!(requested, url = %target, "start request");

    let started = Instant::now();
    match state.run(&target, requested).await {
        Ok(outcome) => {
            metrics::record_outcome(&outcome);
            let csv = report::render_csv(&outcome);
            match report::write_report_file(&state.reports_dir(), &csv).await {
                Ok(path) => tracing::info!(path = %path.display(), "report written"),
                Err(err) => tracing::error!(?err, "cannot write report file"),
            }
            (StatusCode::OK, [(header::CONTENT_TYPE, "text/csv")], csv).into_response()
        }
        Err(err) => {
            metrics::record_failure(requested);
            let time = started.elapsed().as_secs_f64();
            tracing::warn!(error = %format!("{err:#}"), time, "run failed");
            bad_request(format!("{err:#}"), Some(time))
        }
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok((content_type, body)) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(err) => {
            tracing::error!(?err, "cannot encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{err}")).into_response()
        }
    }
}

pub fn router(state: AppState) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::ORIGIN, header::CONTENT_TYPE]);

    axum::Router::new()
        .route("/start", post(start))
        .route("/api/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(
            tower::ServiceBuilder::new()
                .layer(tower_http::request_id::SetRequestIdLayer::x_request_id(
                    tower_http::request_id::MakeRequestUuid,
                ))
                .layer(tower_http::trace::TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(?err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(?err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Serves until SIGINT/SIGTERM. In-flight runs are cancelled on the signal
/// and the process gives up waiting for them after [`SHUTDOWN_DEADLINE`].
pub async fn serve(config: BenchConfig, addr: SocketAddr) -> Result<()> {
    let cancel = CancellationToken::new();
    let app = router(AppState::new(config, cancel.clone()));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", addr);
    let mut server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(cancel.clone().cancelled_owned())
            .into_future(),
    );

    tokio::select! {
        res = &mut server => {
            res??;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    tracing::info!("shutdown requested, cancelling in-flight runs");
    cancel.cancel();
    match tokio::time::timeout(SHUTDOWN_DEADLINE, server).await {
        Ok(res) => res??,
        Err(_) => tracing::warn!(
            deadline_s = SHUTDOWN_DEADLINE.as_secs(),
            "graceful shutdown timed out, exiting"
        ),
    }
    Ok(())
}
