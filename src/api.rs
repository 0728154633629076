use crate::bench::{parse_doc_count, BenchRunner, DEFAULT_CURSOR_TYPE};
use crate::error::Error;
use crate::estimator::BatchEstimate;
use crate::explain::ExplainSummary;
use crate::types::{CursorStrategy, ExperimentResult};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub type SharedRunner = Arc<BenchRunner>;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct RunResponse {
    pub success: bool,
    pub execution_time: f64,
    pub cursor_type: String,
    pub doc_count: u64,
}

/// `doc_count` stays a string so a malformed value becomes a 400 from us,
/// not a rejection from the extractor.
#[derive(Deserialize)]
pub struct RunQuery {
    pub cursor_type: Option<String>,
    pub doc_count: Option<String>,
}

pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            Error::Results(_) | Error::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };
        tracing::error!(event = "request_failed", status = status.as_u16(), error = %self.0);
        let body = json!({ "success": false, "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

pub fn create_app(runner: SharedRunner) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/experiments/", get(list_experiments))
        .route("/experiments/run/", get(run_experiment))
        .route("/experiments/estimate/", get(estimate_batch_size))
        .route("/experiments/explain/", get(explain_strategy))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(runner)
}

// GET / - Landing page
async fn home() -> Html<String> {
    let strategies: String = CursorStrategy::ALL
        .iter()
        .map(|s| {
            format!(
                "<li><a href=\"/experiments/run/?cursor_type={0}&amp;doc_count=1000\">{0}</a></li>",
                s
            )
        })
        .collect();
    Html(page(
        "Cursor Lab",
        &format!(
            "<p>Run a canned read against the test collection and record how long it took.</p>\
             <ul>{}</ul>\
             <p><a href=\"/experiments/\">Recorded experiments</a></p>",
            strategies
        ),
    ))
}

// GET /experiments/ - Recorded runs, newest first
async fn list_experiments(State(runner): State<SharedRunner>) -> Result<Html<String>, ApiError> {
    let experiments = runner.recent_results().await?;
    Ok(Html(render_experiment_list(&experiments)))
}

// GET /experiments/run/?cursor_type=limit&doc_count=50
async fn run_experiment(
    State(runner): State<SharedRunner>,
    Query(params): Query<RunQuery>,
) -> Result<Json<RunResponse>, ApiError> {
    let doc_count = parse_doc_count(params.doc_count.as_deref())?;
    let cursor_type = params
        .cursor_type
        .unwrap_or_else(|| DEFAULT_CURSOR_TYPE.to_string());

    let outcome = runner.run(&cursor_type, doc_count).await?;

    Ok(Json(RunResponse {
        success: true,
        execution_time: outcome.result.execution_time,
        cursor_type,
        doc_count,
    }))
}

// GET /experiments/estimate/
async fn estimate_batch_size(
    State(runner): State<SharedRunner>,
) -> Result<Json<BatchEstimate>, ApiError> {
    Ok(Json(runner.estimate().await?))
}

// GET /experiments/explain/?cursor_type=skip&doc_count=100
async fn explain_strategy(
    State(runner): State<SharedRunner>,
    Query(params): Query<RunQuery>,
) -> Result<Json<ExplainSummary>, ApiError> {
    let doc_count = parse_doc_count(params.doc_count.as_deref())?;
    let cursor_type = params
        .cursor_type
        .unwrap_or_else(|| DEFAULT_CURSOR_TYPE.to_string());
    Ok(Json(runner.explain(&cursor_type, doc_count).await?))
}

// GET /health - Health check
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "cursor-lab" }))
}

fn render_experiment_list(experiments: &[ExperimentResult]) -> String {
    if experiments.is_empty() {
        return page("Experiments", "<p>No experiments recorded yet.</p>");
    }

    let rows: String = experiments
        .iter()
        .map(|e| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.6}</td><td>{}</td></tr>",
                escape_html(&e.experiment_name),
                escape_html(&e.cursor_type),
                escape_html(&e.query_pattern),
                e.document_count,
                e.execution_time,
                e.timestamp.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
            )
        })
        .collect();

    page(
        "Experiments",
        &format!(
            "<table><thead><tr><th>Experiment</th><th>Cursor</th><th>Pattern</th>\
             <th>Documents</th><th>Seconds</th><th>Recorded</th></tr></thead>\
             <tbody>{}</tbody></table>",
            rows
        ),
    )
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{0}</title></head>\
         <body><h1>{0}</h1>{1}</body></html>",
        title, body
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub async fn start_server(runner: SharedRunner, port: u16) -> anyhow::Result<()> {
    let app = create_app(runner);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!(event = "server_start", addr = %listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<b>\"x\" & 'y'</b>"), "&lt;b&gt;&quot;x&quot; &amp; &#39;y&#39;&lt;/b&gt;");
    }

    #[test]
    fn empty_list_renders_placeholder() {
        assert!(render_experiment_list(&[]).contains("No experiments recorded yet."));
    }
}
