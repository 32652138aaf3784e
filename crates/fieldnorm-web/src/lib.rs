//! Admin HTTP surface over the normalization engine.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use fieldnorm_core::{
    parse_fields, ExecuteReport, NormalizableField, PreviewReport, RevertReport,
};
use fieldnorm_engine::{NormalizationEngine, RunReportWriter};
use fieldnorm_rules::{heuristic_for, MappingTable, Resolution};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "fieldnorm-web";

#[derive(Clone)]
pub struct AppState {
    pub engine: NormalizationEngine,
    pub reports: Option<RunReportWriter>,
}

impl AppState {
    pub fn new(engine: NormalizationEngine) -> Self {
        Self {
            engine,
            reports: None,
        }
    }

    pub fn with_reports(mut self, writer: Option<RunReportWriter>) -> Self {
        self.reports = writer;
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FieldInfo {
    pub field: NormalizableField,
    pub label: String,
    pub mapping_entries: usize,
    pub heuristics: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct FieldsRequest {
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct RevertRequest {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct NormalizeRequest {
    pub field: String,
    pub value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NormalizeResponse {
    pub field: NormalizableField,
    pub input: Option<String>,
    #[serde(flatten)]
    pub resolution: Resolution,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/fields", get(fields_handler))
        .route("/normalize", post(normalize_handler))
        .route("/normalization/preview", post(preview_handler))
        .route("/normalization/execute", post(execute_handler))
        .route("/normalization/revert", post(revert_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = bind_addr, "admin api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub fn field_infos(table: &MappingTable) -> Vec<FieldInfo> {
    NormalizableField::ALL
        .into_iter()
        .map(|field| FieldInfo {
            field,
            label: field.label().to_string(),
            mapping_entries: table.mapping(field).map_or(0, |m| m.len()),
            heuristics: heuristic_for(field).is_some(),
        })
        .collect()
}

fn requested_fields(
    fields: Option<Vec<String>>,
) -> Result<Option<Vec<NormalizableField>>, String> {
    fields
        .map(|names| parse_fields(&names))
        .transpose()
        .map_err(|err| err.to_string())
}

/// Malformed bodies still get a report object, carrying the rejection's status.
fn rejected<R: Serialize>(rejection: JsonRejection, failed: impl FnOnce(String) -> R) -> Response {
    warn!(status = %rejection.status(), error = %rejection.body_text(), "rejected request body");
    (rejection.status(), Json(failed(rejection.body_text()))).into_response()
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn fields_handler(State(state): State<Arc<AppState>>) -> Json<Vec<FieldInfo>> {
    Json(field_infos(state.engine.table()))
}

async fn normalize_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NormalizeRequest>,
) -> Response {
    match req.field.parse::<NormalizableField>() {
        Ok(field) => {
            let resolution = state.engine.table().resolve(field, req.value.as_deref());
            Json(NormalizeResponse {
                field,
                input: req.value,
                resolution,
            })
            .into_response()
        }
        Err(err) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn preview_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<FieldsRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected(rejection, PreviewReport::failed),
    };
    let fields = match requested_fields(req.fields) {
        Ok(fields) => fields,
        Err(msg) => {
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(PreviewReport::failed(msg)))
                .into_response()
        }
    };
    let report = state.engine.preview(fields.as_deref()).await;
    if let Some(writer) = &state.reports {
        if let Err(err) = writer.write_preview(Uuid::new_v4(), &report).await {
            warn!(error = %err, "writing preview report failed");
        }
    }
    Json(report).into_response()
}

async fn execute_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected(rejection, ExecuteReport::failed),
    };
    let fields = match requested_fields(req.fields) {
        Ok(fields) => fields,
        Err(msg) => {
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(ExecuteReport::failed(msg)))
                .into_response()
        }
    };
    let report = state.engine.execute(fields.as_deref(), req.confirm).await;
    if req.confirm {
        if let Some(writer) = &state.reports {
            if let Err(err) = writer.write_execute(Uuid::new_v4(), &report).await {
                warn!(error = %err, "writing execute report failed");
            }
        }
    }
    Json(report).into_response()
}

async fn revert_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RevertRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected(rejection, RevertReport::failed),
    };
    let report = state.engine.revert(req.since).await;
    if let Some(writer) = &state.reports {
        if let Err(err) = writer.write_revert(Uuid::new_v4(), &report).await {
            warn!(error = %err, "writing revert report failed");
        }
    }
    Json(report).into_response()
}
