//! Axum JSON API over the scrape pipeline and stored projects.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use gulp_core::Record;
use gulp_sync::{
    build_pipeline, build_scheduler, AppConfig, DatasetCounts, EmailConfigState, ProjectQuery, RunState,
    SchedulerConfigState, ScrapePipeline, ScrapeRequest,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

pub const CRATE_NAME: &str = "gulp-web";

const MAX_LIMIT: i64 = 100;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ScrapePipeline>,
    pub scheduler: SchedulerConfigState,
}

impl AppState {
    pub fn new(pipeline: Arc<ScrapePipeline>, scheduler: SchedulerConfigState) -> Self {
        Self { pipeline, scheduler }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectsParams {
    page: Option<i64>,
    limit: Option<i64>,
    search: Option<String>,
    location: Option<String>,
    remote: Option<bool>,
    include_new_only: Option<bool>,
    show_all: Option<bool>,
}

impl ProjectsParams {
    fn into_query(self, archived: bool) -> ProjectQuery {
        let defaults = ProjectQuery::default();
        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        ProjectQuery {
            page: self.page.map_or(defaults.page, |p| p.max(1) as usize),
            limit: self
                .limit
                .map_or(defaults.limit, |l| l.clamp(1, MAX_LIMIT) as usize),
            search: non_blank(self.search),
            location: non_blank(self.location),
            remote: self.remote,
            archived,
            include_new_only: self.include_new_only.unwrap_or(false),
            show_all: self.show_all.unwrap_or(false),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectsResponse {
    projects: Vec<Record>,
    total: usize,
    page: usize,
    limit: usize,
    last_scrape: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_project_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkSeenBody {
    #[serde(default)]
    project_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    is_running: bool,
    state: RunState,
    last_scrape_time: Option<String>,
    source: &'static str,
    counts: DatasetCounts,
    email: EmailConfigState,
    scheduler: SchedulerConfigState,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/projects", get(projects_handler))
        .route("/projects/archived", get(archived_projects_handler))
        .route("/projects/new", get(new_projects_handler).delete(clear_new_projects_handler))
        .route("/projects/mark-seen", post(mark_seen_handler))
        .route("/projects/{id}", get(project_detail_handler))
        .route("/scrape", post(scrape_handler))
        .route("/status", get(status_handler))
        .route("/history", get(history_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::new(state))
}

/// Serve the API and, when enabled, the cron scheduler until the listener fails.
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let pipeline = build_pipeline(&config)?;
    let scheduler = if config.scheduler_enabled {
        let sched = build_scheduler(pipeline.clone(), &config.scrape_crons).await?;
        sched.start().await?;
        Some(sched)
    } else {
        info!("scheduler disabled");
        None
    };

    pipeline.trigger_if_empty().await;
    let state = AppState::new(pipeline, config.scheduler_state());
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, data_dir = %config.data_dir.display(), "api listening");
    axum::serve(listener, app(state)).await?;
    drop(scheduler);
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    serve(AppConfig::from_env()).await
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %format!("{err:#}"), "request failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
}

fn query_params(params: Result<Query<ProjectsParams>, QueryRejection>) -> Result<ProjectsParams, Response> {
    params
        .map(|Query(params)| params)
        .map_err(|rejection| error_response(StatusCode::BAD_REQUEST, rejection.body_text()))
}

async fn last_scrape(state: &AppState) -> Option<String> {
    state
        .pipeline
        .manager()
        .last_scrape()
        .await
        .map(|ts| ts.to_rfc3339())
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "name": "GULP Project Watch API",
        "version": env!("CARGO_PKG_VERSION"),
        "source": state.pipeline.source_id(),
        "endpoints": [
            "GET /projects",
            "GET /projects/archived",
            "GET /projects/new",
            "DELETE /projects/new",
            "POST /projects/mark-seen",
            "GET /projects/{id}",
            "POST /scrape",
            "GET /status",
            "GET /history",
        ],
    }))
    .into_response()
}

async fn projects_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ProjectsParams>, QueryRejection>,
) -> Response {
    let query = match query_params(params) {
        Ok(params) => params.into_query(false),
        Err(response) => return response,
    };
    let manager = state.pipeline.manager();
    let result = manager.get_projects(&query).await;
    let new_project_ids = match manager.new_projects().await {
        Ok(records) => records.into_iter().map(|r| r.id).collect(),
        Err(err) => {
            error!(error = %format!("{err:#}"), "reading new-only list failed");
            Vec::new()
        }
    };
    Json(ProjectsResponse {
        projects: result.projects,
        total: result.total,
        page: query.page,
        limit: query.limit,
        last_scrape: last_scrape(&state).await,
        new_project_ids: Some(new_project_ids),
    })
    .into_response()
}

async fn archived_projects_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ProjectsParams>, QueryRejection>,
) -> Response {
    let query = match query_params(params) {
        Ok(params) => params.into_query(true),
        Err(response) => return response,
    };
    let result = state.pipeline.manager().get_projects(&query).await;
    Json(ProjectsResponse {
        projects: result.projects,
        total: result.total,
        page: query.page,
        limit: query.limit,
        last_scrape: last_scrape(&state).await,
        new_project_ids: None,
    })
    .into_response()
}

async fn new_projects_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.manager().new_projects().await {
        Ok(projects) => Json(json!({ "total": projects.len(), "projects": projects })).into_response(),
        Err(err) => server_error(err),
    }
}

async fn clear_new_projects_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.manager().clear_new_projects().await {
        Ok(()) => Json(json!({ "cleared": true })).into_response(),
        Err(err) => server_error(err),
    }
}

async fn mark_seen_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let body: MarkSeenBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, format!("invalid body: {err}")),
    };
    match state.pipeline.manager().mark_projects_as_seen(&body.project_ids).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => server_error(err),
    }
}

async fn project_detail_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    match state.pipeline.manager().get_project(&id).await {
        Some(project) => Json(project).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("project {id} not found")),
    }
}

async fn scrape_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        ScrapeRequest::default()
    } else {
        match serde_json::from_slice::<ScrapeRequest>(&body) {
            Ok(request) => request,
            Err(err) => return error_response(StatusCode::BAD_REQUEST, format!("invalid body: {err}")),
        }
    };
    match state.pipeline.trigger(request).await {
        Ok(run_id) => (
            StatusCode::ACCEPTED,
            Json(json!({ "message": "scrape started", "runId": run_id })),
        )
            .into_response(),
        Err(busy) => error_response(StatusCode::CONFLICT, busy.to_string()),
    }
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    let run_state = state.pipeline.state().await;
    Json(StatusResponse {
        is_running: run_state.is_running(),
        state: run_state,
        last_scrape_time: last_scrape(&state).await,
        source: state.pipeline.source_id(),
        counts: state.pipeline.manager().counts().await,
        email: state.pipeline.email().config_status(),
        scheduler: state.scheduler.clone(),
    })
    .into_response()
}

async fn history_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.pipeline.manager().history().await).into_response()
}
