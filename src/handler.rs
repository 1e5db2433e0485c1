use crate::aggregator::{aggregate, AggregatedStats, GroupBy, MetricsInputs, TimeRange};
use crate::backend::{MetricsFilters, MetricsQuery};
use crate::config::MAX_TZ_OFFSET_MINUTES;
use crate::error::{AppError, AppResult, LoggedJson};
use crate::views::{ViewRegistry, ViewSnapshot};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub struct AppState {
    pub registry: ViewRegistry,
    /// Display zone for requests that do not send `tz_offset_minutes`.
    pub default_zone: FixedOffset,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/aggregate", post(aggregate_stats))
        .route("/v1/views", post(open_view))
        .route("/v1/views/{id}", delete(close_view))
        .route("/v1/views/{id}/stats", get(view_stats))
        .with_state(state)
}

/// Display zone from a UTC offset in minutes, east positive.
pub fn resolve_zone(offset_minutes: Option<i32>, default: FixedOffset) -> AppResult<FixedOffset> {
    let Some(minutes) = offset_minutes else {
        return Ok(default);
    };
    if minutes.abs() > MAX_TZ_OFFSET_MINUTES {
        return Err(AppError::Validation(format!(
            "tz_offset_minutes must be within ±{MAX_TZ_OFFSET_MINUTES}"
        )));
    }
    FixedOffset::east_opt(minutes * 60)
        .ok_or_else(|| AppError::Validation(format!("invalid tz_offset_minutes: {minutes}")))
}

fn checked_range(start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<TimeRange> {
    if end < start {
        return Err(AppError::Validation("end must not be before start".to_string()));
    }
    Ok(TimeRange::new(start, end))
}

fn parse_rfc3339(field: &str, raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Validation(format!("{field} is not an RFC 3339 instant: {e}")))
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ── Stateless aggregation ──

#[derive(Debug, Deserialize)]
pub struct AggregateRequest {
    #[serde(default)]
    pub inputs: MetricsInputs,
    pub group_by: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub tz_offset_minutes: Option<i32>,
}

/// POST /v1/aggregate
pub async fn aggregate_stats(
    State(state): State<Arc<AppState>>,
    LoggedJson(req): LoggedJson<AggregateRequest>,
) -> AppResult<Json<AggregatedStats>> {
    let range = checked_range(req.start, req.end)?;
    let zone = resolve_zone(req.tz_offset_minutes, state.default_zone)?;
    let group_by = req
        .group_by
        .as_deref()
        .map(GroupBy::from_str_loose)
        .unwrap_or_default();

    tracing::debug!(
        group_by = group_by.as_str(),
        records = req.inputs.records.len(),
        "aggregating inline payload"
    );
    Ok(Json(aggregate(&req.inputs, group_by, range, zone)))
}

// ── View sessions ──

#[derive(Debug, Default, Deserialize)]
pub struct ViewStatsParams {
    pub start: Option<String>,
    pub end: Option<String>,
    pub hours: Option<i64>,
    pub group_by: Option<String>,
    pub tz_offset_minutes: Option<i32>,
    pub project: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
}

impl ViewStatsParams {
    pub fn hours(&self) -> i64 {
        self.hours.unwrap_or(24).clamp(1, 720)
    }

    pub fn group_by(&self) -> GroupBy {
        self.group_by
            .as_deref()
            .map(GroupBy::from_str_loose)
            .unwrap_or_default()
    }

    /// Explicit `start`/`end` win; a missing bound is filled from `hours`.
    pub fn range(&self, now: DateTime<Utc>) -> AppResult<TimeRange> {
        let end = match &self.end {
            Some(raw) => parse_rfc3339("end", raw)?,
            None => now,
        };
        let start = match &self.start {
            Some(raw) => parse_rfc3339("start", raw)?,
            None => end - chrono::Duration::hours(self.hours()),
        };
        checked_range(start, end)
    }

    fn filters(&self) -> MetricsFilters {
        MetricsFilters {
            project: self.project.clone(),
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

/// POST /v1/views
pub async fn open_view(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let session = state.registry.open();
    (
        StatusCode::CREATED,
        Json(json!({ "view_id": session.id() })),
    )
}

/// GET /v1/views/{id}/stats
pub async fn view_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ViewStatsParams>,
) -> AppResult<Json<ViewSnapshot>> {
    let session = state
        .registry
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("view {id}")))?;

    let range = params.range(Utc::now())?;
    let zone = resolve_zone(params.tz_offset_minutes, state.default_zone)?;
    let query = MetricsQuery {
        range,
        group_by: params.group_by(),
        filters: params.filters(),
    };

    let snapshot = state.registry.refresh(&session, &query, zone).await;
    Ok(Json(snapshot))
}

/// DELETE /v1/views/{id}
pub async fn close_view(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    if !state.registry.close(&id) {
        return Err(AppError::NotFound(format!("view {id}")));
    }
    Ok(Json(json!({ "closed": id })))
}
