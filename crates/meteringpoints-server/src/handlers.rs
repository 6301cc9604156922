use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use registry::{
    extract_bearer_token, parse_type_filter, topics, Command, InternalToken, MeteringPointFilters,
    MeteringPointOrdering, MeteringPointQuery, MeteringPointView, Pagination, QueryPage,
    READ_SCOPE,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListRequest {
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub filters: Option<ListFilters>,
    #[serde(default)]
    pub ordering: Option<MeteringPointOrdering>,
}

/// Filters as received; `type` is parsed separately so an unknown value
/// surfaces as a query error rather than a generic decode failure.
#[derive(Debug, Default, Deserialize)]
pub struct ListFilters {
    #[serde(default)]
    pub gsrn: Option<Vec<String>>,
    #[serde(default, rename = "type")]
    pub meteringpoint_type: Option<String>,
    #[serde(default)]
    pub sector: Option<Vec<String>>,
}

impl ListFilters {
    fn parse(self) -> Result<MeteringPointFilters, AppError> {
        let meteringpoint_type = self
            .meteringpoint_type
            .as_deref()
            .map(parse_type_filter)
            .transpose()?;
        Ok(MeteringPointFilters {
            gsrn: self.gsrn,
            meteringpoint_type,
            sector: self.sector,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub success: bool,
    pub total: u64,
    pub meteringpoints: Vec<MeteringPointView>,
}

#[derive(Debug, Deserialize)]
pub struct DetailsQuery {
    pub gsrn: String,
}

#[derive(Debug, Serialize)]
pub struct DetailsResponse {
    pub success: bool,
    pub meteringpoint: Option<MeteringPointView>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateRelationsRequest {
    #[serde(default)]
    pub tin: Option<String>,
    #[serde(default)]
    pub ssn: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OnboardCprRequest {
    pub cpr: String,
}

#[derive(Debug, Deserialize)]
pub struct OnboardCvrRequest {
    pub cvr: String,
}

#[derive(Debug, Serialize)]
pub struct SimpleResponse {
    pub success: bool,
}

pub async fn list_meteringpoints(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ListResponse>, AppError> {
    let token = state
        .gate
        .require_scope(authorization(&headers), READ_SCOPE)?;
    let subject = state.gate.subject(&token)?.to_string();

    let request: ListRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ListRequest::default()
    } else {
        serde_json::from_slice(&body)?
    };
    let page = Pagination::new(
        request.offset.unwrap_or(0),
        request.limit.unwrap_or(state.default_limit),
    )?;
    let filters = request.filters.unwrap_or_default().parse()?;

    let mut query = MeteringPointQuery::new()
        .is_accessible_by(subject)
        .apply_filters(&filters)
        .paginate(page);
    if let Some(ordering) = request.ordering {
        query = query.apply_ordering(ordering);
    }

    let result = run_query(state, query).await?;
    Ok(Json(ListResponse {
        success: true,
        total: result.total,
        meteringpoints: result.meteringpoints,
    }))
}

pub async fn meteringpoint_details(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<DetailsQuery>,
) -> Result<Json<DetailsResponse>, AppError> {
    let token = state
        .gate
        .require_scope(authorization(&headers), READ_SCOPE)?;
    let subject = state.gate.subject(&token)?.to_string();

    let query = MeteringPointQuery::new()
        .has_gsrn(params.gsrn)
        .is_accessible_by(subject);
    let meteringpoint = run_query(state, query).await?.meteringpoints.into_iter().next();
    Ok(Json(DetailsResponse {
        success: meteringpoint.is_some(),
        meteringpoint,
    }))
}

pub async fn create_relations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateRelationsRequest>,
) -> Result<Json<SimpleResponse>, AppError> {
    let raw_token = bearer(&headers)?;
    let token = state.gate.authenticate(authorization(&headers))?;
    let subject = state.gate.subject(&token)?;

    let tin = match (payload.tin.as_deref(), payload.ssn.as_deref()) {
        (Some(tin), _) if !tin.trim().is_empty() => tin,
        (_, Some(_)) => {
            debug!(subject = %subject, "relation creation by ssn is not supported");
            return Ok(Json(SimpleResponse { success: false }));
        }
        _ => return Ok(Json(SimpleResponse { success: false })),
    };

    let gsrns = match state.datasync.meteringpoints_by_tin(&raw_token, tin).await {
        Ok(gsrns) => gsrns,
        Err(err) => {
            warn!(subject = %subject, error = %err, "metering point lookup failed");
            return Ok(Json(SimpleResponse { success: false }));
        }
    };
    if gsrns.is_empty() {
        info!(subject = %subject, "no metering points found for tin");
        return Ok(Json(SimpleResponse { success: false }));
    }

    let success = match state.datasync.create_relations(&raw_token, tin, &gsrns).await {
        Ok(outcome) => {
            if !outcome.failed.is_empty() {
                warn!(subject = %subject, failed = ?outcome.failed, "relation creation partially failed");
            }
            outcome.failed.is_empty()
        }
        Err(err) => {
            warn!(subject = %subject, error = %err, "relation creation failed");
            false
        }
    };
    Ok(Json(SimpleResponse { success }))
}

pub async fn onboard_cpr(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<OnboardCprRequest>,
) -> Result<Json<SimpleResponse>, AppError> {
    let token = state.gate.authenticate(authorization(&headers))?;
    publish_import(state, &token, "cpr", payload.cpr).await
}

pub async fn onboard_cvr(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<OnboardCvrRequest>,
) -> Result<Json<SimpleResponse>, AppError> {
    let token = state.gate.authenticate(authorization(&headers))?;
    publish_import(state, &token, "cvr", payload.cvr).await
}

async fn publish_import(
    state: Arc<AppState>,
    token: &InternalToken,
    key: &'static str,
    value: String,
) -> Result<Json<SimpleResponse>, AppError> {
    let subject = state.gate.subject(token)?.to_string();
    let Some(publisher) = state.commands.clone() else {
        warn!(subject = %subject, key, "import dropped, no shared bus configured");
        return Err(AppError::unavailable("onboarding requires bus.redis_url"));
    };
    let command = Command::import_meteringpoints(subject.clone(), key, value);
    let payload = command.encode()?;
    tokio::task::spawn_blocking(move || publisher.publish(topics::METERINGPOINTS_COMMANDS, &payload))
        .await
        .map_err(|err| AppError::internal(err.to_string()))??;
    info!(subject = %subject, key, "import requested");
    Ok(Json(SimpleResponse { success: true }))
}

async fn run_query(state: Arc<AppState>, query: MeteringPointQuery) -> Result<QueryPage, AppError> {
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.query(&query).map_err(AppError::from))
        .await
        .map_err(|err| AppError::internal(err.to_string()))?
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
}

fn bearer(headers: &HeaderMap) -> Result<String, AppError> {
    authorization(headers)
        .and_then(extract_bearer_token)
        .map(str::to_string)
        .ok_or_else(|| AppError::forbidden("missing bearer token"))
}
