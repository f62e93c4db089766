//! Route handlers. Each one is a thin shim over [`DispatchService`].

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use courier_delivery::{DeliveryRecord, DispatchService, Notification, RecordId, SendRequest};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};

use crate::ApiError;

pub type Service = Arc<dyn DispatchService>;

const STATUS_FILTERS: [&str; 4] = ["queued", "in-flight", "succeeded", "abandoned"];

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Accepted {
    pub id: RecordId,
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
}

pub async fn root() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "email-service" }))
}

pub async fn submit(
    State(service): State<Service>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::MalformedBody(e.body_text()))?;

    let recipients = request.to.len() + request.cc.len() + request.bcc.len();
    let id = service.submit(request)?;
    tracing::info!(%id, recipients, "Accepted send request");

    Ok(accepted(id))
}

/// Queue a typed notification for its built-in template.
pub async fn notify<N>(
    State(service): State<Service>,
    payload: Result<Json<N>, JsonRejection>,
) -> Result<(StatusCode, Json<Accepted>), ApiError>
where
    N: Notification + DeserializeOwned,
{
    let Json(notification) = payload.map_err(|e| ApiError::MalformedBody(e.body_text()))?;

    let id = service.submit(notification.into())?;
    tracing::info!(%id, template = N::TEMPLATE, "Accepted notification");

    Ok(accepted(id))
}

fn accepted(id: RecordId) -> (StatusCode, Json<Accepted>) {
    (
        StatusCode::ACCEPTED,
        Json(Accepted {
            id,
            status: "queued".to_string(),
        }),
    )
}

pub async fn status(
    State(service): State<Service>,
    Path(id): Path<String>,
) -> Result<Json<DeliveryRecord>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(service.status(&id)?))
}

pub async fn cancel(
    State(service): State<Service>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<DeliveryRecord>), ApiError> {
    let id = parse_id(&id)?;
    let record = service.cancel(&id)?;
    tracing::info!(%id, "Cancelled by request");
    Ok((StatusCode::ACCEPTED, Json(record)))
}

pub async fn list(
    State(service): State<Service>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<DeliveryRecord>>, ApiError> {
    if let Some(filter) = params.status.as_deref()
        && !STATUS_FILTERS.contains(&filter)
    {
        return Err(ApiError::InvalidFilter(filter.to_string()));
    }

    Ok(Json(service.list(params.status.as_deref())))
}

/// Liveness probe: the process is up and answering.
pub async fn liveness() -> Response {
    (StatusCode::OK, "OK").into_response()
}

/// Readiness probe: fails while the backlog exceeds the configured maximum.
pub async fn readiness(State(service): State<Service>) -> Response {
    if service.is_ready() {
        (StatusCode::OK, "OK").into_response()
    } else {
        let counts = service.counts();
        tracing::warn!(
            queued = counts.queued,
            in_flight = counts.in_flight,
            "Readiness probe failed"
        );
        (StatusCode::SERVICE_UNAVAILABLE, Json(counts)).into_response()
    }
}

fn parse_id(raw: &str) -> Result<RecordId, ApiError> {
    raw.parse().map_err(|_| ApiError::InvalidId(raw.to_string()))
}
