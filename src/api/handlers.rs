use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ApiError, ErrorClass};
use crate::logic::cancel::Cancellation;
use crate::logic::serialize::Payload;
use crate::logic::service::SensorThingsService;
use crate::model::SELF_LINK_KEY;
use crate::store::EntityStore;

/// Shared state of the HTTP surface.
pub struct ApiState<S: EntityStore + ?Sized> {
    pub service: SensorThingsService<S>,
    pub indent_json: bool,
    pub query_timeout: Option<Duration>,
}

pub type AppState<S> = Arc<ApiState<S>>;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    pub errors: Vec<String>,
}

/// SensorThings error envelope.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

impl ErrorResponse {
    pub fn new(code: u16, message: &str) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: message.to_string(),
                errors: Vec::new(),
            },
        }
    }
}

type ApiFailure = (StatusCode, Json<ErrorResponse>);

fn status_of(class: ErrorClass) -> StatusCode {
    StatusCode::from_u16(class.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn fail(err: ApiError) -> ApiFailure {
    let class = err.classify();
    match class {
        ErrorClass::ServerError => log::error!("request failed: {}", err),
        ErrorClass::Cancelled => log::info!("request aborted: {}", err),
        _ => log::warn!("rejected request: {}", err),
    }
    let status = status_of(class);
    let mut response = ErrorResponse::new(status.as_u16(), &err.to_string());
    response.error.errors = err.details();
    (status, Json(response))
}

fn not_found(what: &str) -> ApiFailure {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(404, &format!("{} not found", what))),
    )
}

fn with_location(mut response: Response, link: &str) -> Response {
    if let Ok(location) = header::HeaderValue::from_str(link) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    response
}

fn json_response<S: EntityStore + ?Sized>(state: &ApiState<S>, status: StatusCode, value: &Value) -> Response {
    let body = if state.indent_json {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match body {
        Ok(body) => (status, [(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(500, &e.to_string())),
        )
            .into_response(),
    }
}

pub async fn resource_root<S: EntityStore + 'static>(State(state): State<AppState<S>>) -> Response {
    json_response(&state, StatusCode::OK, &state.service.resource_root())
}

pub async fn get_resource<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiFailure> {
    // a dropped connection drops this future and the query with it
    let cancellation = Cancellation::detached(state.query_timeout);
    let payload = state
        .service
        .get(&path, query.as_deref(), &cancellation)
        .await
        .map_err(fail)?;
    log::info!("GET /v1.0/{}", path);

    match payload {
        Payload::Json(value) => Ok(json_response(&state, StatusCode::OK, &value)),
        Payload::Text(text) => Ok((StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], text).into_response()),
        Payload::NotFound => Err(not_found(&path)),
    }
}

pub async fn create_entity<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<Response, ApiFailure> {
    let created = state.service.create(&path, &body).await.map_err(fail)?;
    log::info!("POST /v1.0/{} -> {}", path, created.location);

    let response = json_response(&state, StatusCode::CREATED, &created.body);
    Ok(with_location(response, &created.location))
}

pub async fn patch_entity<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<Response, ApiFailure> {
    let value = state.service.update(&path, &body, false).await.map_err(fail)?;
    log::info!("PATCH /v1.0/{}", path);
    Ok(json_response(&state, StatusCode::OK, &value))
}

pub async fn replace_entity<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<Response, ApiFailure> {
    let value = state.service.update(&path, &body, true).await.map_err(fail)?;
    log::info!("PUT /v1.0/{}", path);
    let response = json_response(&state, StatusCode::OK, &value);
    match value.get(SELF_LINK_KEY).and_then(Value::as_str) {
        Some(link) => Ok(with_location(response, link)),
        None => Ok(response),
    }
}

pub async fn delete_entity<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path(path): Path<String>,
) -> Result<StatusCode, ApiFailure> {
    state.service.delete(&path).await.map_err(fail)?;
    log::info!("DELETE /v1.0/{}", path);
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CancellationError, ValidationError};
    use crate::model::EntityType;

    #[test]
    fn test_error_envelope_lists_every_violation() {
        let (status, Json(body)) = fail(ApiError::Validation(vec![
            ValidationError::missing(EntityType::Thing, "name"),
            ValidationError::missing(EntityType::Thing, "description"),
        ]));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.code, 400);
        assert_eq!(body.error.errors.len(), 2);
    }

    #[test]
    fn test_cancellation_uses_client_closed_status() {
        let (status, _) = fail(ApiError::Cancelled(CancellationError::DeadlineExceeded));
        assert_eq!(status.as_u16(), 499);
    }
}
