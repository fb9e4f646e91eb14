use std::{future::Future, sync::Arc};

use axum::{
    Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    clients::health::HealthChecker,
    error::Error,
    models::{
        caller::Caller,
        health::HealthStatus,
        response::{ApiResponse, PaginationMeta},
        subscription::{NewSubscription, SubscriptionFilter},
        topic::Topic,
    },
    queue::{Broker, EventProducer},
    store::SubscriptionStore,
};

/// Set by the session layer in front of this service.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ADMIN_HEADER: &str = "x-user-admin";

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_DEAD_LETTERS: usize = 100;

pub struct AppState {
    pub producer: EventProducer,
    pub store: SubscriptionStore,
    pub broker: Arc<dyn Broker>,
    pub health_checker: HealthChecker,
}

/// Library error carried to the HTTP boundary.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidTopic(_) | Error::Invalid(_) | Error::Decode { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthorized(_) => StatusCode::FORBIDDEN,
            Error::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
            "internal error".to_string()
        } else {
            self.0.to_string()
        };

        (status, Json(ApiResponse::<()>::error(self.0.code(), message))).into_response()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let unauthenticated = || {
            (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::<()>::error("unauthorized", "missing or malformed caller identity")),
            )
                .into_response()
        };

        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or_else(unauthenticated)?;

        let is_admin = parts
            .headers
            .get(USER_ADMIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        Ok(Caller { user_id, is_admin })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/events", post(push_event))
        .route("/subscriptions", get(list_subscriptions).post(create_subscription))
        .route(
            "/subscriptions/{topic}/{id}",
            get(get_subscription).delete(delete_subscription),
        )
        .route("/dead-letters", get(list_dead_letters))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server<F>(state: Arc<AppState>, port: u16, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "API server started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("API server stopped");
    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

#[derive(Debug, Deserialize)]
struct PushEventRequest {
    topic: String,
    payload: JsonValue,
}

async fn push_event(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Json(request): Json<PushEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id = state
        .producer
        .push_parts(&request.topic, request.payload)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(json!({ "task_id": task_id }), "Event queued")),
    ))
}

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    topic: String,
    target_id: i64,
}

async fn create_subscription(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(request): Json<SubscribeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = NewSubscription {
        topic: request.topic.parse()?,
        target_id: request.target_id,
    };
    let subscription = state.store.create(&caller, new).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(subscription, "Subscribed")),
    ))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    user_id: Option<i64>,
    topic: Option<String>,
    target_id: Option<i64>,
    offset: Option<i64>,
    limit: Option<i64>,
}

/// Callers see their own subscriptions; admins may ask for anyone's.
async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = match query.user_id {
        Some(user_id) if user_id != caller.user_id && !caller.is_admin => {
            return Err(Error::unauthorized("only admins may list other users' subscriptions").into());
        }
        Some(user_id) => Some(user_id),
        None if caller.is_admin => None,
        None => Some(caller.user_id),
    };

    let filter = SubscriptionFilter {
        user_id,
        topic: query.topic.as_deref().map(str::parse::<Topic>).transpose()?,
        target_id: query.target_id,
        offset: query.offset.unwrap_or(0).max(0),
        limit: query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 100),
    };

    let (subscriptions, total) = state.store.find(&filter).await?;
    let meta = PaginationMeta::new(total, filter.limit as u64, filter.offset as u64);

    Ok(Json(
        ApiResponse::success(subscriptions, "Subscriptions retrieved").with_meta(meta),
    ))
}

async fn get_subscription(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((topic, id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let topic: Topic = topic.parse()?;
    let subscription = state.store.find_by_id(id, topic).await?;

    if subscription.user_id != caller.user_id && !caller.is_admin {
        return Err(Error::unauthorized(format!("subscription {} belongs to another user", id)).into());
    }

    Ok(Json(ApiResponse::success(subscription, "Subscription retrieved")))
}

async fn delete_subscription(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((topic, id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let topic: Topic = topic.parse()?;
    state.store.delete(&caller, id, topic).await?;

    Ok(Json(ApiResponse::success(json!({ "id": id }), "Unsubscribed")))
}

#[derive(Debug, Deserialize)]
struct DeadLetterQuery {
    limit: Option<usize>,
}

async fn list_dead_letters(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(query): Query<DeadLetterQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if !caller.is_admin {
        return Err(Error::unauthorized("dead letters are visible to admins only").into());
    }

    let limit = query.limit.unwrap_or(20).min(MAX_DEAD_LETTERS);
    let letters = state.broker.dead_letters(limit).await?;

    Ok(Json(ApiResponse::success(letters, "Dead letters retrieved")))
}
