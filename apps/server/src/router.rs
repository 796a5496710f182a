use crate::error::{ApiError, ApiErrorExt};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use payflow_events::{
    Broker, BusKind, EventBus, EventStream, EventView, PaymentEvent, PaymentEventKind,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

pub fn init<B: Broker>(state: AppState<B>) -> Router {
    Router::new()
        .route("/health", get(health::<B>))
        .route("/payments/events", get(stream_all::<B>).post(emit::<B>))
        .route("/payments/users/{user_id}/events", get(stream_user::<B>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    bus: BusKind,
    subscribers: usize,
    timestamp: DateTime<Utc>,
}

async fn health<B: Broker>(State(state): State<AppState<B>>) -> impl IntoResponse {
    let bus = state.bus();
    let body = HealthResponse {
        status: if bus.is_closed() { "closing" } else { "up" },
        version: env!("CARGO_PKG_VERSION"),
        bus: bus.kind(),
        subscribers: bus.subscriber_count(),
        timestamp: Utc::now(),
    };

    (
        [
            (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(body),
    )
}

/// Body of `POST /payments/events`. The timestamp is assigned by the bus.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmitRequest {
    #[serde(rename = "type")]
    kind: PaymentEventKind,
    payment: Value,
    #[serde(default)]
    user_id: Option<String>,
}

async fn emit<B: Broker>(
    State(state): State<AppState<B>>,
    Json(request): Json<EmitRequest>,
) -> Result<StatusCode, ApiError> {
    let mut event = PaymentEvent::new(request.kind, request.payment);
    if let Some(user_id) = request.user_id {
        event = event.for_user(user_id);
    }
    state.bus().emit(event).await.context("emitting payment event")?;
    Ok(StatusCode::ACCEPTED)
}

async fn stream_all<B: Broker>(
    State(state): State<AppState<B>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("Streaming all payment events");
    sse(state.bus().subscribe())
}

async fn stream_user<B: Broker>(
    State(state): State<AppState<B>>,
    Path(user_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(user_id = %user_id, "Streaming payment events for user");
    sse(state.bus().subscribe_by_user_id(user_id))
}

/// Adapts a subscription to Server-Sent Events. Dropping the response
/// (client gone) drops the stream, which unregisters the subscription.
fn sse(stream: EventStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = stream.map(|next| {
        Ok(match next {
            Ok(event) => to_sse(&event),
            Err(e) => Event::default().event("error").data(e.to_string()),
        })
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn to_sse(event: &PaymentEvent) -> Event {
    match Event::default().event(event.kind().to_string()).json_data(EventView::from(event)) {
        Ok(sse) => sse,
        Err(e) => {
            warn!(error = %e, "Skipping payment event that cannot be encoded");
            Event::default().comment("unencodable event skipped")
        },
    }
}
