#![allow(dead_code, unreachable_pub)]

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{Request, Response, header};
use http_body_util::BodyExt;
use payflow_events::{
    BusConfig, BusKind, LoopbackBroker, MemoryEventBus, PaymentBus,
};
use payflow_server::{AppState, router};
use std::time::Duration;

/// Builds the router over a fresh in-memory bus.
#[must_use]
pub fn memory_app() -> (Router, AppState<LoopbackBroker>) {
    let state = AppState::new(PaymentBus::Memory(MemoryEventBus::new()));
    (router::init(state.clone()), state)
}

/// Builds the router over a hybrid bus on a loopback broker.
/// # Panics
/// * If the bus cannot be built.
pub async fn hybrid_app(broker: &LoopbackBroker) -> (Router, AppState<LoopbackBroker>) {
    let bus = PaymentBus::with_broker(&BusConfig::new(BusKind::Hybrid), broker.clone())
        .await
        .expect("hybrid bus builds");
    let state = AppState::new(bus);
    (router::init(state.clone()), state)
}

/// # Panics
/// * If the request cannot be built.
#[must_use]
pub fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

/// # Panics
/// * If the request cannot be built.
#[must_use]
pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request builds")
}

/// Reads the next data frame of a streaming body as text.
/// # Panics
/// * If no frame arrives within two seconds or the body ends.
pub async fn next_chunk(body: &mut Body) -> String {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
            .await
            .expect("stream stalled")
            .expect("stream ended")
            .expect("body error");
        if let Ok(data) = frame.into_data() {
            return String::from_utf8(data.to_vec()).expect("utf-8 frame");
        }
    }
}

/// Collects a complete body.
/// # Panics
/// * If the body fails.
pub async fn read_body(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.expect("body collects").to_bytes()
}
