#![allow(dead_code, unreachable_pub)]

use payflow_events::{
    EventBusError, EventStream, HybridEventBus, LoopbackBroker, PaymentEvent, PaymentEventKind,
    SharedBrokerBus,
};
use serde_json::json;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

pub const CHANNEL: &str = "payment-events";

/// Upper bound for a broker round trip in tests.
pub const ROUND_TRIP: Duration = Duration::from_secs(2);

#[must_use]
pub fn event(kind: PaymentEventKind, payment_id: &str, user_id: &str) -> PaymentEvent {
    PaymentEvent::new(kind, json!({"id": payment_id, "amount": 0.25})).for_user(user_id)
}

/// Connects a shared-broker bus to `broker`.
/// # Panics
/// * If the loopback subscription cannot be opened.
pub async fn shared_bus(broker: &LoopbackBroker) -> SharedBrokerBus<LoopbackBroker> {
    SharedBrokerBus::connect(broker.clone(), CHANNEL).await.expect("shared bus connects")
}

/// Connects a hybrid bus to `broker` with the given local backlog bound.
/// # Panics
/// * If the loopback subscription cannot be opened.
pub async fn hybrid_bus(broker: &LoopbackBroker, capacity: usize) -> HybridEventBus<LoopbackBroker> {
    let capacity = NonZeroUsize::new(capacity).expect("non-zero capacity");
    HybridEventBus::new(shared_bus(broker).await, capacity)
}

/// Awaits the next item, failing the test instead of hanging.
/// # Panics
/// * If nothing arrives within [`ROUND_TRIP`].
pub async fn next_within(stream: &mut EventStream) -> Option<Result<Arc<PaymentEvent>, EventBusError>> {
    tokio::time::timeout(ROUND_TRIP, stream.next()).await.expect("stream stalled")
}

/// Awaits the next event and unwraps it.
/// # Panics
/// * If the stream stalls, ends or yields an error.
pub async fn recv(stream: &mut EventStream) -> Arc<PaymentEvent> {
    next_within(stream).await.expect("stream ended").expect("stream failed")
}

/// Asserts that nothing is delivered within a short grace period.
/// # Panics
/// * If an item or end-of-stream arrives.
pub async fn assert_silent(stream: &mut EventStream) {
    let outcome = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
    assert!(outcome.is_err(), "expected no delivery, got {outcome:?}");
}
