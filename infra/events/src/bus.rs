use crate::bridge::StreamBridge;
use crate::error::EventBusError;
use crate::event::{EventFilter, PaymentEvent};
use std::future::Future;
use std::sync::Arc;

/// A live subscription: a pull-based sequence of events that ends when the
/// bus closes, or yields one [`EventBusError::Upstream`] if the source broke.
pub type EventStream = StreamBridge<Arc<PaymentEvent>, EventBusError>;

/// Capability shared by every bus variant.
pub trait EventBus: Send + Sync {
    /// Stamps `event` with the current time and propagates it to subscribers.
    ///
    /// # Errors
    /// Returns a transport error when the event could not be handed to the
    /// underlying channel, or [`EventBusError::Closed`] after [`close`](Self::close).
    fn emit(&self, event: PaymentEvent) -> impl Future<Output = Result<(), EventBusError>> + Send;

    /// Registers a new subscription, optionally narrowed by `filter`.
    ///
    /// Each call yields an independent stream that only sees events emitted
    /// after it was registered.
    fn subscribe_filtered(&self, filter: Option<EventFilter>) -> EventStream;

    /// Releases transport resources and ends every live stream.
    /// Closing an already closed bus is a no-op.
    ///
    /// # Errors
    /// Returns a transport error if a connection could not be shut down
    /// cleanly; streams are ended regardless.
    fn close(&self) -> impl Future<Output = Result<(), EventBusError>> + Send;

    /// Number of live subscriptions.
    fn subscriber_count(&self) -> usize;

    fn is_closed(&self) -> bool;

    /// Subscribes to every event.
    fn subscribe(&self) -> EventStream {
        self.subscribe_filtered(None)
    }

    /// Subscribes to the events correlated with `user_id`.
    fn subscribe_by_user_id(&self, user_id: impl Into<String>) -> EventStream {
        self.subscribe_filtered(Some(EventFilter::user(user_id)))
    }
}
