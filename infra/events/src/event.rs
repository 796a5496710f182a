use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Lifecycle stage a [`PaymentEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentEventKind {
    Created,
    StatusChange,
    Failed,
    Completed,
}

impl fmt::Display for PaymentEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::StatusChange => "statusChange",
            Self::Failed => "failed",
            Self::Completed => "completed",
        })
    }
}

/// An immutable payment lifecycle notification.
///
/// `payment` is the record handed over by the persistence layer and is never
/// interpreted by the bus. `timestamp` is (re)assigned by the bus when the
/// event is emitted; any value the producer sets is overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    #[serde(rename = "type")]
    kind: PaymentEventKind,
    payment: Value,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
}

impl PaymentEvent {
    #[must_use]
    pub fn new(kind: PaymentEventKind, payment: Value) -> Self {
        Self { kind, payment, timestamp: Utc::now(), user_id: None }
    }

    /// Correlates the event with a user so per-user subscriptions receive it.
    #[must_use]
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub const fn kind(&self) -> PaymentEventKind {
        self.kind
    }

    #[must_use]
    pub const fn payment(&self) -> &Value {
        &self.payment
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Convenience accessor for `payment.id` when the record carries one.
    #[must_use]
    pub fn payment_id(&self) -> Option<&str> {
        self.payment.get("id").and_then(Value::as_str)
    }

    /// Stamps the event with the current time. Called by every bus on `emit`.
    pub(crate) fn stamped(mut self) -> Self {
        self.timestamp = Utc::now();
        self
    }
}

/// The projection of an event sent to streaming clients.
///
/// Streaming consumers only see what happened, to which payment, and when;
/// the user correlation stays on the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventView {
    #[serde(rename = "type")]
    pub kind: PaymentEventKind,
    pub payment: Value,
    pub timestamp: DateTime<Utc>,
}

impl From<&PaymentEvent> for EventView {
    fn from(event: &PaymentEvent) -> Self {
        Self { kind: event.kind, payment: event.payment.clone(), timestamp: event.timestamp }
    }
}

type Predicate = dyn Fn(&PaymentEvent) -> bool + Send + Sync;

/// A cloneable predicate applied by each subscription to the events it receives.
#[derive(Clone)]
pub struct EventFilter(Arc<Predicate>);

impl EventFilter {
    /// Wraps `predicate`.
    ///
    /// The predicate runs while the bus holds its subscriber registry lock.
    /// It must not call back into the bus (`subscribe`, `emit`,
    /// `subscriber_count`, ...): the lock is not re-entrant and the call
    /// deadlocks.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&PaymentEvent) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    /// Matches events whose `user_id` equals `user_id`.
    pub fn user(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self::new(move |event| event.user_id() == Some(user_id.as_str()))
    }

    /// Matches events of a single lifecycle stage.
    #[must_use]
    pub fn kind(kind: PaymentEventKind) -> Self {
        Self::new(move |event| event.kind == kind)
    }

    /// Matches events accepted by both filters.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::new(move |event| self.matches(event) && other.matches(event))
    }

    #[must_use]
    pub fn matches(&self, event: &PaymentEvent) -> bool {
        (self.0)(event)
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventFilter(..)")
    }
}
