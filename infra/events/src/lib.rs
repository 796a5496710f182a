//! # Payment Events
//!
//! Publish/subscribe distribution of payment lifecycle events.
//!
//! ## Overview
//!
//! A producer hands a [`PaymentEvent`] to [`EventBus::emit`]; every live
//! subscription whose filter matches receives it. Subscriptions are
//! [`StreamBridge`]s: pull-based streams a streaming endpoint can await one
//! item at a time.
//!
//! ## Variants
//!
//! * **In-memory** ([`MemoryEventBus`]): one process, single global order.
//! * **Shared broker** ([`SharedBrokerBus`]): events travel through a named
//!   pub/sub channel (Redis in production) so every process on the channel sees them.
//! * **Hybrid** ([`HybridEventBus`]): writes through the broker, reads from a
//!   local fan-out fed by the broker subscription.
//!
//! [`PaymentBus`] selects one of them from a [`BusConfig`].
//!
//! # Example
//!
//! ```rust
//! use payflow_events::{BusConfig, EventBus, EventBusError, PaymentBus, PaymentEvent, PaymentEventKind};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EventBusError> {
//!     let bus = PaymentBus::connect(&BusConfig::default()).await?;
//!     let mut all = bus.subscribe();
//!
//!     bus.emit(PaymentEvent::new(PaymentEventKind::Created, json!({"id": "p1"}))).await?;
//!     bus.close().await?;
//!
//!     let event = all.next().await.expect("one event")?;
//!     assert_eq!(event.payment_id(), Some("p1"));
//!     assert!(all.next().await.is_none());
//!     Ok(())
//! }
//! ```

pub mod bridge;
mod broker;
mod bus;
mod codec;
mod config;
mod error;
mod event;
mod hybrid;
mod memory;
mod shared;

pub use bridge::{Backlog, BridgeSender, BridgeState, StreamBridge};
pub use broker::{Broker, Inbox, LoopbackBroker, RedisBroker};
pub use bus::{EventBus, EventStream};
pub use config::{BusConfig, BusKind, DEFAULT_BROKER_URL, PaymentBus};
pub use error::{EventBusError, EventBusErrorExt};
pub use event::{EventFilter, EventView, PaymentEvent, PaymentEventKind};
pub use hybrid::{DEFAULT_LOCAL_CAPACITY, HybridEventBus};
pub use memory::MemoryEventBus;
pub use shared::{DEFAULT_CHANNEL, SharedBrokerBus};
