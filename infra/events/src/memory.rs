use crate::bridge::{self, Backlog, BridgeSender};
use crate::bus::{EventBus, EventStream};
use crate::error::EventBusError;
use crate::event::{EventFilter, PaymentEvent};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace};

type SubscriberId = u64;

struct Subscriber {
    filter: Option<EventFilter>,
    sender: BridgeSender<Arc<PaymentEvent>, EventBusError>,
}

enum Delivery {
    Sent,
    Filtered,
    Gone,
}

impl Subscriber {
    fn deliver(&self, event: &Arc<PaymentEvent>) -> Delivery {
        if self.filter.as_ref().is_some_and(|f| !f.matches(event)) {
            return if self.sender.is_closed() { Delivery::Gone } else { Delivery::Filtered };
        }
        match self.sender.push(Arc::clone(event)) {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::Gone,
        }
    }
}

#[derive(Default)]
struct Registry {
    next_id: SubscriberId,
    subscribers: FxHashMap<SubscriberId, Subscriber>,
    closed: bool,
}

/// The broadcast point shared by every bus variant: an arena of subscriber
/// handles keyed by id.
///
/// Dispatch happens under the registry lock, so concurrent emitters are
/// serialized into one global order that every subscriber observes. Each
/// subscriber owns its own holding area, so a slow consumer never blocks
/// delivery to the others.
#[derive(Clone, Default)]
pub(crate) struct FanOut {
    registry: Arc<Mutex<Registry>>,
}

impl FanOut {
    pub(crate) fn attach(&self, filter: Option<EventFilter>, backlog: Backlog) -> EventStream {
        let (sender, stream) = bridge::channel(backlog);
        let id = {
            let mut registry = self.registry.lock();
            if registry.closed {
                drop(registry);
                // Ends the stream immediately.
                drop(sender);
                return stream;
            }
            let id = registry.next_id;
            registry.next_id += 1;
            registry.subscribers.insert(id, Subscriber { filter, sender });
            id
        };

        let registry = Arc::downgrade(&self.registry);
        stream.on_close(move || detach(&registry, id));
        debug!(subscriber = id, "Subscriber attached");
        stream
    }

    /// Pushes `event` to every matching subscriber. Returns how many received it.
    pub(crate) fn dispatch(&self, event: &Arc<PaymentEvent>) -> usize {
        let mut registry = self.registry.lock();
        if registry.closed {
            return 0;
        }

        let mut delivered = 0;
        registry.subscribers.retain(|_, subscriber| match subscriber.deliver(event) {
            Delivery::Sent => {
                delivered += 1;
                true
            },
            Delivery::Filtered => true,
            Delivery::Gone => false,
        });
        trace!(kind = %event.kind(), delivered, "Payment event dispatched");
        delivered
    }

    /// Ends every stream normally. Returns `false` if already closed.
    pub(crate) fn close(&self) -> bool {
        let Some(subscribers) = self.shutdown() else {
            return false;
        };
        for subscriber in subscribers {
            subscriber.sender.finish();
        }
        true
    }

    /// Ends every stream with a terminal [`EventBusError::Upstream`].
    pub(crate) fn fail(&self, message: impl Into<Cow<'static, str>>) {
        let Some(subscribers) = self.shutdown() else {
            return;
        };
        let message = message.into();
        for subscriber in subscribers {
            subscriber.sender.fail(EventBusError::upstream(message.clone()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.registry.lock().subscribers.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.registry.lock().closed
    }

    /// Marks the registry closed and hands back the entries so they are ended
    /// outside the lock; ending a stream may re-enter [`detach`].
    fn shutdown(&self) -> Option<Vec<Subscriber>> {
        let mut registry = self.registry.lock();
        if registry.closed {
            return None;
        }
        registry.closed = true;
        Some(registry.subscribers.drain().map(|(_, s)| s).collect())
    }
}

fn detach(registry: &Weak<Mutex<Registry>>, id: SubscriberId) {
    let Some(registry) = registry.upgrade() else {
        return;
    };
    let removed = registry.lock().subscribers.remove(&id);
    if removed.is_some() {
        debug!(subscriber = id, "Subscriber detached");
    }
}

impl fmt::Debug for FanOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("FanOut")
            .field("subscribers", &registry.subscribers.len())
            .field("closed", &registry.closed)
            .finish()
    }
}

/// In-process event bus.
///
/// Every subscriber registered before an `emit` observes it, and all
/// subscribers observe emits in the exact order they were made.
/// `emit` never suspends.
///
/// # Example
///
/// ```rust
/// use payflow_events::{EventBus, MemoryEventBus, PaymentEvent, PaymentEventKind};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), payflow_events::EventBusError> {
/// let bus = MemoryEventBus::new();
/// let mut stream = bus.subscribe_by_user_id("u1");
///
/// bus.emit(PaymentEvent::new(PaymentEventKind::Created, json!({"id": "p1"})).for_user("u1"))
///     .await?;
///
/// let event = stream.next().await.unwrap()?;
/// assert_eq!(event.payment_id(), Some("p1"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryEventBus {
    fanout: FanOut,
    backlog: Backlog,
}

impl MemoryEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus whose subscribers buffer according to `backlog`.
    #[must_use]
    pub fn with_backlog(backlog: Backlog) -> Self {
        Self { fanout: FanOut::default(), backlog }
    }

    /// Delivers an already stamped event. Used when relaying events that
    /// received their timestamp elsewhere.
    pub(crate) fn relay(&self, event: &Arc<PaymentEvent>) -> usize {
        self.fanout.dispatch(event)
    }

    pub(crate) fn fail(&self, message: impl Into<Cow<'static, str>>) {
        self.fanout.fail(message);
    }
}

impl EventBus for MemoryEventBus {
    async fn emit(&self, event: PaymentEvent) -> Result<(), EventBusError> {
        if self.fanout.is_closed() {
            return Err(EventBusError::closed("in-memory bus"));
        }
        self.fanout.dispatch(&Arc::new(event.stamped()));
        Ok(())
    }

    fn subscribe_filtered(&self, filter: Option<EventFilter>) -> EventStream {
        self.fanout.attach(filter, self.backlog)
    }

    async fn close(&self) -> Result<(), EventBusError> {
        if self.fanout.close() {
            info!("In-memory event bus closed");
        }
        Ok(())
    }

    fn subscriber_count(&self) -> usize {
        self.fanout.len()
    }

    fn is_closed(&self) -> bool {
        self.fanout.is_closed()
    }
}
