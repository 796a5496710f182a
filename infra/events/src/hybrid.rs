use crate::bridge::Backlog;
use crate::broker::{Broker, RedisBroker};
use crate::bus::{EventBus, EventStream};
use crate::error::EventBusError;
use crate::event::{EventFilter, PaymentEvent};
use crate::memory::MemoryEventBus;
use crate::shared::SharedBrokerBus;
use parking_lot::Mutex;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default bound of each local subscriber's backlog.
pub const DEFAULT_LOCAL_CAPACITY: NonZeroUsize = NonZeroUsize::new(1024).unwrap();

struct HybridInner<B: Broker> {
    shared: SharedBrokerBus<B>,
    local: MemoryEventBus,
    echo: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Writes through the shared broker, reads from a local fan-out.
///
/// `emit` never takes a local shortcut: an event reaches this process's
/// subscribers only after round-tripping through the broker, so local
/// subscribers see the same order as every other instance on the channel.
///
/// Local subscribers buffer at most `local_capacity` events each. A
/// subscriber that falls further behind loses its oldest buffered events
/// instead of holding back the echo task.
///
/// Losing the broker subscription ends local streams with an upstream error
/// but does not close the bus: `emit` keeps reporting the transport failure.
pub struct HybridEventBus<B: Broker = RedisBroker> {
    inner: Arc<HybridInner<B>>,
}

impl<B: Broker> Clone for HybridEventBus<B> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<B: Broker> HybridEventBus<B> {
    /// Wires `shared` into a fresh local bus and starts the echo task.
    #[must_use]
    pub fn new(shared: SharedBrokerBus<B>, local_capacity: NonZeroUsize) -> Self {
        let local = MemoryEventBus::with_backlog(Backlog::DropOldest(local_capacity));
        let echo = tokio::spawn(echo(shared.subscribe(), local.clone()));
        info!(
            channel = shared.channel(),
            local_capacity = local_capacity.get(),
            "Hybrid event bus ready"
        );

        Self {
            inner: Arc::new(HybridInner {
                shared,
                local,
                echo: Mutex::new(Some(echo)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The broker-backed leg.
    #[must_use]
    pub fn shared(&self) -> &SharedBrokerBus<B> {
        &self.inner.shared
    }
}

/// Relays broker-sourced events into the local bus until the broker leg ends.
async fn echo(mut upstream: EventStream, local: MemoryEventBus) {
    while let Some(next) = upstream.next().await {
        match next {
            Ok(event) => {
                local.relay(&event);
            },
            Err(e) => {
                warn!(error = %e, "Broker leg failed; ending local subscriptions");
                let message = match e {
                    EventBusError::Upstream { message, .. } => message,
                    other => other.to_string().into(),
                };
                local.fail(message);
                return;
            },
        }
    }
    debug!("Echo task finished");
}

impl<B: Broker> EventBus for HybridEventBus<B> {
    async fn emit(&self, event: PaymentEvent) -> Result<(), EventBusError> {
        if self.is_closed() {
            return Err(EventBusError::closed("hybrid bus"));
        }
        self.inner.shared.emit(event).await
    }

    fn subscribe_filtered(&self, filter: Option<EventFilter>) -> EventStream {
        self.inner.local.subscribe_filtered(filter)
    }

    async fn close(&self) -> Result<(), EventBusError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Broker leg first: no late message may reach a closed local bus.
        let released = self.inner.shared.close().await;

        let echo = self.inner.echo.lock().take();
        if let Some(echo) = echo
            && let Err(e) = echo.await
        {
            warn!(error = %e, "Echo task ended abnormally");
        }

        if !self.inner.local.is_closed() {
            self.inner.local.close().await?;
            info!("Hybrid event bus closed");
        }
        released
    }

    fn subscriber_count(&self) -> usize {
        self.inner.local.subscriber_count()
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl<B: Broker> Drop for HybridInner<B> {
    fn drop(&mut self) {
        if let Some(echo) = self.echo.get_mut().take() {
            echo.abort();
        }
    }
}

impl<B: Broker> fmt::Debug for HybridEventBus<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridEventBus")
            .field("shared", &self.inner.shared)
            .field("local", &self.inner.local)
            .field("closed", &self.is_closed())
            .finish()
    }
}
