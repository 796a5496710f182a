use crate::bridge::Backlog;
use crate::broker::{Broker, Inbox, RedisBroker};
use crate::bus::{EventBus, EventStream};
use crate::codec;
use crate::error::{EventBusError, EventBusErrorExt};
use crate::event::{EventFilter, PaymentEvent};
use crate::memory::FanOut;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Channel name shared by every process instance.
pub const DEFAULT_CHANNEL: &str = "payment-events";

struct SharedInner<B> {
    broker: B,
    channel: String,
    fanout: FanOut,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Event bus backed by an external pub/sub channel.
///
/// `emit` publishes the encoded event; a receive task subscribed to the same
/// channel decodes every message and redelivers it through a local fan-out,
/// so subscribers get the in-memory semantics for events from any process
/// attached to the channel.
///
/// Ordering is only as strong as the broker's: events from one publisher
/// arrive in publish order, but there is no total order across publishers.
pub struct SharedBrokerBus<B: Broker = RedisBroker> {
    inner: Arc<SharedInner<B>>,
}

impl<B: Broker> Clone for SharedBrokerBus<B> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl SharedBrokerBus<RedisBroker> {
    /// Connects to redis at `url` and subscribes to [`DEFAULT_CHANNEL`].
    pub async fn connect_redis(url: &str) -> Result<Self, EventBusError> {
        let broker = RedisBroker::connect(url).await?;
        Self::connect(broker, DEFAULT_CHANNEL).await
    }
}

impl<B: Broker> SharedBrokerBus<B> {
    /// Subscribes to `channel` on `broker` and starts the receive task.
    ///
    /// Must be called within a Tokio runtime.
    pub async fn connect(broker: B, channel: impl Into<String>) -> Result<Self, EventBusError> {
        let channel = channel.into();
        let inbox = broker
            .subscribe(&channel)
            .await
            .context(format!("subscribing to shared channel '{channel}'"))?;

        let fanout = FanOut::default();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let receiver = tokio::spawn(receive(inbox, fanout.clone(), shutdown_rx, channel.clone()));

        info!(channel = %channel, "Shared-broker event bus connected");
        Ok(Self {
            inner: Arc::new(SharedInner {
                broker,
                channel,
                fanout,
                shutdown: Mutex::new(Some(shutdown_tx)),
                receiver: Mutex::new(Some(receiver)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.inner.channel
    }
}

async fn receive(
    mut inbox: Inbox,
    fanout: FanOut,
    mut shutdown: oneshot::Receiver<()>,
    channel: String,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!(channel = %channel, "Receive loop stopped");
                return;
            },
            message = inbox.next() => match message {
                Some(Ok(text)) => match codec::decode(&text) {
                    Ok(event) => {
                        fanout.dispatch(&Arc::new(event));
                    },
                    Err(e) => warn!(channel = %channel, error = %e, "Dropping malformed payment event"),
                },
                Some(Err(e)) => warn!(channel = %channel, error = %e, "Dropping unreadable broker message"),
                None => {
                    error!(channel = %channel, "Broker subscription ended unexpectedly");
                    fanout.fail(format!("subscription to '{channel}' was lost"));
                    return;
                },
            },
        }
    }
}

impl<B: Broker> EventBus for SharedBrokerBus<B> {
    async fn emit(&self, event: PaymentEvent) -> Result<(), EventBusError> {
        if self.is_closed() {
            return Err(EventBusError::closed("shared-broker bus"));
        }
        let payload = codec::encode(&event.stamped())?;
        self.inner
            .broker
            .publish(&self.inner.channel, payload)
            .await
            .context("publishing payment event")?;
        trace!(channel = %self.inner.channel, "Payment event published");
        Ok(())
    }

    fn subscribe_filtered(&self, filter: Option<EventFilter>) -> EventStream {
        self.inner.fanout.attach(filter, Backlog::Unbounded)
    }

    async fn close(&self) -> Result<(), EventBusError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(shutdown) = self.inner.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        let receiver = self.inner.receiver.lock().take();
        if let Some(receiver) = receiver
            && let Err(e) = receiver.await
        {
            warn!(error = %e, "Receive task ended abnormally");
        }

        let released = self.inner.broker.close().await;
        self.inner.fanout.close();
        info!(channel = %self.inner.channel, "Shared-broker event bus closed");
        released
    }

    fn subscriber_count(&self) -> usize {
        self.inner.fanout.len()
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl<B> Drop for SharedInner<B> {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.get_mut().take() {
            receiver.abort();
        }
    }
}

impl<B: Broker> fmt::Debug for SharedBrokerBus<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBrokerBus")
            .field("channel", &self.inner.channel)
            .field("fanout", &self.inner.fanout)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
