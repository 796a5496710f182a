//! External pub/sub transports used by the shared-broker bus.

use crate::error::{EventBusError, EventBusErrorExt};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use fxhash::FxHashMap;
use parking_lot::{Mutex, RwLock};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Messages received on a subscribed channel.
///
/// An `Err` item is a single unreadable message; the end of the stream means
/// the receiving connection is gone.
pub type Inbox = BoxStream<'static, Result<String, EventBusError>>;

/// A named-channel publish/subscribe transport.
pub trait Broker: Send + Sync + 'static {
    /// Publishes one text message on `channel`.
    fn publish(
        &self,
        channel: &str,
        payload: String,
    ) -> impl Future<Output = Result<(), EventBusError>> + Send;

    /// Opens a dedicated receiving connection subscribed to `channel`.
    fn subscribe(&self, channel: &str) -> impl Future<Output = Result<Inbox, EventBusError>> + Send;

    /// Releases the publishing connection.
    fn close(&self) -> impl Future<Output = Result<(), EventBusError>> + Send;
}

/// Redis pub/sub transport.
///
/// Owns one multiplexed connection for publishing; every [`subscribe`](Broker::subscribe)
/// opens a separate pub/sub connection that lives as long as the returned inbox.
pub struct RedisBroker {
    client: redis::Client,
    publisher: Mutex<Option<MultiplexedConnection>>,
}

impl RedisBroker {
    /// Connects the publishing side to `url` (e.g. `redis://localhost:6379`).
    pub async fn connect(url: &str) -> Result<Self, EventBusError> {
        let client = redis::Client::open(url).context("opening redis client")?;
        let publisher = client
            .get_multiplexed_async_connection()
            .await
            .context("connecting redis publisher")?;
        info!(url, "Connected to redis");
        Ok(Self { client, publisher: Mutex::new(Some(publisher)) })
    }
}

impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), EventBusError> {
        let connection = self.publisher.lock().clone();
        let Some(mut connection) = connection else {
            return Err(EventBusError::closed("redis publisher"));
        };
        let receivers: i64 =
            connection.publish(channel, payload).await.context("publishing to redis")?;
        trace!(channel, receivers, "Published to redis");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Inbox, EventBusError> {
        let mut pubsub =
            self.client.get_async_pubsub().await.context("connecting redis subscriber")?;
        pubsub.subscribe(channel).await.context("subscribing to redis channel")?;
        debug!(channel, "Subscribed to redis channel");

        let inbox = pubsub
            .into_on_message()
            .map(|message| message.get_payload::<String>().context("reading redis payload"));
        Ok(inbox.boxed())
    }

    async fn close(&self) -> Result<(), EventBusError> {
        if self.publisher.lock().take().is_some() {
            info!("Redis publisher released");
        }
        Ok(())
    }
}

impl fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBroker")
            .field("connected", &self.publisher.lock().is_some())
            .finish_non_exhaustive()
    }
}

const LOOPBACK_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct LoopbackState {
    channels: RwLock<FxHashMap<String, broadcast::Sender<String>>>,
    disconnected: AtomicBool,
}

/// In-process stand-in for an external broker.
///
/// Clones share the same channels, so several buses built on clones of one
/// `LoopbackBroker` behave like separate processes attached to one server.
/// [`disconnect`](Self::disconnect) simulates losing the server.
#[derive(Debug, Clone, Default)]
pub struct LoopbackBroker {
    state: Arc<LoopbackState>,
}

impl LoopbackBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every channel: open inboxes end and further calls fail.
    pub fn disconnect(&self) {
        self.state.disconnected.store(true, Ordering::SeqCst);
        self.state.channels.write().clear();
        info!("Loopback broker disconnected");
    }

    fn sender(&self, channel: &str) -> Result<broadcast::Sender<String>, EventBusError> {
        if self.state.disconnected.load(Ordering::SeqCst) {
            return Err(EventBusError::Transport {
                message: "loopback broker is disconnected".into(),
                context: Some(channel.to_owned().into()),
            });
        }
        if let Some(sender) = self.state.channels.read().get(channel) {
            return Ok(sender.clone());
        }
        let mut channels = self.state.channels.write();
        let sender = channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(LOOPBACK_CAPACITY).0);
        Ok(sender.clone())
    }
}

impl Broker for LoopbackBroker {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), EventBusError> {
        let sender = self.sender(channel)?;
        match sender.send(payload) {
            Ok(receivers) => trace!(channel, receivers, "Published to loopback channel"),
            Err(_) => trace!(channel, "Message dropped: no active subscribers"),
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Inbox, EventBusError> {
        let receiver = self.sender(channel)?.subscribe();
        let channel = channel.to_owned();

        let inbox = stream::unfold((receiver, channel), |(mut receiver, channel)| async move {
            let mut skipped = 0u64;
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if skipped > 0 {
                            warn!(
                                channel = %channel,
                                skipped,
                                "Loopback subscriber lagged; continuing from latest message"
                            );
                        }
                        return Some((Ok(message), (receiver, channel)));
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        skipped = skipped.saturating_add(n);
                    },
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(inbox.boxed())
    }

    async fn close(&self) -> Result<(), EventBusError> {
        Ok(())
    }
}
