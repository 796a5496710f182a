use crate::broker::{Broker, RedisBroker};
use crate::bus::{EventBus, EventStream};
use crate::error::EventBusError;
use crate::event::{EventFilter, PaymentEvent};
use crate::hybrid::{DEFAULT_LOCAL_CAPACITY, HybridEventBus};
use crate::memory::MemoryEventBus;
use crate::shared::{DEFAULT_CHANNEL, SharedBrokerBus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

/// Broker address used when none is configured.
pub const DEFAULT_BROKER_URL: &str = "redis://localhost:6379";

/// Transport strategy of a [`PaymentBus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusKind {
    #[default]
    Memory,
    #[serde(alias = "redis")]
    SharedBroker,
    Hybrid,
}

impl BusKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::SharedBroker => "shared-broker",
            Self::Hybrid => "hybrid",
        }
    }

    #[must_use]
    pub const fn uses_broker(self) -> bool {
        !matches!(self, Self::Memory)
    }
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BusKind {
    type Err = EventBusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "shared-broker" | "redis" => Ok(Self::SharedBroker),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(EventBusError::InvalidConfiguration {
                message: format!("unknown bus kind '{other}'").into(),
                context: Some("expected memory, shared-broker (redis) or hybrid".into()),
            }),
        }
    }
}

/// Selects and parameterises the bus a process runs with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub kind: BusKind,
    /// Broker address; ignored by the in-memory bus.
    pub url: Option<String>,
    pub channel: String,
    /// Backlog bound of each hybrid-local subscriber.
    pub local_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            kind: BusKind::Memory,
            url: None,
            channel: DEFAULT_CHANNEL.to_owned(),
            local_capacity: DEFAULT_LOCAL_CAPACITY.get(),
        }
    }
}

impl BusConfig {
    #[must_use]
    pub fn new(kind: BusKind) -> Self {
        Self { kind, ..Self::default() }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        self.url.as_deref().unwrap_or(DEFAULT_BROKER_URL)
    }

    /// Checks the settings the selected kind depends on.
    pub fn validate(&self) -> Result<(), EventBusError> {
        if self.kind.uses_broker() && self.channel.trim().is_empty() {
            return Err(invalid("channel must not be empty"));
        }
        if self.kind == BusKind::Hybrid && self.local_capacity == 0 {
            return Err(invalid("local_capacity must be greater than zero"));
        }
        Ok(())
    }

    fn local_capacity(&self) -> Result<NonZeroUsize, EventBusError> {
        NonZeroUsize::new(self.local_capacity)
            .ok_or_else(|| invalid("local_capacity must be greater than zero"))
    }
}

fn invalid(message: &'static str) -> EventBusError {
    EventBusError::InvalidConfiguration { message: message.into(), context: None }
}

/// The bus variant chosen at construction.
///
/// Dispatches the [`EventBus`] capability to the selected variant, so callers
/// hold one concrete type regardless of the configured transport.
#[derive(Debug)]
pub enum PaymentBus<B: Broker = RedisBroker> {
    Memory(MemoryEventBus),
    SharedBroker(SharedBrokerBus<B>),
    Hybrid(HybridEventBus<B>),
}

impl<B: Broker> Clone for PaymentBus<B> {
    fn clone(&self) -> Self {
        match self {
            Self::Memory(bus) => Self::Memory(bus.clone()),
            Self::SharedBroker(bus) => Self::SharedBroker(bus.clone()),
            Self::Hybrid(bus) => Self::Hybrid(bus.clone()),
        }
    }
}

impl PaymentBus<RedisBroker> {
    /// Builds the configured bus, connecting to redis for the broker-backed kinds.
    pub async fn connect(config: &BusConfig) -> Result<Self, EventBusError> {
        config.validate()?;
        if !config.kind.uses_broker() {
            return Ok(Self::Memory(MemoryEventBus::new()));
        }
        let broker = RedisBroker::connect(config.url()).await?;
        Self::with_broker(config, broker).await
    }
}

impl<B: Broker> PaymentBus<B> {
    /// Builds the configured bus on top of an already connected `broker`.
    /// The broker is dropped unused for [`BusKind::Memory`].
    pub async fn with_broker(config: &BusConfig, broker: B) -> Result<Self, EventBusError> {
        config.validate()?;
        let bus = match config.kind {
            BusKind::Memory => Self::Memory(MemoryEventBus::new()),
            BusKind::SharedBroker => {
                Self::SharedBroker(SharedBrokerBus::connect(broker, config.channel.clone()).await?)
            },
            BusKind::Hybrid => {
                let shared = SharedBrokerBus::connect(broker, config.channel.clone()).await?;
                Self::Hybrid(HybridEventBus::new(shared, config.local_capacity()?))
            },
        };
        Ok(bus)
    }

    #[must_use]
    pub const fn kind(&self) -> BusKind {
        match self {
            Self::Memory(_) => BusKind::Memory,
            Self::SharedBroker(_) => BusKind::SharedBroker,
            Self::Hybrid(_) => BusKind::Hybrid,
        }
    }
}

impl<B: Broker> EventBus for PaymentBus<B> {
    async fn emit(&self, event: PaymentEvent) -> Result<(), EventBusError> {
        match self {
            Self::Memory(bus) => bus.emit(event).await,
            Self::SharedBroker(bus) => bus.emit(event).await,
            Self::Hybrid(bus) => bus.emit(event).await,
        }
    }

    fn subscribe_filtered(&self, filter: Option<EventFilter>) -> EventStream {
        match self {
            Self::Memory(bus) => bus.subscribe_filtered(filter),
            Self::SharedBroker(bus) => bus.subscribe_filtered(filter),
            Self::Hybrid(bus) => bus.subscribe_filtered(filter),
        }
    }

    async fn close(&self) -> Result<(), EventBusError> {
        match self {
            Self::Memory(bus) => bus.close().await,
            Self::SharedBroker(bus) => bus.close().await,
            Self::Hybrid(bus) => bus.close().await,
        }
    }

    fn subscriber_count(&self) -> usize {
        match self {
            Self::Memory(bus) => bus.subscriber_count(),
            Self::SharedBroker(bus) => bus.subscriber_count(),
            Self::Hybrid(bus) => bus.subscriber_count(),
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            Self::Memory(bus) => bus.is_closed(),
            Self::SharedBroker(bus) => bus.is_closed(),
            Self::Hybrid(bus) => bus.is_closed(),
        }
    }
}
