use payflow_events::{Broker, PaymentBus, RedisBroker};
use std::sync::Arc;

/// Shared handler state: the process-wide payment bus.
#[derive(Debug)]
pub struct AppState<B: Broker = RedisBroker> {
    bus: Arc<PaymentBus<B>>,
}

impl<B: Broker> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self { bus: Arc::clone(&self.bus) }
    }
}

impl<B: Broker> AppState<B> {
    #[must_use]
    pub fn new(bus: PaymentBus<B>) -> Self {
        Self { bus: Arc::new(bus) }
    }

    #[must_use]
    pub fn bus(&self) -> &PaymentBus<B> {
        &self.bus
    }
}
