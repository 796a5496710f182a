//! Wire form of a [`PaymentEvent`] on the shared channel: one UTF-8 JSON
//! document per message, timestamp as an RFC 3339 string.

use crate::error::{EventBusError, EventBusErrorExt};
use crate::event::PaymentEvent;

pub(crate) fn encode(event: &PaymentEvent) -> Result<String, EventBusError> {
    serde_json::to_string(event).map_err(|e| EventBusError::Encode {
        message: e.to_string().into(),
        context: Some("serializing payment event".into()),
    })
}

pub(crate) fn decode(message: &str) -> Result<PaymentEvent, EventBusError> {
    serde_json::from_str(message).context("parsing payment event from broker message")
}
