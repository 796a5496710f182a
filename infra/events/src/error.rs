use std::borrow::Cow;

/// Errors that can occur during event bus operations.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// The shared broker rejected a command or the connection to it failed.
    #[error("Redis error{}: {source}", format_context(.context))]
    Redis {
        #[source]
        source: redis::RedisError,
        context: Option<Cow<'static, str>>,
    },

    /// The external channel is unreachable or the connection dropped.
    #[error("Transport error{}: {message}", format_context(.context))]
    Transport { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A message received from the shared channel could not be parsed.
    #[error("Decode error{}: {source}", format_context(.context))]
    Decode {
        #[source]
        source: serde_json::Error,
        context: Option<Cow<'static, str>>,
    },

    /// An event could not be encoded for the shared channel.
    #[error("Encode error{}: {message}", format_context(.context))]
    Encode { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The event source ended abnormally. Delivered once to every live stream.
    #[error("Upstream terminated{}: {message}", format_context(.context))]
    Upstream { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The bus was closed before the operation was attempted.
    #[error("Event bus closed{}: {message}", format_context(.context))]
    Closed { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The bus could not be built from the supplied configuration.
    #[error("Invalid event bus configuration{}: {message}", format_context(.context))]
    InvalidConfiguration { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

impl EventBusError {
    /// Returns `true` when the error originates from the shared channel transport.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Redis { .. } | Self::Transport { .. })
    }

    pub(crate) fn upstream(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Upstream { message: message.into(), context: None }
    }

    pub(crate) fn closed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Closed { message: message.into(), context: None }
    }

    fn context_mut(&mut self) -> &mut Option<Cow<'static, str>> {
        match self {
            Self::Redis { context, .. }
            | Self::Transport { context, .. }
            | Self::Decode { context, .. }
            | Self::Encode { context, .. }
            | Self::Upstream { context, .. }
            | Self::Closed { context, .. }
            | Self::InvalidConfiguration { context, .. } => context,
        }
    }
}

impl From<redis::RedisError> for EventBusError {
    fn from(source: redis::RedisError) -> Self {
        Self::Redis { source, context: None }
    }
}

impl From<serde_json::Error> for EventBusError {
    fn from(source: serde_json::Error) -> Self {
        Self::Decode { source, context: None }
    }
}

/// Adds `.context(...)` to results that convert into [`EventBusError`].
pub trait EventBusErrorExt<T> {
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, EventBusError>;
}

impl<T, E> EventBusErrorExt<T> for Result<T, E>
where
    E: Into<EventBusError>,
{
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, EventBusError> {
        self.map_err(|e| {
            let mut e = e.into();
            *e.context_mut() = Some(context.into());
            e
        })
    }
}

fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}
