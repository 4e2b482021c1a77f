use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured event emitted by the client.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
    pub context: Map<String, Value>,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            context: Map::new(),
        }
    }

    /// Adds one context field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_owned(), value.into());
        self
    }
}

/// Sink for client events.
///
/// Logging is fire-and-forget: implementations must not block for long and
/// cannot fail the request that produced the event.
pub trait Logger: Send + Sync {
    fn log(&self, event: LogEvent);
}

/// Forwards events to `tracing`, with the context map as the `context` field.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, event: LogEvent) {
        let context = Value::Object(event.context);
        match event.level {
            LogLevel::Debug => tracing::debug!(%context, "{}", event.message),
            LogLevel::Info => tracing::info!(%context, "{}", event.message),
            LogLevel::Warn => tracing::warn!(%context, "{}", event.message),
            LogLevel::Error => tracing::error!(%context, "{}", event.message),
        }
    }
}
