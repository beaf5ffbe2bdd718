//! Structured event log produced by resolve and apply.
//!
//! The log is append-only and replayable in order. It is created per
//! operation (one policy update or one enforcement pass) and flushed to an
//! [`EventSink`] when that operation ends.

pub mod sink;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use sink::{EventSink, MemorySink, TracingSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,

    /// Context such as the dependency or action the event belongs to
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl Event {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Attach a field to the event.
    pub fn with(&mut self, name: impl Into<String>, value: impl fmt::Display) -> &mut Self {
        self.fields.insert(name.into(), value.to_string());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, level: Level, message: impl Into<String>) -> &mut Event {
        self.events.push(Event::new(level, message));
        let last = self.events.len() - 1;
        &mut self.events[last]
    }

    pub fn debug(&mut self, message: impl Into<String>) -> &mut Event {
        self.log(Level::Debug, message)
    }

    pub fn info(&mut self, message: impl Into<String>) -> &mut Event {
        self.log(Level::Info, message)
    }

    pub fn warn(&mut self, message: impl Into<String>) -> &mut Event {
        self.log(Level::Warn, message)
    }

    pub fn error(&mut self, message: impl Into<String>) -> &mut Event {
        self.log(Level::Error, message)
    }

    /// Move all events of `other` to the end of this log.
    pub fn append(&mut self, other: EventLog) {
        self.events.extend(other.events);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.level == Level::Error)
            .count()
    }

    /// Events at `level` or above.
    pub fn at_least(&self, level: Level) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(move |e| e.level >= level)
    }

    /// Replay every event into a sink, in order.
    pub fn save(&self, sink: &mut dyn EventSink) -> anyhow::Result<()> {
        for event in &self.events {
            sink.write(event)?;
        }
        sink.flush()
    }
}
