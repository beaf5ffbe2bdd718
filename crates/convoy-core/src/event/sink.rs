//! Destinations for event logs.

use super::{Event, Level};

pub trait EventSink {
    fn write(&mut self, event: &Event) -> anyhow::Result<()>;

    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Replays events through `tracing` at their own level.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn write(&mut self, event: &Event) -> anyhow::Result<()> {
        let fields = event
            .fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        match event.level {
            Level::Debug => tracing::debug!(target: "convoy::events", %fields, "{}", event.message),
            Level::Info => tracing::info!(target: "convoy::events", %fields, "{}", event.message),
            Level::Warn => tracing::warn!(target: "convoy::events", %fields, "{}", event.message),
            Level::Error => tracing::error!(target: "convoy::events", %fields, "{}", event.message),
        }
        Ok(())
    }
}

/// Keeps copies of written events.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub events: Vec<Event>,
}

impl EventSink for MemorySink {
    fn write(&mut self, event: &Event) -> anyhow::Result<()> {
        self.events.push(event.clone());
        Ok(())
    }
}
