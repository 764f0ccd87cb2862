//! Per-migration events for an external log or metrics collector.

use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strata_core::model::{MigrationFile, Version};
use strata_core::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Started,
    Succeeded,
    Failed,
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Started => "started",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        })
    }
}

/// One structured record: `{version, description, outcome, duration_ms, error?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationEvent {
    pub version: Version,
    pub description: String,
    pub outcome: EventOutcome,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrationEvent {
    pub fn started(file: &MigrationFile) -> Self {
        Self::new(file, EventOutcome::Started, Duration::ZERO, None)
    }

    pub fn succeeded(file: &MigrationFile, duration: Duration) -> Self {
        Self::new(file, EventOutcome::Succeeded, duration, None)
    }

    pub fn failed(file: &MigrationFile, duration: Duration, error: &Error) -> Self {
        Self::new(
            file,
            EventOutcome::Failed,
            duration,
            Some(format!("{}: {}", error.kind(), error)),
        )
    }

    fn new(
        file: &MigrationFile,
        outcome: EventOutcome,
        duration: Duration,
        error: Option<String>,
    ) -> Self {
        Self {
            version: file.version().clone(),
            description: file.description().to_string(),
            outcome,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            error,
        }
    }
}

/// Receives migration events.
///
/// Sinks are best effort: a sink that cannot deliver an event logs the
/// problem and the run carries on.
pub trait EventSink: Send + fmt::Debug {
    fn emit(&mut self, event: &MigrationEvent);
}

/// Writes events through the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&mut self, event: &MigrationEvent) {
        match serde_json::to_string(event) {
            Ok(json) if event.outcome == EventOutcome::Failed => log::error!("migration event {json}"),
            Ok(json) => log::info!("migration event {json}"),
            Err(e) => log::warn!("Cannot serialize migration event: {e}"),
        }
    }
}

/// Writes one JSON document per line.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write + Send + fmt::Debug> {
    writer: W,
}

impl<W: Write + Send + fmt::Debug> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send + fmt::Debug> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, event: &MigrationEvent) {
        let written = serde_json::to_writer(&mut self.writer, event)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush());
        if let Err(e) = written {
            log::warn!("Cannot write migration event: {e}");
        }
    }
}

/// Keeps events in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<MigrationEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MigrationEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for MemorySink {
    fn emit(&mut self, event: &MigrationEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

/// Forwards every event to several sinks.
#[derive(Debug, Default)]
pub struct Fanout {
    sinks: Vec<Box<dyn EventSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl EventSink for Fanout {
    fn emit(&mut self, event: &MigrationEvent) {
        for sink in &mut self.sinks {
            sink.emit(event);
        }
    }
}
