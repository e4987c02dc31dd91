//! Event sinks: where the bus delivers events.

use std::sync::{Arc, Mutex};

use thiserror::Error;

use super::event::BuildEvent;
use super::redaction::redact;

/// Errors a sink may raise while handling an event.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink channel disconnected")]
    Disconnected,
    #[error("sink failure: {0}")]
    Other(String),
}

/// A destination for build events. Sinks receive events already
/// scrubbed by [`redact`] where free text is involved.
pub trait EventSink: Send {
    fn handle(&mut self, event: &BuildEvent) -> Result<(), SinkError>;
}

/// Logs each event through `tracing` at info level.
#[derive(Debug, Default, Clone)]
pub struct StdOutSink;

impl EventSink for StdOutSink {
    fn handle(&mut self, event: &BuildEvent) -> Result<(), SinkError> {
        tracing::info!(
            job = %event.job_id,
            correlation = %event.correlation_id,
            kind = event.kind_label(),
            "{}",
            redact(&event.to_string()),
        );
        Ok(())
    }
}

/// Forwards events into a flume channel for external consumers
/// (front-ends, test harnesses).
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: flume::Sender<BuildEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: flume::Sender<BuildEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn handle(&mut self, event: &BuildEvent) -> Result<(), SinkError> {
        self.tx
            .send(event.clone())
            .map_err(|_| SinkError::Disconnected)
    }
}

/// Captures events in memory; test-oriented.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<BuildEvent>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything captured so far.
    #[must_use]
    pub fn events(&self) -> Vec<BuildEvent> {
        self.events.lock().expect("memory sink poisoned").clone()
    }
}

impl EventSink for MemorySink {
    fn handle(&mut self, event: &BuildEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .map_err(|e| SinkError::Other(e.to_string()))?
            .push(event.clone());
        Ok(())
    }
}
