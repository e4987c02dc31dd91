//! The emitter handle components hold to publish events.

use std::fmt;

use thiserror::Error;

use super::event::BuildEvent;

/// Abstract, cloneable event publisher. Emission is synchronous and
/// non-blocking; a full or disconnected bus surfaces as an error the
/// caller may log and drop.
pub trait EventEmitter: Send + Sync + fmt::Debug {
    fn emit(&self, event: BuildEvent) -> Result<(), EmitterError>;
}

/// Errors that can occur when emitting an event.
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("event bus disconnected")]
    Disconnected,
}

/// Emitter backed by the bus's flume channel.
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    pub(super) tx: flume::Sender<BuildEvent>,
}

impl EventEmitter for ChannelEmitter {
    fn emit(&self, event: BuildEvent) -> Result<(), EmitterError> {
        self.tx.send(event).map_err(|_| EmitterError::Disconnected)
    }
}

/// Emitter that drops everything; useful for tests and tools that do
/// not observe events.
#[derive(Debug, Clone, Default)]
pub struct NullEmitter;

impl EventEmitter for NullEmitter {
    fn emit(&self, _event: BuildEvent) -> Result<(), EmitterError> {
        Ok(())
    }
}
