//! Build observability events.
//!
//! Every stage and attempt boundary, and every terminal state, is
//! emitted as a [`BuildEvent`] through an [`EventBus`] with pluggable
//! sinks. Events carry correlation ids and short messages only — never
//! credentials, file content, or raw provider bodies; the [`redact`]
//! scrubber runs on every outbound message.

pub mod bus;
pub mod emitter;
pub mod event;
pub mod redaction;
pub mod sink;

pub use bus::EventBus;
pub use emitter::{EmitterError, EventEmitter};
pub use event::{BuildEvent, BuildEventKind};
pub use redaction::redact;
pub use sink::{ChannelSink, EventSink, MemorySink, SinkError, StdOutSink};
