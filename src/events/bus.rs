//! The event bus: one channel in, many sinks out.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use super::emitter::{ChannelEmitter, EventEmitter};
use super::event::BuildEvent;
use super::sink::{EventSink, StdOutSink};

/// Central broadcasting point for build events.
///
/// Components hold an emitter handle obtained from
/// [`get_emitter`](EventBus::get_emitter); a background listener task
/// drains the channel and fans events out to every configured sink.
pub struct EventBus {
    tx: flume::Sender<BuildEvent>,
    rx: flume::Receiver<BuildEvent>,
    sinks: Arc<Mutex<Vec<Box<dyn EventSink>>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sinks(vec![Box::new(StdOutSink)])
    }
}

impl EventBus {
    #[must_use]
    pub fn with_sink<T: EventSink + 'static>(sink: T) -> Self {
        Self::with_sinks(vec![Box::new(sink)])
    }

    #[must_use]
    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            sinks: Arc::new(Mutex::new(sinks)),
            listener: Mutex::new(None),
        }
    }

    /// Handle for components to publish events through.
    #[must_use]
    pub fn get_emitter(&self) -> Arc<dyn EventEmitter> {
        Arc::new(ChannelEmitter {
            tx: self.tx.clone(),
        })
    }

    /// Spawn the listener task that drains events into the sinks.
    /// Idempotent; the second call is a no-op.
    pub fn listen_for_events(&self) {
        let mut guard = self.listener.lock().expect("listener lock poisoned");
        if guard.is_some() {
            return;
        }
        let rx = self.rx.clone();
        let sinks = Arc::clone(&self.sinks);
        *guard = Some(tokio::spawn(async move {
            while let Ok(event) = rx.recv_async().await {
                let mut sinks = match sinks.lock() {
                    Ok(sinks) => sinks,
                    Err(_) => break,
                };
                for sink in sinks.iter_mut() {
                    if let Err(err) = sink.handle(&event) {
                        tracing::warn!(error = %err, "event sink failed");
                    }
                }
            }
        }));
    }

    /// Stop the listener after the queue drains.
    pub async fn shutdown(&self) {
        let handle = self
            .listener
            .lock()
            .expect("listener lock poisoned")
            .take();
        if let Some(handle) = handle {
            while !self.rx.is_empty() {
                tokio::task::yield_now().await;
            }
            // Let the listener finish delivering the event it popped last.
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.listener.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}
