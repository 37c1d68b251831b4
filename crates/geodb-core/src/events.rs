use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::error::{Stage, UpdateError};

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// Informational, nothing to act on.
    Notice(String),
    /// A new version was installed.
    UpdateSucceeded(String),
    /// A check cycle failed at `stage`.
    Error {
        stage: Stage,
        error: Arc<UpdateError>,
    },
}

/// Fan-out of lifecycle events to every live subscriber.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<LifecycleEvent>>>,
}

impl EventBus {
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<LifecycleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub(crate) fn emit(&self, event: &LifecycleEvent) {
        self.lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<LifecycleEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
