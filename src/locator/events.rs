use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

use crate::model::PythonEnvKind;

const CHANNEL_CAPACITY: usize = 64;

/// "Something may have changed" notification.
///
/// `kind` and `search_location` are advisory hints about where the change
/// happened; consumers must not rely on them being set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PythonEnvsChangedEvent {
    pub kind: Option<PythonEnvKind>,
    pub search_location: Option<PathBuf>,
}

impl PythonEnvsChangedEvent {
    pub fn for_kind(kind: PythonEnvKind) -> Self {
        Self {
            kind: Some(kind),
            search_location: None,
        }
    }

    pub fn with_search_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.search_location = Some(location.into());
        self
    }
}

/// Broadcast sender that can be closed.
///
/// Clones share one channel. After [`close`](Self::close), existing
/// receivers see the channel end and new subscribers get an already
/// closed receiver.
#[derive(Debug, Clone)]
pub struct ChangeEmitter {
    tx: Arc<Mutex<Option<broadcast::Sender<PythonEnvsChangedEvent>>>>,
}

impl ChangeEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PythonEnvsChangedEvent> {
        match self.tx.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Sends an event; returns how many subscribers received it.
    pub fn fire(&self, event: PythonEnvsChangedEvent) -> usize {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|tx| tx.send(event).ok())
            .unwrap_or(0)
    }

    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl Default for ChangeEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn test_fire_reaches_subscribers() {
        let emitter = ChangeEmitter::new();
        let mut rx = emitter.subscribe();
        assert_eq!(emitter.fire(PythonEnvsChangedEvent::for_kind(PythonEnvKind::Pyenv)), 1);
        assert_eq!(rx.recv().await.unwrap().kind, Some(PythonEnvKind::Pyenv));
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let emitter = ChangeEmitter::new();
        let mut rx = emitter.subscribe();
        emitter.clone().close();

        assert!(emitter.is_closed());
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
        assert!(matches!(emitter.subscribe().recv().await, Err(RecvError::Closed)));
        assert_eq!(emitter.fire(PythonEnvsChangedEvent::default()), 0);
    }
}
