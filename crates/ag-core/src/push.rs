//! Disposable handle over a push source.
//!
//! The real-time transport is opaque to the engine: a backend hands out a
//! [`PushSubscription`] and the engine only ever calls `recv`. Dropping the
//! handle unsubscribes.

use std::fmt;
use tokio::sync::mpsc;

type Unsubscribe = Box<dyn FnOnce() + Send>;

pub struct PushSubscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    unsubscribe: Option<Unsubscribe>,
}

impl<T> PushSubscription<T> {
    /// Wrap a receiver. `unsubscribe` runs exactly once, when the handle is
    /// dropped or [`PushSubscription::unsubscribe`] is called.
    pub fn new<F>(rx: mpsc::UnboundedReceiver<T>, unsubscribe: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            rx,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// A subscription fed by the returned sender, with no teardown hook.
    pub fn channel() -> (mpsc::UnboundedSender<T>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                rx,
                unsubscribe: None,
            },
        )
    }

    /// Next event. `None` once the source has gone away.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next already-buffered event, without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {
        drop(self)
    }
}

impl<T> Drop for PushSubscription<T> {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl<T> fmt::Debug for PushSubscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushSubscription")
            .field("has_teardown", &self.unsubscribe.is_some())
            .finish()
    }
}
