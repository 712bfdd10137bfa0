use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ag_core::{Result, SyncError};
use tokio::sync::watch;

/// Surface-private replica with a disposal guard and a change signal.
///
/// - `read(f)` works at any time, including after disposal (last render).
/// - `update(f)` mutates and bumps the version; fails with
///   [`SyncError::Disposed`] once the owning surface has unmounted.
/// - `changes()` yields a watch receiver renderers await on.
///
/// Critical sections are synchronous; the lock is never held across an
/// `.await`.
pub struct StateCell<S> {
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    state: Mutex<S>,
    disposed: AtomicBool,
    version: watch::Sender<u64>,
}

impl<S> StateCell<S> {
    pub fn new(state: S) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                disposed: AtomicBool::new(false),
                version,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, S> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.lock())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> Result<R> {
        if self.is_disposed() {
            return Err(SyncError::Disposed);
        }
        let out = {
            let mut state = self.lock();
            f(&mut state)
        };
        self.inner.version.send_modify(|v| *v += 1);
        Ok(out)
    }

    pub fn snapshot(&self) -> S
    where
        S: Clone,
    {
        self.lock().clone()
    }

    pub fn version(&self) -> u64 {
        *self.inner.version.borrow()
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }

    /// Irreversible. Later updates fail; in-flight work must discard results.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl<S> Clone for StateCell<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_bumps_version() {
        let cell = StateCell::new(1u32);
        let mut rx = cell.changes();
        cell.update(|v| *v += 1).unwrap();
        assert_eq!(cell.read(|v| *v), 2);
        assert_eq!(cell.version(), 1);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn disposed_cell_rejects_updates_but_stays_readable() {
        let cell = StateCell::new(vec![1, 2]);
        cell.dispose();
        assert_eq!(cell.update(|v| v.push(3)), Err(SyncError::Disposed));
        assert_eq!(cell.snapshot(), vec![1, 2]);
    }
}
