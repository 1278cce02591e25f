use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

/// Identity of one subscription; returned by
/// [`ObserverRegistry::subscribe`] and required to pause or unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

struct Entry<E> {
    id: u64,
    paused: bool,
    tx: Sender<E>,
}

struct RegistryInner<E> {
    next_id: u64,
    entries: SmallVec<[Entry<E>; 4]>,
}

/// Explicit observer registry on the producer side.
///
/// Subscribers register and deregister themselves; the registry holds only
/// channel endpoints, never the observers, so there are no back-reference
/// cycles to manage. A paused observer stays registered but receives
/// nothing. Delivery is non-blocking: if an observer's channel is full the
/// event is dropped for that observer, and disconnected observers are
/// pruned on the next post.
pub struct ObserverRegistry<E> {
    inner: Arc<Mutex<RegistryInner<E>>>,
}

impl<E> Clone for ObserverRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for ObserverRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ObserverRegistry<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 0,
                entries: SmallVec::new(),
            })),
        }
    }

    /// Register an observer; events arrive on the returned receiver.
    pub fn subscribe(&self, capacity: usize) -> (ObserverHandle, Receiver<E>) {
        let (tx, rx) = bounded(capacity.max(1));
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push(Entry {
            id,
            paused: false,
            tx,
        });
        (ObserverHandle(id), rx)
    }

    pub fn unsubscribe(&self, handle: ObserverHandle) {
        self.inner.lock().entries.retain(|e| e.id != handle.0);
    }

    /// Pause or resume delivery for one observer. Unknown handles are
    /// ignored (the observer may have unsubscribed concurrently).
    pub fn set_paused(&self, handle: ObserverHandle, paused: bool) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.iter_mut().find(|e| e.id == handle.0) {
            entry.paused = paused;
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

impl<E: Clone> ObserverRegistry<E> {
    /// Deliver an event to every active observer.
    pub fn post(&self, event: E) {
        let mut inner = self.inner.lock();
        inner.entries.retain(|entry| {
            if entry.paused {
                return true;
            }
            match entry.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(crossbeam_channel::TrySendError::Full(_)) => {
                    tracing::debug!(observer = entry.id, "observer channel full, event dropped");
                    true
                }
                Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
            }
        });
    }
}
