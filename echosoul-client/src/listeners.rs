use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error};

/// An event with a kind that listeners subscribe to
pub trait Event: Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Handle returned by [`Listeners::on`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E: Event> {
    next_id: u64,
    by_kind: HashMap<E::Kind, Vec<(ListenerId, Callback<E>)>>,
}

/// Multi-subscriber callback registry.
///
/// Callbacks run in registration order. A callback that panics is logged and
/// skipped; the rest still run.
pub struct Listeners<E: Event> {
    registry: Mutex<Registry<E>>,
}

impl<E: Event> Listeners<E> {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                next_id: 0,
                by_kind: HashMap::new(),
            }),
        }
    }

    /// Subscribes `callback` to events of `kind`
    pub fn on<F>(&self, kind: E::Kind, callback: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry
            .by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Removes one subscription. Returns false if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut registry = self.lock();
        for callbacks in registry.by_kind.values_mut() {
            if let Some(pos) = callbacks.iter().position(|(cb_id, _)| *cb_id == id) {
                callbacks.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.lock().by_kind.get(&kind).map_or(0, Vec::len)
    }

    /// Calls every callback subscribed to the event's kind.
    ///
    /// Callbacks run without the registry lock held, so they may subscribe,
    /// unsubscribe or emit themselves.
    pub fn emit(&self, event: &E) {
        let kind = event.kind();
        let callbacks: Vec<Callback<E>> = self
            .lock()
            .by_kind
            .get(&kind)
            .map(|callbacks| callbacks.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        if callbacks.is_empty() {
            debug!("No listener for {:?}", kind);
            return;
        }

        for callback in callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
                error!("Listener for {:?} panicked: {}", kind, panic_message(&*panic));
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry<E>> {
        // Callbacks never run under this lock, a poisoned registry is still consistent
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<E: Event> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}
