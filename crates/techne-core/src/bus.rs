//! In-process publish/subscribe bus shared by the core and every plugin.
//!
//! Dispatch is synchronous and reentrant:
//!
//! - [`emit`](EventBus::emit) snapshots the listener list for the event and
//!   releases the lock before invoking anything, so a listener may call
//!   `on`, `off` or `emit` on the same bus without deadlocking.
//! - A listener registered while an emit of the same event is running is
//!   **not** invoked by that emit, only by later ones.
//! - A listener that returns an error or panics is logged and skipped; the
//!   remaining listeners still run and `emit` never propagates the failure.
//! - Nested emits are capped at [`EventBus::max_depth`].  Nesting is counted
//!   per thread, so concurrent emits from other threads never count against
//!   it.  Guarding against mutually recursive listeners beyond that is the
//!   plugin author's job.
//!
//! Event names are exact strings; there is no wildcard matching.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{error, trace};

use crate::error::BoxError;

/// Default cap on nested `emit` calls.
pub const DEFAULT_MAX_EMIT_DEPTH: usize = 64;

/// A bus listener.  Shared so the same listener can later be passed to
/// [`EventBus::off`].
pub type Listener = Arc<dyn Fn(&Value) -> Result<(), BoxError> + Send + Sync>;

type ListenerId = u64;

struct BusInner {
    listeners: Mutex<HashMap<String, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
    max_depth: usize,
}

/// Cheaply cloneable handle to a shared event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.inner.listeners.lock();
        f.debug_struct("EventBus")
            .field("events", &listeners.len())
            .field("max_depth", &self.inner.max_depth)
            .finish()
    }
}

impl EventBus {
    /// Creates a bus with the default recursion cap.
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_EMIT_DEPTH)
    }

    /// Creates a bus that drops emits nested deeper than `max_depth`.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                max_depth: max_depth.max(1),
            }),
        }
    }

    /// Maximum nesting of `emit` calls.
    pub fn max_depth(&self) -> usize {
        self.inner.max_depth
    }

    /// Registers `listener` for `event`.
    ///
    /// Registration order is invocation order.  The same listener may be
    /// registered more than once and then runs once per registration.
    pub fn on<F>(&self, event: &str, listener: F) -> Subscription
    where
        F: Fn(&Value) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_shared(event, Arc::new(listener))
    }

    /// Registers an already shared listener, keeping the `Arc` usable with
    /// [`off`](Self::off).
    pub fn on_shared(&self, event: &str, listener: Listener) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        trace!(event = %event, listener = id, "Listener registered");
        Subscription {
            bus: Arc::downgrade(&self.inner),
            event: event.to_string(),
            id,
        }
    }

    /// Removes every registration of `listener` for `event`.
    ///
    /// Returns the number of registrations removed; removing a listener
    /// that is not present is a no-op returning `0`.
    pub fn off(&self, event: &str, listener: &Listener) -> usize {
        let mut map = self.inner.listeners.lock();
        let Some(list) = map.get_mut(event) else {
            return 0;
        };
        let before = list.len();
        list.retain(|(_, l)| !Arc::ptr_eq(l, listener));
        let removed = before - list.len();
        if list.is_empty() {
            map.remove(event);
        }
        removed
    }

    /// Number of listeners currently registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner
            .listeners
            .lock()
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Invokes every listener registered for `event`, in registration order.
    ///
    /// Returns how many listeners completed without error.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        let Some(_depth) = DepthGuard::enter(&self.inner) else {
            error!(
                event = %event,
                max_depth = self.inner.max_depth,
                "Event emission nested too deeply, dropping emit"
            );
            return 0;
        };

        let snapshot: Vec<(ListenerId, Listener)> = match self.inner.listeners.lock().get(event) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, listener) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(payload))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    error!(event = %event, listener = id, error = %e, "Event listener failed");
                }
                Err(panic) => {
                    error!(
                        event = %event,
                        listener = id,
                        error = %panic_message(panic.as_ref()),
                        "Event listener panicked"
                    );
                }
            }
        }
        delivered
    }
}

thread_local! {
    /// Emit nesting on this thread, keyed by bus address.
    static EMIT_DEPTH: RefCell<HashMap<usize, usize>> = RefCell::new(HashMap::new());
}

/// Tracks emit nesting for the lifetime of one `emit` call.
struct DepthGuard {
    bus: usize,
}

impl DepthGuard {
    fn enter(inner: &BusInner) -> Option<Self> {
        let bus = inner as *const BusInner as usize;
        EMIT_DEPTH.with(|depths| {
            let mut depths = depths.borrow_mut();
            let depth = depths.entry(bus).or_insert(0);
            if *depth >= inner.max_depth {
                return None;
            }
            *depth += 1;
            Some(Self { bus })
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        EMIT_DEPTH.with(|depths| {
            let mut depths = depths.borrow_mut();
            if let Some(depth) = depths.get_mut(&self.bus) {
                *depth -= 1;
                if *depth == 0 {
                    depths.remove(&self.bus);
                }
            }
        });
    }
}

/// Renders a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Handle returned by [`EventBus::on`].
///
/// Dropping the handle keeps the listener registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<BusInner>,
    event: String,
    id: ListenerId,
}

impl Subscription {
    /// Event this subscription listens to.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Removes this registration.  Returns `false` when it was already gone.
    pub fn unsubscribe(&self) -> bool {
        let Some(inner) = self.bus.upgrade() else {
            return false;
        };
        let mut map = inner.listeners.lock();
        let Some(list) = map.get_mut(&self.event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != self.id);
        let removed = list.len() != before;
        if list.is_empty() {
            map.remove(&self.event);
        }
        removed
    }
}
