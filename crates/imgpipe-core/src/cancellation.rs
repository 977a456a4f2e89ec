//! One-shot cancellation token with callback registration.
//!
//! Mirrors `tokio_util::sync::CancellationToken`'s single-fire semantics but
//! additionally supports ordered callback registration, which the
//! orchestrator relies on to chain fetch-handle cancellation, queue-slot
//! release and processing-op cancellation off of one signal.

use std::sync::Arc;

use parking_lot::Mutex;

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    state: Mutex<State>,
}

struct State {
    cancelled: bool,
    callbacks: Vec<Callback>,
}

/// Produces [`CancellationToken`]s and fires the shared cancellation signal.
///
/// `cancel()` is idempotent: the second and subsequent calls are no-ops.
#[derive(Clone)]
pub struct CancellationSource {
    inner: Arc<Inner>,
}

impl CancellationSource {
    /// Create a new, not-yet-cancelled source.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    cancelled: false,
                    callbacks: Vec::new(),
                }),
            }),
        }
    }

    /// Obtain a token observing this source's cancellation signal.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Fire cancellation. Idempotent: callbacks run at most once each, in
    /// the order they were registered, and only on the first call.
    pub fn cancel(&self) {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback();
        }
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// A read-only handle observing one [`CancellationSource`]'s signal.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Whether `cancel()` has already fired on the originating source.
    pub fn is_cancelling(&self) -> bool {
        self.inner.state.lock().cancelled
    }

    /// Register a callback to run when cancellation fires.
    ///
    /// If the token is already cancelled, `callback` runs inline, on the
    /// caller's context, before this call returns.
    pub fn register(&self, callback: impl FnOnce() + Send + 'static) {
        let mut state = self.inner.state.lock();
        if state.cancelled {
            drop(state);
            callback();
            return;
        }
        state.callbacks.push(Box::new(callback));
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("is_cancelling", &self.is_cancelling())
            .finish()
    }
}
