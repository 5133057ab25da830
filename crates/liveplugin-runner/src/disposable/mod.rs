//! Disposable resource handles.
//!
//! A [`Disposable`] collects cleanup callbacks registered by a plugin script
//! and runs them exactly once when the handle is disposed, most recent
//! registration first. Callbacks registered after disposal run immediately.

use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ErrorSource;

const DISPOSABLE_TARGET: &str = "liveplugin_runner::disposable";

/// Result returned by a cleanup callback.
pub type CallbackResult = Result<(), Box<dyn StdError + Send + Sync>>;

type Callback = Box<dyn FnOnce() -> CallbackResult + Send>;

/// Failure raised while releasing a [`Disposable`].
#[derive(Debug, Clone, Error)]
#[error("disposing '{name}' failed: {}", describe(.failures))]
pub struct DisposeError {
    /// Name of the handle being disposed.
    pub name: String,
    /// Causes reported by the failing callbacks, in execution order.
    pub failures: Vec<ErrorSource>,
}

impl DisposeError {
    /// Returns the first recorded cause.
    #[must_use]
    pub fn first_failure(&self) -> Option<&ErrorSource> {
        self.failures.first()
    }
}

fn describe(failures: &[ErrorSource]) -> String {
    match failures {
        [] => "no callback failed".to_owned(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}

/// Error used when a callback panics.
#[derive(Debug, Error)]
#[error("dispose callback panicked: {message}")]
pub struct CallbackPanic {
    /// Panic payload rendered as text.
    pub message: String,
}

#[derive(Default)]
struct State {
    disposed: bool,
    callbacks: Vec<Callback>,
}

struct Inner {
    name: String,
    state: Mutex<State>,
}

/// Shared handle owning the cleanup callbacks of one binding.
///
/// Clones refer to the same handle.
#[derive(Clone)]
pub struct Disposable {
    inner: Arc<Inner>,
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Disposable")
            .field("name", &self.inner.name)
            .field("disposed", &state.disposed)
            .field("callbacks", &state.callbacks.len())
            .finish()
    }
}

impl Disposable {
    /// Creates a live handle.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Name given to the handle.
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.name.as_str()
    }

    /// Returns `true` once [`Disposable::dispose`] has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    /// Number of callbacks waiting for disposal.
    #[must_use]
    pub fn pending_callbacks(&self) -> usize {
        self.lock().callbacks.len()
    }

    /// Returns `true` when both values refer to the same handle.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Registers a cleanup callback.
    ///
    /// # Errors
    ///
    /// The handle is already disposed, so the callback ran immediately, and
    /// it failed.
    pub fn register<F>(&self, callback: F) -> Result<(), DisposeError>
    where
        F: FnOnce() -> CallbackResult + Send + 'static,
    {
        {
            let mut state = self.lock();
            if !state.disposed {
                state.callbacks.push(Box::new(callback));
                return Ok(());
            }
        }
        debug!(
            target: DISPOSABLE_TARGET,
            name = %self.inner.name,
            "callback registered after disposal; running it now"
        );
        match invoke(Box::new(callback)) {
            Ok(()) => Ok(()),
            Err(failure) => Err(DisposeError {
                name: self.inner.name.clone(),
                failures: vec![failure],
            }),
        }
    }

    /// Runs every registered callback, most recent first.
    ///
    /// Only the first call does any work; later calls return `Ok(())`. All
    /// callbacks run even when some fail.
    ///
    /// # Errors
    ///
    /// Returns a [`DisposeError`] listing each failing callback.
    pub fn dispose(&self) -> Result<(), DisposeError> {
        let callbacks = {
            let mut state = self.lock();
            if state.disposed {
                return Ok(());
            }
            state.disposed = true;
            std::mem::take(&mut state.callbacks)
        };

        debug!(
            target: DISPOSABLE_TARGET,
            name = %self.inner.name,
            callbacks = callbacks.len(),
            "disposing"
        );
        let failures: Vec<ErrorSource> = callbacks
            .into_iter()
            .rev()
            .filter_map(|callback| invoke(callback).err())
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DisposeError {
                name: self.inner.name.clone(),
                failures,
            })
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn invoke(callback: Callback) -> Result<(), ErrorSource> {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(Arc::from(error)),
        Err(payload) => {
            let cause: ErrorSource = Arc::new(CallbackPanic {
                message: panic_message(payload.as_ref()),
            });
            Err(cause)
        }
    }
}

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Top-level scope owning every live handle until host shutdown.
#[derive(Debug, Default)]
pub struct ResourceScope {
    children: Mutex<Vec<Disposable>>,
}

impl ResourceScope {
    /// Creates an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handle to the scope.
    pub fn register(&self, disposable: &Disposable) {
        self.lock().push(disposable.clone());
    }

    /// Removes a handle without disposing it.
    pub fn release(&self, disposable: &Disposable) {
        self.lock().retain(|child| !child.ptr_eq(disposable));
    }

    /// Number of handles currently owned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when no handle is owned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Disposes every owned handle, newest first, and empties the scope.
    ///
    /// Failures are logged and returned; they never stop the sweep.
    pub fn dispose_all(&self) -> Vec<DisposeError> {
        let children = std::mem::take(&mut *self.lock());
        children
            .iter()
            .rev()
            .filter_map(|child| child.dispose().err())
            .inspect(|error| {
                warn!(target: DISPOSABLE_TARGET, error = %error, "disposal failed at shutdown");
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Disposable>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
