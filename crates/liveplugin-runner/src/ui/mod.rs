//! Hand-off of work to the host's UI thread.
//!
//! Scripts run on serializer lanes, but anything that talks to the user has
//! to happen on the single UI thread. [`UiDispatcher`] posts actions to a
//! [`UiLoop`] bound to that thread and blocks until they complete. A call
//! made from the UI thread itself runs inline.

use std::io;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::disposable::panic_message;

const UI_TARGET: &str = "liveplugin_runner::ui";

/// Work item executed on the UI thread.
pub type UiAction = Box<dyn FnOnce() + Send>;

/// Errors raised by a UI hand-off.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UiError {
    /// The UI loop is gone and can no longer accept work.
    #[error("UI loop has stopped")]
    Closed,
    /// The action panicked on the UI thread.
    #[error("UI action panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },
}

/// Runs actions on the host's UI thread.
pub trait UiThread: Send + Sync {
    /// Runs `action` on the UI thread and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns [`UiError`] when the loop has stopped or the action panicked.
    fn invoke_and_wait(&self, action: UiAction) -> Result<(), UiError>;
}

impl<T> UiThread for Arc<T>
where
    T: UiThread + ?Sized,
{
    fn invoke_and_wait(&self, action: UiAction) -> Result<(), UiError> {
        (**self).invoke_and_wait(action)
    }
}

/// Runs every action on the calling thread. Suitable for headless hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineUi;

impl UiThread for InlineUi {
    fn invoke_and_wait(&self, action: UiAction) -> Result<(), UiError> {
        run_guarded(action)
    }
}

struct Job {
    action: UiAction,
    done: SyncSender<Result<(), UiError>>,
}

/// Sending side of a UI loop.
#[derive(Debug, Clone)]
pub struct UiDispatcher {
    jobs: Sender<Job>,
    ui_thread: Arc<OnceLock<ThreadId>>,
}

impl UiDispatcher {
    /// Creates a dispatcher and a loop bound to the calling thread.
    #[must_use]
    pub fn channel() -> (Self, UiLoop) {
        let (jobs, receiver) = mpsc::channel();
        let ui_thread = Arc::new(OnceLock::new());
        let ui_loop = UiLoop::bind(receiver, &ui_thread);
        (Self { jobs, ui_thread }, ui_loop)
    }

    /// Starts a dedicated UI thread that services the returned dispatcher
    /// until every dispatcher clone is dropped.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised when the thread cannot be spawned.
    pub fn spawn_thread(name: &str) -> io::Result<(Self, JoinHandle<()>)> {
        let (jobs, receiver) = mpsc::channel();
        let ui_thread = Arc::new(OnceLock::new());
        let slot = Arc::clone(&ui_thread);
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || UiLoop::bind(receiver, &slot).run())?;
        Ok((Self { jobs, ui_thread }, handle))
    }

    fn on_ui_thread(&self) -> bool {
        self.ui_thread.get() == Some(&thread::current().id())
    }
}

impl UiThread for UiDispatcher {
    fn invoke_and_wait(&self, action: UiAction) -> Result<(), UiError> {
        if self.on_ui_thread() {
            return run_guarded(action);
        }
        let (done, outcome) = mpsc::sync_channel(1);
        self.jobs
            .send(Job { action, done })
            .map_err(|_| UiError::Closed)?;
        outcome.recv().map_err(|_| UiError::Closed)?
    }
}

/// Receiving side of a UI loop. Stays on the thread that created it.
#[derive(Debug)]
pub struct UiLoop {
    jobs: Receiver<Job>,
    _not_send: PhantomData<*const ()>,
}

impl UiLoop {
    fn bind(jobs: Receiver<Job>, slot: &OnceLock<ThreadId>) -> Self {
        let current = thread::current().id();
        if slot.set(current).is_err() {
            debug!(target: UI_TARGET, "UI thread already bound");
        }
        Self {
            jobs,
            _not_send: PhantomData,
        }
    }

    /// Runs every queued action without blocking. Returns how many ran.
    pub fn pump(&self) -> usize {
        let mut executed = 0;
        while let Ok(job) = self.jobs.try_recv() {
            execute(job);
            executed += 1;
        }
        executed
    }

    /// Services actions until `stop` returns `true` or every dispatcher is
    /// dropped. `stop` is polled at least once per `tick`.
    pub fn run_until(&self, stop: &impl Fn() -> bool, tick: Duration) {
        while !stop() {
            match self.jobs.recv_timeout(tick) {
                Ok(job) => execute(job),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Services actions until every dispatcher is dropped.
    pub fn run(&self) {
        while let Ok(job) = self.jobs.recv() {
            execute(job);
        }
    }
}

fn execute(job: Job) {
    let outcome = run_guarded(job.action);
    if job.done.send(outcome).is_err() {
        debug!(target: UI_TARGET, "caller stopped waiting for UI action");
    }
}

fn run_guarded(action: UiAction) -> Result<(), UiError> {
    panic::catch_unwind(AssertUnwindSafe(action)).map_err(|payload| UiError::Panicked {
        message: panic_message(payload.as_ref()),
    })
}

#[cfg(test)]
mod tests;
