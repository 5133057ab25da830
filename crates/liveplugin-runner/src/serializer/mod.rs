//! Per-plugin serialization of runs.
//!
//! Every plugin id owns a lane: a named worker thread fed by a FIFO channel.
//! Tasks for the same id run one after another in submission order while
//! tasks for different ids run concurrently. The caller never executes the
//! task body; it receives a [`Ticket`] it may wait on or drop.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, warn};

use crate::disposable::panic_message;

const SERIALIZER_TARGET: &str = "liveplugin_runner::serializer";

type LaneJob = Box<dyn FnOnce() + Send>;

/// Errors raised while scheduling or completing a serialized task.
#[derive(Debug, Clone, Error)]
pub enum SerializerError {
    /// The serializer no longer accepts work.
    #[error("run serializer is shut down")]
    ShutDown,
    /// The lane thread for a plugin could not be started.
    #[error("failed to start lane for plugin '{plugin_id}': {source}")]
    Spawn {
        /// Plugin the lane was meant for.
        plugin_id: String,
        /// Underlying spawn failure.
        #[source]
        source: Arc<io::Error>,
    },
    /// The task panicked. The lane keeps running.
    #[error("task for plugin '{plugin_id}' panicked: {message}")]
    Panicked {
        /// Plugin whose task panicked.
        plugin_id: String,
        /// Panic payload rendered as text.
        message: String,
    },
    /// The lane went away before reporting a result.
    #[error("lane for plugin '{plugin_id}' stopped before the task completed")]
    Abandoned {
        /// Plugin whose lane stopped.
        plugin_id: String,
    },
}

/// Handle to the eventual result of a submitted task.
#[derive(Debug)]
pub struct Ticket<T> {
    plugin_id: String,
    result: Receiver<Result<T, SerializerError>>,
}

impl<T> Ticket<T> {
    /// Plugin id the task was submitted for.
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        self.plugin_id.as_str()
    }

    /// Blocks until the task has run.
    ///
    /// # Errors
    ///
    /// Returns [`SerializerError::Panicked`] when the task panicked and
    /// [`SerializerError::Abandoned`] when its lane stopped first.
    pub fn wait(self) -> Result<T, SerializerError> {
        match self.result.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(SerializerError::Abandoned {
                plugin_id: self.plugin_id,
            }),
        }
    }

    /// Returns the result if the task has already run.
    #[must_use]
    pub fn try_result(&self) -> Option<Result<T, SerializerError>> {
        self.result.try_recv().ok()
    }
}

struct Lane {
    jobs: Sender<LaneJob>,
    worker: JoinHandle<()>,
}

impl Lane {
    fn spawn(plugin_id: &str) -> Result<Self, SerializerError> {
        let (jobs, queue) = mpsc::channel::<LaneJob>();
        let lane_id = plugin_id.to_owned();
        let worker = thread::Builder::new()
            .name(format!("liveplugin-lane-{plugin_id}"))
            .spawn(move || {
                debug!(target: SERIALIZER_TARGET, plugin = lane_id.as_str(), "lane started");
                for job in queue {
                    job();
                }
                debug!(target: SERIALIZER_TARGET, plugin = lane_id.as_str(), "lane drained");
            })
            .map_err(|error| SerializerError::Spawn {
                plugin_id: plugin_id.to_owned(),
                source: Arc::new(error),
            })?;
        Ok(Self { jobs, worker })
    }
}

/// Serializes tasks per plugin id.
pub struct RunSerializer {
    lanes: Mutex<Option<HashMap<String, Lane>>>,
}

impl std::fmt::Debug for RunSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunSerializer")
            .field("lanes", &self.lane_count())
            .finish()
    }
}

impl Default for RunSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSerializer {
    /// Creates a serializer with no lanes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new(Some(HashMap::new())),
        }
    }

    /// Queues `task` on the lane of `plugin_id`, creating the lane on first
    /// use.
    ///
    /// # Errors
    ///
    /// Returns [`SerializerError::ShutDown`] after [`RunSerializer::shutdown`]
    /// and [`SerializerError::Spawn`] when a new lane cannot be started.
    pub fn submit<T, F>(&self, plugin_id: &str, task: F) -> Result<Ticket<T>, SerializerError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (reply, result) = mpsc::sync_channel(1);
        let job_id = plugin_id.to_owned();
        let job: LaneJob = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(task)).map_err(|payload| {
                let message = panic_message(payload.as_ref());
                warn!(
                    target: SERIALIZER_TARGET,
                    plugin = job_id.as_str(),
                    panic = message.as_str(),
                    "serialized task panicked"
                );
                SerializerError::Panicked {
                    plugin_id: job_id.clone(),
                    message,
                }
            });
            if reply.send(outcome).is_err() {
                debug!(
                    target: SERIALIZER_TARGET,
                    plugin = job_id.as_str(),
                    "ticket dropped before completion"
                );
            }
        });

        let mut guard = self.lock();
        let lanes = guard.as_mut().ok_or(SerializerError::ShutDown)?;
        let lane = match lanes.entry(plugin_id.to_owned()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!(target: SERIALIZER_TARGET, plugin = plugin_id, "creating lane");
                entry.insert(Lane::spawn(plugin_id)?)
            }
        };
        lane.jobs
            .send(job)
            .map_err(|_| SerializerError::Abandoned {
                plugin_id: plugin_id.to_owned(),
            })?;

        Ok(Ticket {
            plugin_id: plugin_id.to_owned(),
            result,
        })
    }

    /// Number of lanes created so far.
    #[must_use]
    pub fn lane_count(&self) -> usize {
        self.lock().as_ref().map_or(0, HashMap::len)
    }

    /// Stops accepting work, lets every lane drain its queue and joins the
    /// lane threads.
    pub fn shutdown(&self) {
        let Some(lanes) = self.lock().take() else {
            return;
        };
        let current = thread::current().id();
        for (plugin_id, lane) in lanes {
            drop(lane.jobs);
            if lane.worker.thread().id() == current {
                continue;
            }
            if lane.worker.join().is_err() {
                warn!(
                    target: SERIALIZER_TARGET,
                    plugin = plugin_id.as_str(),
                    "lane thread terminated abnormally"
                );
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<HashMap<String, Lane>>> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RunSerializer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests;
