//! Lifecycle event observers

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::RwLock;
use tracing::error;

use crate::error::ListenerError;
use crate::job::Job;

/// Observer callback for one event kind
pub type Listener<P, T> = Box<dyn Fn(&Job<P>, &T) -> Result<(), ListenerError> + Send + Sync>;

/// Ordered observers for a single event name.
pub(crate) struct Listeners<P, T> {
    event: &'static str,
    callbacks: RwLock<Vec<Listener<P, T>>>,
}

impl<P, T> Listeners<P, T> {
    pub(crate) fn new(event: &'static str) -> Self {
        Self {
            event,
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn add<F>(&self, listener: F)
    where
        F: Fn(&Job<P>, &T) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        // A poisoned lock only means an earlier registration panicked mid-push.
        let mut callbacks = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        callbacks.push(Box::new(listener));
    }

    /// Invoke every observer in registration order, isolating failures.
    pub(crate) fn emit(&self, job: &Job<P>, value: &T) {
        let callbacks = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
        for (index, callback) in callbacks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(job, value))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        queue = %job.queue,
                        job_id = %job.id,
                        listener = index,
                        error = %e,
                        "Error in {} listener",
                        self.event
                    );
                }
                Err(_) => {
                    error!(
                        queue = %job.queue,
                        job_id = %job.id,
                        listener = index,
                        "Panic in {} listener",
                        self.event
                    );
                }
            }
        }
    }
}
