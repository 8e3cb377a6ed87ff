//! One-job-at-a-time access to the backend

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::ShaderBackend;

/// Serializes every job against the single device
///
/// [`JobGate::run`] holds the lock for the whole upload → build → submit →
/// wait sequence. Clones share the same backend.
#[derive(Clone)]
pub struct JobGate {
    backend: Arc<Mutex<ShaderBackend>>,
}

impl JobGate {
    /// Wrap a backend
    pub fn new(backend: ShaderBackend) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
        }
    }

    /// Run `job` with exclusive access to the backend
    ///
    /// A lock poisoned by a panicking job is recovered: the worst leftover is
    /// a stale pipeline, which the next upload replaces.
    pub fn run<R>(&self, job: impl FnOnce(&mut ShaderBackend) -> R) -> R {
        let mut backend = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
        job(&mut backend)
    }

    /// Run `job` on its own worker thread
    ///
    /// The caller's thread is free while the job waits on the GPU; jobs still
    /// reach the device one at a time.
    pub fn spawn<R, F>(&self, job: F) -> JoinHandle<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut ShaderBackend) -> R + Send + 'static,
    {
        let gate = self.clone();
        thread::spawn(move || gate.run(job))
    }
}
