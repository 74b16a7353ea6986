//! Callback runners
//!
//! Transports deliver packets on their own threads. A [`Marshaller`] moves
//! handler execution onto the thread the application wants it on.

use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Unit of work handed to a marshaller
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs on a chosen thread
pub trait Marshaller: Send + Sync {
    fn invoke(&self, job: Job);
}

impl<F> Marshaller for F
where
    F: Fn(Job) + Send + Sync,
{
    fn invoke(&self, job: Job) {
        self(job)
    }
}

/// Runs every job, in order, on one dedicated thread
pub struct WorkerMarshaller {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl WorkerMarshaller {
    pub fn new(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        let worker = thread::Builder::new().name(name.clone()).spawn(move || {
            while let Some(job) = receiver.blocking_recv() {
                job();
            }
            tracing::debug!("Marshaller thread exiting");
        })?;
        let worker_id = worker.thread().id();

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            worker_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stop accepting jobs, let queued ones finish and join the worker.
    /// Called from the worker itself it only stops accepting jobs.
    pub fn close(&self) {
        self.sender.lock().take();
        if thread::current().id() == self.worker_id {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("Marshaller thread {} panicked", self.name);
            }
        }
    }
}

impl Marshaller for WorkerMarshaller {
    fn invoke(&self, job: Job) {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => {
                if sender.send(job).is_err() {
                    tracing::warn!("Marshaller {} stopped; job dropped", self.name);
                }
            }
            None => tracing::warn!("Marshaller {} is closed; job dropped", self.name),
        }
    }
}

impl Drop for WorkerMarshaller {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_jobs_run_in_order_on_worker() {
        let marshaller = WorkerMarshaller::new("test-worker").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = seen.clone();
            marshaller.invoke(Box::new(move || {
                let name = thread::current().name().map(str::to_string);
                seen.lock().push((i, name));
            }));
        }
        marshaller.close();

        let seen = seen.lock();
        assert_eq!(seen.len(), 5);
        for (i, (n, name)) in seen.iter().enumerate() {
            assert_eq!(*n, i);
            assert_eq!(name.as_deref(), Some("test-worker"));
        }
        assert!(marshaller.is_closed());
    }

    #[test]
    fn test_closed_marshaller_drops_jobs() {
        let marshaller = WorkerMarshaller::new("closed").unwrap();
        marshaller.close();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        marshaller.invoke(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_closure_marshaller() {
        let ran = Arc::new(AtomicUsize::new(0));
        let inline = |job: Job| job();
        let counter = ran.clone();
        inline.invoke(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
