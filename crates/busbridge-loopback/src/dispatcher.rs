//! The bus-owned thread all callbacks are delivered on.

use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct Dispatcher {
    jobs: Option<mpsc::UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl Dispatcher {
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let worker = thread::Builder::new()
            .name(format!("{name}-dispatch"))
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    job();
                }
                tracing::debug!("Dispatcher stopped");
            })?;
        Ok(Self {
            jobs: Some(tx),
            worker_id: worker.thread().id(),
            worker: Some(worker),
        })
    }

    /// Queue a job. Returns false once the dispatcher is shutting down.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.jobs
            .as_ref()
            .is_some_and(|tx| tx.send(Box::new(job)).is_ok())
    }

    /// Run `f` on the dispatcher thread and wait for its result.
    ///
    /// Runs inline when already on the dispatcher thread.
    pub fn call<R: Send + 'static>(&self, f: impl FnOnce() -> R + Send + 'static) -> Option<R> {
        if thread::current().id() == self.worker_id {
            return Some(f());
        }
        let (tx, rx) = oneshot::channel();
        if !self.submit(move || {
            let _ = tx.send(f());
        }) {
            return None;
        }
        rx.blocking_recv().ok()
    }

    /// Wait until everything queued so far has been delivered.
    pub fn flush(&self) {
        let _ = self.call(|| ());
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}
