//! Fixed-size worker pool executing tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{CoreError, CoreResult};
use crate::runtime::engine::Engine;
use crate::runtime::task::Task;

enum Job {
    Run(Arc<Task>),
    Stop,
}

/// Workers pulling tasks from a shared channel.
pub(crate) struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl WorkerPool {
    /// Spawns `threads` workers (at least one) running tasks on `engine`.
    pub(crate) fn start(engine: Weak<Engine>, threads: usize) -> CoreResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let threads = threads.max(1);
        let mut workers = Vec::with_capacity(threads);
        for n in 0..threads {
            let receiver = Arc::clone(&receiver);
            let engine = Weak::clone(&engine);
            let handle = thread::Builder::new()
                .name(format!("tuplespace-worker-{n}"))
                .spawn(move || work(&receiver, &engine))?;
            workers.push(handle);
        }
        debug!(threads, "worker pool started");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            closed: AtomicBool::new(false),
        })
    }

    /// Queues a task. Fails the task if the pool is stopped.
    pub(crate) fn schedule(&self, task: Arc<Task>) {
        let rejected = match self.sender.lock().as_ref() {
            Some(sender) => match sender.send(Job::Run(task)) {
                Err(mpsc::SendError(Job::Run(task))) => Some(task),
                _ => None,
            },
            None => Some(task),
        };
        if let Some(task) = rejected {
            task.complete(Err(CoreError::invalid_operation("space is closed")));
        }
    }

    /// Returns true once `stop` was called.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Lets queued tasks drain, then joins every worker.
    pub(crate) fn stop(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        if let Some(sender) = self.sender.lock().take() {
            for _ in 0..workers.len() {
                let _ = sender.send(Job::Stop);
            }
        }
        let current = thread::current().id();
        for worker in workers {
            // A worker dropping the last space handle stops the pool itself.
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
        debug!("worker pool stopped");
    }
}

fn work(receiver: &Mutex<Receiver<Job>>, engine: &Weak<Engine>) {
    loop {
        let job = receiver.lock().recv();
        match job {
            Ok(Job::Run(task)) => match engine.upgrade() {
                Some(engine) => engine.run(task),
                None => {
                    task.complete(Err(CoreError::invalid_operation("space is closed")));
                }
            },
            Ok(Job::Stop) | Err(_) => break,
        }
    }
    trace!("worker exiting");
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
