//! On-demand worker pool for blocking calls
//!
//! Workers are spawned lazily up to a fixed cap: a task wakes an idle
//! worker if one exists, otherwise a new thread is started. Tasks run in
//! FIFO order. The pool only guarantees dequeue-and-invoke; task results
//! and errors are the task's own business.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct ThreadPool {
    tx: Option<Sender<Task>>,
    rx: Receiver<Task>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    idle: Arc<AtomicUsize>,
    max_threads: usize,
}

impl ThreadPool {
    /// Empty pool; no threads are started until the first task arrives.
    pub fn new(max_threads: usize) -> Self {
        let (tx, rx) = channel::unbounded();
        ThreadPool {
            tx: Some(tx),
            rx,
            workers: Mutex::new(Vec::new()),
            idle: Arc::new(AtomicUsize::new(0)),
            max_threads: max_threads.max(1),
        }
    }

    /// Queue a task; wakes an idle worker or spawns one while under the
    /// thread cap.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(tx) = self.tx.as_ref() else {
            log::error!("thread pool: task submitted after shutdown, dropped");
            return;
        };
        // rx lives in self, so the channel cannot be disconnected here.
        let _ = tx.send(Box::new(task));

        if self.idle.load(Ordering::SeqCst) == 0 {
            self.spawn_worker();
        }
    }

    fn spawn_worker(&self) {
        let mut workers = self.workers.lock();
        if workers.len() >= self.max_threads {
            return;
        }
        let rx = self.rx.clone();
        let idle = self.idle.clone();
        let handle = thread::Builder::new()
            .name(format!("vtx-worker-{}", workers.len()))
            .spawn(move || worker_loop(rx, idle))
            .expect("Failed to spawn pool worker");
        workers.push(handle);
    }

    /// Close the queue and join all workers. Tasks already queued still
    /// run before the workers exit.
    pub fn shutdown(&mut self) {
        self.tx.take();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            handle.join().ok();
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: Receiver<Task>, idle: Arc<AtomicUsize>) {
    loop {
        idle.fetch_add(1, Ordering::SeqCst);
        let task = rx.recv();
        idle.fetch_sub(1, Ordering::SeqCst);

        match task {
            Ok(task) => {
                // A panicking task must not take the worker down with it.
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    log::error!("thread pool: task panicked");
                }
            }
            // Channel closed: quit requested.
            Err(_) => break,
        }
    }
    log::trace!("thread pool: worker exiting");
}
