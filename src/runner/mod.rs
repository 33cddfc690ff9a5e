//! Fixed-size worker pool for the patch phases. Tasks are plain closures;
//! the first panic stops scheduling, lets running tasks drain, and is then
//! re-raised on the calling thread. Each worker buffers its log lines per
//! task so output stays contiguous.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::unbounded;

use crate::util::logger;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// `max(1, hardware threads - 2)`: leave room for the main thread and the
/// OS without idling the pool on small machines.
pub fn default_worker_count() -> usize {
    num_cpus::get().saturating_sub(2).max(1)
}

pub struct TaskRunner {
    tasks: Vec<Task>,
    multithread: bool,
    workers: usize,
}

impl TaskRunner {
    pub fn new(multithread: bool) -> Self {
        Self {
            tasks: Vec::new(),
            multithread,
            workers: default_worker_count(),
        }
    }

    #[cfg(test)]
    pub fn with_workers(multithread: bool, workers: usize) -> Self {
        Self {
            tasks: Vec::new(),
            multithread,
            workers: workers.max(1),
        }
    }

    pub fn add_task(&mut self, task: impl FnOnce() + Send + 'static) {
        self.tasks.push(Box::new(task));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Runs every queued task and blocks until the pool drains. Panics from
    /// tasks resurface here, on the caller's thread.
    pub fn run(self) {
        if !self.multithread {
            for task in self.tasks {
                task();
            }
            return;
        }

        let (sender, receiver) = unbounded::<Task>();
        for task in self.tasks {
            sender.send(task).expect("queueing on an unbounded channel");
        }
        drop(sender);

        let panicked = Arc::new(AtomicBool::new(false));
        let payload: Arc<Mutex<Option<Box<dyn std::any::Any + Send>>>> = Arc::new(Mutex::new(None));

        let mut handles = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let receiver = receiver.clone();
            let panicked = panicked.clone();
            let payload = payload.clone();

            handles.push(std::thread::spawn(move || {
                while let Ok(task) = receiver.recv() {
                    if panicked.load(Ordering::SeqCst) {
                        // a sibling already failed: drain without running
                        continue;
                    }

                    logger::start_thread_buffer();
                    let result = catch_unwind(AssertUnwindSafe(task));
                    logger::flush_thread_buffer();

                    if let Err(panic_payload) = result {
                        let mut slot = payload.lock().unwrap_or_else(|e| e.into_inner());
                        if slot.is_none() {
                            *slot = Some(panic_payload);
                        }
                        panicked.store(true, Ordering::SeqCst);
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.join();
        }

        let panic_payload = payload.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(panic_payload) = panic_payload {
            resume_unwind(panic_payload);
        }
    }
}
