//! A concurrent task executor based on a thread pool pattern.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use crossbeam::channel::{Receiver, Sender, bounded, unbounded};

use crate::value::Var;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a submitted task for logging and bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

impl TaskId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The engine's worker thread pool.
///
/// Jobs can be submitted from any thread and execute in FIFO submission
/// order; completion order is non-deterministic. Dropping the executor
/// drains in-flight jobs and joins every worker.
pub struct Executor {
    sender: Sender<Message>,
    workers: Vec<Worker>,
}

enum Message {
    Run(Job),
    Shutdown,
}

struct Worker {
    handle: Option<thread::JoinHandle<()>>,
}

impl Executor {
    /// Create an executor with `size` worker threads.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = unbounded();
        let workers = (0..size).map(|id| Worker::new(id, receiver.clone())).collect();
        Executor { sender, workers }
    }

    /// Number of worker threads.
    #[inline]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Run a fire-and-forget job on the pool.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.sender.send(Message::Run(Box::new(f)));
    }

    /// Submit a job whose [`Var`] result can be joined.
    ///
    /// A panic inside the job completes the task with `Nil`; the pool keeps
    /// running.
    pub fn submit<F>(&self, f: F) -> Task
    where
        F: FnOnce(TaskId) -> Var + Send + 'static,
    {
        let id = TaskId::next();
        let (tx, rx) = bounded(1);
        let active = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&active);
        self.execute(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(id)))
                .unwrap_or_else(|_| {
                    log::error!("task {id:?} panicked; completing with nil");
                    Var::Nil
                });
            flag.store(false, Ordering::Release);
            let _ = tx.send(result);
        });
        Task { id, result: rx, active }
    }

    /// Create a scope for jobs that borrow non-`'static` data. Every job
    /// spawned inside the scope completes before `scope` returns.
    pub fn scope<'env, F, R>(&'env self, f: F) -> R
    where
        F: FnOnce(&Scope<'env>) -> R,
    {
        let scope = Scope {
            executor: self,
            _phantom: PhantomData,
        };
        f(&scope)
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.sender.send(Message::Shutdown);
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Worker {
    fn new(id: usize, receiver: Receiver<Message>) -> Self {
        let handle = thread::Builder::new()
            .name(format!("kestrel-worker-{id}"))
            .spawn(move || {
                loop {
                    match receiver.recv() {
                        Ok(Message::Run(job)) => {
                            // Jobs that must survive panics wrap themselves;
                            // a raw panic here would poison nothing but kill
                            // the worker, so contain it.
                            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
                        }
                        Ok(Message::Shutdown) | Err(_) => break,
                    }
                }
            })
            .expect("failed to spawn worker thread");
        Worker { handle: Some(handle) }
    }
}

/// A handle to a submitted task.
pub struct Task {
    id: TaskId,
    result: Receiver<Var>,
    active: Arc<AtomicBool>,
}

impl Task {
    /// The task's id.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Block until the task completes and return its result. A second join
    /// returns `Nil` (the result has already been taken).
    pub fn join(&self) -> Var {
        self.result.recv().unwrap_or(Var::Nil)
    }

    /// `true` while the task has not finished. Never blocks.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// A scope for jobs that borrow from the environment.
///
/// All jobs spawned within the scope are guaranteed to complete before the
/// scope ends.
pub struct Scope<'env> {
    executor: &'env Executor,
    _phantom: PhantomData<std::cell::Cell<&'env ()>>,
}

impl<'env> Scope<'env> {
    /// Spawn a job that may borrow from the environment.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'env,
    {
        // Safety: the lifetime is erased for storage in the executor. This is
        // sound because the Scope's Drop blocks until every spawned job has
        // run, so no job outlives the borrows it captured.
        let job: Box<dyn FnOnce() + Send + 'env> = Box::new(f);
        let job: Job = unsafe { std::mem::transmute(job) };
        let _ = self.executor.sender.send(Message::Run(job));
    }
}

impl<'env> Drop for Scope<'env> {
    fn drop(&mut self) {
        // Flush the pool: one marker per worker, then wait for all markers.
        // Since workers pull jobs in FIFO order, every job spawned by this
        // scope has finished once each worker has processed its marker.
        let (tx, rx) = bounded::<()>(self.executor.workers.len());
        for _ in 0..self.executor.workers.len() {
            let tx = tx.clone();
            let job: Job = Box::new(move || {
                let _ = tx.send(());
            });
            let _ = self.executor.sender.send(Message::Run(job));
        }
        for _ in 0..self.executor.workers.len() {
            let _ = rx.recv();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn executes_submitted_jobs() {
        let executor = Executor::new(4);
        let counter = Arc::new(Mutex::new(0));

        let tasks: Vec<Task> = (0..10)
            .map(|_| {
                let counter = Arc::clone(&counter);
                executor.submit(move |_| {
                    *counter.lock().unwrap() += 1;
                    Var::Nil
                })
            })
            .collect();
        for task in &tasks {
            task.join();
        }

        assert_eq!(*counter.lock().unwrap(), 10);
    }

    #[test]
    fn join_returns_result() {
        let executor = Executor::new(2);

        let task = executor.submit(|_| Var::Int(42));

        assert_eq!(task.join(), Var::Int(42));
        // Result already taken.
        assert_eq!(task.join(), Var::Nil);
    }

    #[test]
    fn is_active_clears_after_completion() {
        let executor = Executor::new(1);

        let task = executor.submit(|_| {
            thread::sleep(Duration::from_millis(20));
            Var::Bool(true)
        });

        task.join();
        assert!(!task.is_active());
    }

    #[test]
    fn task_ids_are_unique() {
        let executor = Executor::new(2);
        let a = executor.submit(|_| Var::Nil);
        let b = executor.submit(|_| Var::Nil);

        assert_ne!(a.id(), b.id());
        a.join();
        b.join();
    }

    #[test]
    fn panicking_task_completes_with_nil() {
        let executor = Executor::new(1);

        let task = executor.submit(|_| panic!("boom"));
        assert_eq!(task.join(), Var::Nil);

        // Pool still functional afterwards.
        assert_eq!(executor.submit(|_| Var::Int(1)).join(), Var::Int(1));
    }

    #[test]
    fn scope_waits_for_borrowing_jobs() {
        let executor = Executor::new(4);
        let mut data = vec![1, 2, 3, 4];

        executor.scope(|s| {
            for item in &mut data {
                s.spawn(move || {
                    *item *= 2;
                });
            }
        });

        assert_eq!(data, vec![2, 4, 6, 8]);
    }

    #[test]
    fn graceful_shutdown_drains_jobs() {
        let executor = Executor::new(2);
        let done = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&done);
        executor.execute(move || {
            thread::sleep(Duration::from_millis(30));
            flag.store(true, Ordering::SeqCst);
        });

        drop(executor);
        assert!(done.load(Ordering::SeqCst));
    }
}
