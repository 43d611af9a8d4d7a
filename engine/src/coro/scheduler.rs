//! Coroutine ownership and driving.

use std::sync::{Arc, Condvar, Mutex, RwLock};

use crate::coro::fiber::{Fiber, Step};
use crate::tasks::Executor;
use crate::value::Var;

/// A coroutine handle: an index into the scheduler's arena.
///
/// Handles are plain copyable indices, so the sync driver and scene state
/// never hold pointers into the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coro(usize);

struct CoroState {
    fiber: Mutex<Fiber>,
    /// Argument for the first resume; `None` once delivered.
    pending_arg: Mutex<Option<Var>>,
    /// Final result. `Nil` until the coroutine completes.
    result: RwLock<Var>,
    done: Mutex<bool>,
    done_signal: Condvar,
    is_async: bool,
}

impl CoroState {
    fn next_resume_arg(&self) -> Var {
        self.pending_arg.lock().unwrap().take().unwrap_or(Var::Nil)
    }

    fn complete(&self, value: Var) {
        *self.result.write().unwrap() = value;
        let mut done = self.done.lock().unwrap();
        *done = true;
        drop(done);
        self.done_signal.notify_all();
    }
}

/// Owns every coroutine and drives the two execution modes.
///
/// Sync coroutines advance one yield per [`run_sync`](CoroScheduler::run_sync)
/// call; the caller (a scene) owns the active and staging lists and passes
/// them in. Async coroutines are handed to the worker pool and resumed
/// straight through their yields until they complete.
pub struct CoroScheduler {
    arena: RwLock<Vec<Arc<CoroState>>>,
    stack_size: usize,
}

impl CoroScheduler {
    /// Create a scheduler whose fibers reserve `stack_size` bytes of stack.
    pub fn new(stack_size: usize) -> Self {
        Self {
            arena: RwLock::new(Vec::new()),
            stack_size,
        }
    }

    fn state(&self, coro: Coro) -> Option<Arc<CoroState>> {
        self.arena.read().unwrap().get(coro.0).cloned()
    }

    fn create<F>(&self, entry: F, arg: Var, is_async: bool) -> Coro
    where
        F: FnOnce(Var) -> Var + Send + 'static,
    {
        let state = Arc::new(CoroState {
            fiber: Mutex::new(Fiber::spawn(entry, self.stack_size)),
            pending_arg: Mutex::new(Some(arg)),
            result: RwLock::new(Var::Nil),
            done: Mutex::new(false),
            done_signal: Condvar::new(),
            is_async,
        });
        let mut arena = self.arena.write().unwrap();
        arena.push(state);
        Coro(arena.len() - 1)
    }

    /// Create a coroutine to be driven by the sync driver. The caller is
    /// responsible for staging the returned handle into a scene's pending
    /// list; it does not advance until promoted at a tick boundary.
    pub fn create_sync<F>(&self, entry: F, arg: Var) -> Coro
    where
        F: FnOnce(Var) -> Var + Send + 'static,
    {
        self.create(entry, arg, false)
    }

    /// Schedule a coroutine onto the worker pool. The worker resumes it
    /// repeatedly; intermediate yields are collected as transient results
    /// but do not suspend scheduling. Thread-safe.
    pub fn schedule_async<F>(&self, executor: &Executor, entry: F, arg: Var) -> Coro
    where
        F: FnOnce(Var) -> Var + Send + 'static,
    {
        let coro = self.create(entry, arg, true);
        let state = self.state(coro).expect("freshly created coroutine");
        executor.execute(move || {
            let mut fiber = state.fiber.lock().unwrap();
            let mut next = state.next_resume_arg();
            loop {
                match fiber.resume(next) {
                    Step::Yielded(_) => next = Var::Nil,
                    Step::Complete(value) => {
                        drop(fiber);
                        state.complete(value);
                        return;
                    }
                }
            }
        });
        coro
    }

    /// `true` if the coroutine was scheduled onto the worker pool.
    pub fn is_async(&self, coro: Coro) -> bool {
        self.state(coro).map(|s| s.is_async).unwrap_or(false)
    }

    /// The sync driver: promote newly staged coroutines, then advance every
    /// active coroutine by one yield. Completed coroutines are retired from
    /// `active`. Called once per tick with the owning scene's lists.
    pub fn run_sync(&self, active: &mut Vec<Coro>, staged: &mut Vec<Coro>) {
        active.append(staged);
        active.retain(|&coro| {
            let Some(state) = self.state(coro) else {
                return false;
            };
            let mut fiber = state.fiber.lock().unwrap();
            match fiber.resume(state.next_resume_arg()) {
                Step::Yielded(_) => true,
                Step::Complete(value) => {
                    drop(fiber);
                    state.complete(value);
                    false
                }
            }
        });
    }

    /// Resume `target` with `value`, blocking until its next yield or
    /// completion, and return the value it produced. This is how one
    /// coroutine (or plain code) calls into another.
    pub fn call(&self, target: Coro, value: Var) -> Var {
        let Some(state) = self.state(target) else {
            return Var::Nil;
        };
        // The very first resume delivers the argument the coroutine was
        // created with; the caller's value flows in from then on.
        let arg = state.pending_arg.lock().unwrap().take().unwrap_or(value);
        let mut fiber = state.fiber.lock().unwrap();
        match fiber.resume(arg) {
            Step::Yielded(v) => v,
            Step::Complete(v) => {
                drop(fiber);
                state.complete(v.clone());
                v
            }
        }
    }

    /// Block until `coro` completes and return its result. A handle that
    /// never completes blocks forever - cancellation is cooperative.
    pub fn await_coro(&self, coro: Coro) -> Var {
        let Some(state) = self.state(coro) else {
            return Var::Nil;
        };
        let mut done = state.done.lock().unwrap();
        while !*done {
            done = state.done_signal.wait(done).unwrap();
        }
        drop(done);
        state.result.read().unwrap().clone()
    }

    /// Read the result slot without blocking: `Nil` while the coroutine is
    /// still running, its final result afterwards.
    pub fn peek(&self, coro: Coro) -> Var {
        match self.state(coro) {
            Some(state) => state.result.read().unwrap().clone(),
            None => Var::Nil,
        }
    }

    /// `true` once the coroutine has completed.
    pub fn is_done(&self, coro: Coro) -> bool {
        self.state(coro)
            .map(|s| *s.done.lock().unwrap())
            .unwrap_or(true)
    }
}
