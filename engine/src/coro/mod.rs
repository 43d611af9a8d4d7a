//! Cooperative coroutines.
//!
//! A coroutine is a suspendable function of signature `Var -> Var`. Inside
//! one, [`yield_value`] suspends execution and hands a value back to whoever
//! resumed it; the coroutine continues from the same point on the next
//! resume. Suspension works at any call depth - coroutines are *stackful*.
//!
//! Two execution modes, both owned by [`CoroScheduler`]:
//!
//! - **Sync** coroutines advance one step per tick on the main thread,
//!   driven by the scheduler's sync driver.
//! - **Async** coroutines run on the worker pool; the worker resumes them
//!   straight through their yields until completion.
//!
//! # Fibers
//!
//! Each coroutine is backed by a parked OS thread with a configurable stack
//! (default 1 MiB); suspension is a rendezvous handoff between the resuming
//! thread and the fiber thread, so exactly one of the two runs at any
//! moment. Stack growth is the operating system's job. See [`fiber`] for the
//! machinery.
//!
//! # Cancellation
//!
//! There is none. A coroutine that should stop early must observe a
//! cooperative flag carried in its argument (a shared [`Ptr`](crate::value::Ptr)
//! works well) and return.

pub(crate) mod fiber;
mod scheduler;

pub use fiber::{Step, yield_value};
pub use scheduler::{Coro, CoroScheduler};
