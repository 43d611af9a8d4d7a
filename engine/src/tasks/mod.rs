//! Worker pool and thread-communication primitives.
//!
//! - [`Executor`] - the engine's worker thread pool; runs async coroutines,
//!   parallel system buckets and user tasks
//! - [`Task`] - a handle to a submitted job with `join` / `is_active`
//! - [`TaskBundle`] - a reusable, composable sequence of tasks
//! - [`Channel`] - a blocking var channel with multi-channel [`select`]
//! - [`VarQueue`] - a lock-free MPMC queue with non-blocking `try_read`
//! - [`Semaphore`] - a monotonic counting gate

mod bundle;
mod channel;
mod executor;
mod queue;
mod semaphore;

pub use bundle::TaskBundle;
pub use channel::{Channel, select};
pub use executor::{Executor, Scope, Task, TaskId};
pub use queue::VarQueue;
pub use semaphore::Semaphore;
