//! Thread-backed stackful fibers.
//!
//! A fiber pairs a parked OS thread with two rendezvous channels: `resume`
//! carries values into the fiber, `step` carries [`Step`]s out. Both are
//! zero-capacity, so control transfers hand-to-hand: the resumer blocks
//! until the fiber yields or completes, and the fiber blocks until it is
//! resumed again. Exactly one side runs at any moment, which is what makes
//! yields safe at arbitrary call depth.

use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread;

use crossbeam::channel::{Receiver, Sender, bounded};

use crate::value::Var;

/// The outcome of resuming a fiber.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The fiber suspended at [`yield_value`] with this value.
    Yielded(Var),
    /// The fiber's entry returned (or panicked, yielding `Nil`).
    Complete(Var),
}

impl Step {
    /// `true` for [`Step::Complete`].
    pub fn is_complete(&self) -> bool {
        matches!(self, Step::Complete(_))
    }

    /// The carried value, consuming the step.
    pub fn into_value(self) -> Var {
        match self {
            Step::Yielded(v) | Step::Complete(v) => v,
        }
    }
}

struct FiberContext {
    step_tx: Sender<Step>,
    resume_rx: Receiver<Var>,
}

thread_local! {
    /// The context of the fiber running on this thread, if any.
    static CURRENT: RefCell<Option<FiberContext>> = const { RefCell::new(None) };
}

/// Panic payload used to unwind a fiber whose scheduler went away.
struct Detached;

/// Suspend the current coroutine, handing `value` to the resumer.
///
/// Returns the value passed to the next resume. Called outside a coroutine
/// this is a no-op that returns `value` unchanged.
pub fn yield_value(value: Var) -> Var {
    // Channels are cloned out so no RefCell borrow is held across the
    // blocking rendezvous.
    let ctx = CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .map(|ctx| (ctx.step_tx.clone(), ctx.resume_rx.clone()))
    });
    let Some((step_tx, resume_rx)) = ctx else {
        log::warn!("yield_value called outside a coroutine");
        return value;
    };
    if step_tx.send(Step::Yielded(value)).is_err() {
        // The owning scheduler is gone; unwind the fiber stack.
        std::panic::panic_any(Detached);
    }
    match resume_rx.recv() {
        Ok(resumed) => resumed,
        Err(_) => std::panic::panic_any(Detached),
    }
}

/// A suspended computation on its own thread.
///
/// Dropping a fiber disconnects its channels; a dropped fiber blocked at a
/// yield unwinds and its thread exits on its next resume attempt.
pub(crate) struct Fiber {
    resume_tx: Sender<Var>,
    step_rx: Receiver<Step>,
    finished: bool,
}

impl Fiber {
    /// Spawn a fiber for `entry` with the given stack reservation. The entry
    /// does not start running until the first [`resume`](Fiber::resume).
    pub fn spawn<F>(entry: F, stack_size: usize) -> Fiber
    where
        F: FnOnce(Var) -> Var + Send + 'static,
    {
        let (resume_tx, resume_rx) = bounded::<Var>(0);
        let (step_tx, step_rx) = bounded::<Step>(0);

        let body_step_tx = step_tx.clone();
        let spawned = thread::Builder::new()
            .name("kestrel-fiber".into())
            .stack_size(stack_size.max(64 * 1024))
            .spawn(move || {
                CURRENT.with(|c| {
                    *c.borrow_mut() = Some(FiberContext {
                        step_tx: body_step_tx.clone(),
                        resume_rx: resume_rx.clone(),
                    });
                });
                let Ok(first) = resume_rx.recv() else {
                    return; // dropped before ever resumed
                };
                let result = match catch_unwind(AssertUnwindSafe(|| entry(first))) {
                    Ok(value) => value,
                    Err(payload) => {
                        if payload.downcast_ref::<Detached>().is_none() {
                            log::error!("coroutine panicked; completing with nil");
                        }
                        Var::Nil
                    }
                };
                CURRENT.with(|c| *c.borrow_mut() = None);
                let _ = body_step_tx.send(Step::Complete(result));
            });

        if spawned.is_err() {
            log::error!("failed to spawn fiber thread");
            // The channels stay disconnected; resume will report completion.
        }

        Fiber {
            resume_tx,
            step_rx,
            finished: false,
        }
    }

    /// Resume the fiber with `value`, blocking until its next yield or
    /// completion. Resuming a finished fiber reports `Complete(Nil)`.
    pub fn resume(&mut self, value: Var) -> Step {
        if self.finished {
            return Step::Complete(Var::Nil);
        }
        if self.resume_tx.send(value).is_err() {
            self.finished = true;
            return Step::Complete(Var::Nil);
        }
        match self.step_rx.recv() {
            Ok(step) => {
                if step.is_complete() {
                    self.finished = true;
                }
                step
            }
            Err(_) => {
                self.finished = true;
                Step::Complete(Var::Nil)
            }
        }
    }

    /// `true` once the fiber has completed.
    pub fn finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STACK: usize = 256 * 1024;

    #[test]
    fn entry_runs_on_first_resume_only() {
        let mut fiber = Fiber::spawn(|arg| arg, STACK);

        assert_eq!(fiber.resume(Var::Int(5)), Step::Complete(Var::Int(5)));
        assert!(fiber.finished());
    }

    #[test]
    fn yield_suspends_and_resume_continues() {
        let mut fiber = Fiber::spawn(
            |arg| {
                let resumed = yield_value(arg);
                yield_value(Var::Int(resumed.as_int().unwrap() + 1))
            },
            STACK,
        );

        assert_eq!(fiber.resume(Var::Int(1)), Step::Yielded(Var::Int(1)));
        assert_eq!(fiber.resume(Var::Int(10)), Step::Yielded(Var::Int(11)));
        // Entry returns the value passed into the final resume.
        assert_eq!(fiber.resume(Var::Int(99)), Step::Complete(Var::Int(99)));
    }

    #[test]
    fn yield_works_at_call_depth() {
        fn deep(n: i64) -> Var {
            if n == 0 {
                yield_value(Var::from("bottom"))
            } else {
                deep(n - 1)
            }
        }
        let mut fiber = Fiber::spawn(|_| deep(20), STACK);

        assert_eq!(fiber.resume(Var::Nil), Step::Yielded(Var::from("bottom")));
        assert!(fiber.resume(Var::from("up")).is_complete());
    }

    #[test]
    fn panic_completes_with_nil() {
        let mut fiber = Fiber::spawn(|_| panic!("inside fiber"), STACK);

        assert_eq!(fiber.resume(Var::Nil), Step::Complete(Var::Nil));
        assert!(fiber.finished());
    }

    #[test]
    fn resume_after_completion_reports_nil() {
        let mut fiber = Fiber::spawn(|_| Var::Int(1), STACK);

        assert_eq!(fiber.resume(Var::Nil), Step::Complete(Var::Int(1)));
        assert_eq!(fiber.resume(Var::Nil), Step::Complete(Var::Nil));
    }

    #[test]
    fn dropping_a_suspended_fiber_does_not_hang() {
        let mut fiber = Fiber::spawn(
            |_| {
                loop {
                    yield_value(Var::Nil);
                }
            },
            STACK,
        );

        assert_eq!(fiber.resume(Var::Nil), Step::Yielded(Var::Nil));
        drop(fiber); // fiber thread unwinds on its own
    }

    #[test]
    fn yield_outside_coroutine_is_identity() {
        assert_eq!(yield_value(Var::Int(3)), Var::Int(3));
    }
}
