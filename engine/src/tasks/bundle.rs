//! Composable task sequences.
//!
//! A [`TaskBundle`] is an ordered list of steps threaded through a single
//! [`Var`]: each step receives the previous step's result and returns the
//! next value. Bundles are reusable - one bundle can be submitted to the
//! pool any number of times, run inline, or embedded in another bundle.

use std::sync::Arc;
use std::time::Duration;

use crate::tasks::executor::{Executor, Task, TaskId};
use crate::value::Var;

type BundleStep = Arc<dyn Fn(TaskId, Var) -> Var + Send + Sync>;

/// An ordered, reusable sequence of tasks.
#[derive(Default, Clone)]
pub struct TaskBundle {
    steps: Vec<BundleStep>,
}

impl TaskBundle {
    /// Create an empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. It receives the task id and the running value.
    pub fn add_task<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(TaskId, Var) -> Var + Send + Sync + 'static,
    {
        self.steps.push(Arc::new(f));
        self
    }

    /// Append a step that sleeps for `duration_ms` and passes the running
    /// value through unchanged.
    pub fn add_sleep(&mut self, duration_ms: u64) -> &mut Self {
        self.add_task(move |_, value| {
            std::thread::sleep(Duration::from_millis(duration_ms));
            value
        })
    }

    /// Append another bundle's current steps, flattened in order. Later
    /// changes to `other` do not affect this bundle.
    pub fn add_bundle(&mut self, other: &TaskBundle) -> &mut Self {
        self.steps.extend(other.steps.iter().cloned());
        self
    }

    /// Drop every step.
    pub fn clear(&mut self) {
        self.steps.clear();
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// `true` when the bundle has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step on the calling thread and return the final value.
    pub fn run(&self, arg: Var) -> Var {
        let id = TaskId::next();
        self.steps.iter().fold(arg, |value, step| step(id, value))
    }

    /// Submit the bundle to the worker pool; the returned [`Task`] joins to
    /// the final value. The bundle itself stays usable.
    pub fn submit(&self, executor: &Executor, arg: Var) -> Task {
        let steps = self.steps.clone();
        executor.submit(move |id| steps.iter().fold(arg, |value, step| step(id, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_thread_the_value_in_order() {
        let mut bundle = TaskBundle::new();
        bundle
            .add_task(|_, v| Var::Int(v.as_int().unwrap() + 1))
            .add_task(|_, v| Var::Int(v.as_int().unwrap() * 10));

        assert_eq!(bundle.run(Var::Int(4)), Var::Int(50));
    }

    #[test]
    fn empty_bundle_is_identity() {
        let bundle = TaskBundle::new();
        assert!(bundle.is_empty());
        assert_eq!(bundle.run(Var::Int(7)), Var::Int(7));
    }

    #[test]
    fn submit_runs_on_the_pool_and_joins() {
        let executor = Executor::new(2);
        let mut bundle = TaskBundle::new();
        bundle
            .add_task(|_, v| Var::Int(v.as_int().unwrap() + 1))
            .add_sleep(5)
            .add_task(|_, v| Var::Int(v.as_int().unwrap() * 2));

        let task = bundle.submit(&executor, Var::Int(10));

        assert_eq!(task.join(), Var::Int(22));
    }

    #[test]
    fn bundle_is_reusable() {
        let executor = Executor::new(2);
        let mut bundle = TaskBundle::new();
        bundle.add_task(|_, v| Var::Int(v.as_int().unwrap() + 1));

        let a = bundle.submit(&executor, Var::Int(1));
        let b = bundle.submit(&executor, Var::Int(10));

        assert_eq!(a.join(), Var::Int(2));
        assert_eq!(b.join(), Var::Int(11));
        assert_eq!(bundle.run(Var::Int(100)), Var::Int(101));
    }

    #[test]
    fn add_bundle_snapshots_the_other() {
        let mut inner = TaskBundle::new();
        inner.add_task(|_, v| Var::Int(v.as_int().unwrap() + 1));

        let mut outer = TaskBundle::new();
        outer.add_bundle(&inner).add_bundle(&inner);

        // Growing the inner bundle afterwards changes nothing here.
        inner.add_task(|_, _| Var::Nil);

        assert_eq!(outer.len(), 2);
        assert_eq!(outer.run(Var::Int(0)), Var::Int(2));
    }

    #[test]
    fn clear_empties_the_bundle() {
        let mut bundle = TaskBundle::new();
        bundle.add_task(|_, v| v);
        bundle.clear();

        assert!(bundle.is_empty());
    }
}
