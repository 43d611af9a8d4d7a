//! Deferred structural mutations.
//!
//! Component storage is stable for reads while events flush, systems run
//! and coroutines step; structural changes issued during those phases land
//! here instead. The orchestrator drains the log in FIFO order during the
//! tick's deferred-mutation phase, which is also where component destroy
//! hooks fire.
//!
//! Producers push lock-free from any thread; draining happens on the main
//! thread between phases.

use crossbeam::queue::SegQueue;

use crate::ecs::component::ComponentId;
use crate::ecs::entity::Entity;
use crate::value::Var;

/// A queued structural change.
pub enum Mutation {
    /// Attach a component instance to an entity.
    Add {
        entity: Entity,
        component: ComponentId,
        payload: Var,
    },
    /// Detach a component instance from an entity.
    Remove {
        entity: Entity,
        component: ComponentId,
    },
    /// Destroy an entity and everything attached to it.
    Destroy { entity: Entity },
}

/// The scene's deferred-mutation queue.
#[derive(Default)]
pub struct MutationLog {
    queue: SegQueue<Mutation>,
}

impl MutationLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a mutation. Lock-free; callable from any thread.
    pub fn push(&self, mutation: Mutation) {
        self.queue.push(mutation);
    }

    /// Take every queued mutation in FIFO order.
    pub fn drain(&self) -> Vec<Mutation> {
        let mut out = Vec::new();
        while let Some(mutation) = self.queue.pop() {
            out.push(mutation);
        }
        out
    }

    /// `true` when nothing is queued at this instant.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queued mutation count at this instant.
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
