//! System declaration and the per-invocation frame.
//!
//! A system is a runtime-declared transform over component storage: an
//! ordered list of read-only components, an ordered list of mutable
//! components, a [`Join`] policy over those columns, scheduling inputs
//! (priority, program bucket, barrier names), an optional predicate, the
//! transform itself, and an optional post-callback that runs once per
//! dispatch.
//!
//! The transform is invoked once per matched row with two arguments:
//!
//! - [`Instances`] - the row: one instance per declared component column
//! - [`Frame`] - the invocation context: tick delta, the system's user
//!   state, the triggering event message (for event systems), and the
//!   deferred-mutation handles
//!
//! Structural changes (add/remove/destroy) issued from inside a transform
//! go through the frame and are queued; they become visible when the tick's
//! deferred-mutation phase applies them.

pub mod registry;

pub use registry::{SystemCell, SystemSet};

use crate::ecs::command::{Mutation, MutationLog};
use crate::ecs::component::ComponentId;
use crate::ecs::entity::Entity;
use crate::ecs::event::Message;
use crate::value::Var;

/// A registered system id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemId(u32);

impl SystemId {
    /// Construct an id from its raw value.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The id's index; ids are handed out in registration order.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// How a system's component columns combine into rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Join {
    /// Rows are entities present in every declared component.
    #[default]
    Inner,
    /// Rows follow the first declared component; other columns are absent
    /// (`None`) when the entity lacks them.
    Left,
    /// Rows are the cartesian product of every column's dense buffer.
    Cross,
}

/// What causes a system to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trigger {
    /// Every tick, during system dispatch.
    #[default]
    Loop,
    /// Only when a subscribed event delivers a message.
    Event,
}

/// The per-invocation context handed to predicates, transforms and
/// callbacks.
pub struct Frame<'a> {
    /// Seconds since the previous tick.
    pub dt: f64,
    /// The system's mutable user state.
    pub state: &'a mut Var,
    /// The delivering message, for event-triggered systems.
    pub message: Option<&'a Message>,
    commands: &'a MutationLog,
}

impl<'a> Frame<'a> {
    pub(crate) fn new(
        dt: f64,
        state: &'a mut Var,
        message: Option<&'a Message>,
        commands: &'a MutationLog,
    ) -> Self {
        Self {
            dt,
            state,
            message,
            commands,
        }
    }

    /// Queue attaching `component` to `entity`. Applied in the tick's
    /// deferred-mutation phase; lookups made before then do not see it.
    pub fn add(&self, entity: Entity, component: ComponentId, payload: Var) {
        self.commands.push(Mutation::Add {
            entity,
            component,
            payload,
        });
    }

    /// Queue detaching `component` from `entity`.
    pub fn remove(&self, entity: Entity, component: ComponentId) {
        self.commands.push(Mutation::Remove { entity, component });
    }

    /// Queue destroying `entity` and every component attached to it.
    pub fn destroy(&self, entity: Entity) {
        self.commands.push(Mutation::Destroy { entity });
    }
}

static NIL: Var = Var::Nil;

/// One matched row: an instance per declared component column.
///
/// Columns are indexed separately per access list: `read(i)` addresses the
/// i-th declared read-only component, `write(i)` the i-th declared mutable
/// one. Under a [`Join::Left`] join, absent columns read as `Nil`.
pub struct Instances<'a> {
    entities: &'a [Entity],
    reads: Vec<Option<&'a Var>>,
    writes: Vec<Option<&'a mut Var>>,
}

impl<'a> Instances<'a> {
    pub(crate) fn new(
        entities: &'a [Entity],
        reads: Vec<Option<&'a Var>>,
        writes: Vec<Option<&'a mut Var>>,
    ) -> Self {
        Self {
            entities,
            reads,
            writes,
        }
    }

    /// The row's entity. For cross joins, the entity of the first column.
    pub fn entity(&self) -> Entity {
        self.entities[0]
    }

    /// The entity of one column; columns are ordered reads then writes.
    pub fn entity_at(&self, column: usize) -> Option<Entity> {
        self.entities.get(column).copied()
    }

    /// The i-th read-only instance, `Nil` when absent (left joins).
    pub fn read(&self, index: usize) -> &Var {
        self.reads.get(index).and_then(|v| *v).unwrap_or(&NIL)
    }

    /// `true` when the i-th read-only instance is present.
    pub fn has_read(&self, index: usize) -> bool {
        matches!(self.reads.get(index), Some(Some(_)))
    }

    /// The i-th mutable instance, `None` when absent (left joins).
    pub fn write(&mut self, index: usize) -> Option<&mut Var> {
        self.writes.get_mut(index)?.as_deref_mut()
    }

    /// Number of read-only columns.
    pub fn read_count(&self) -> usize {
        self.reads.len()
    }

    /// Number of mutable columns.
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }
}

/// Transform invoked per matched row.
pub type TransformFn = Box<dyn FnMut(&mut Instances<'_>, &mut Frame<'_>) + Send>;

/// Pre-condition checked once per dispatch; `false` skips the transform
/// (the callback still runs).
pub type PredicateFn = Box<dyn Fn(&Frame<'_>) -> bool + Send>;

/// Post-callback run once per dispatch, after the row loop.
pub type CallbackFn = Box<dyn FnMut(&mut Frame<'_>) + Send>;

/// Declaration of a system, passed to
/// [`SystemSet::register`](registry::SystemSet::register).
#[derive(Default)]
pub struct SystemConfig {
    pub(crate) name: String,
    pub(crate) reads: Vec<ComponentId>,
    pub(crate) writes: Vec<ComponentId>,
    pub(crate) join: Join,
    pub(crate) priority: i16,
    pub(crate) trigger: Trigger,
    pub(crate) bucket: u32,
    pub(crate) barriers: Vec<String>,
    pub(crate) cross_skip_collisions: bool,
    pub(crate) state: Var,
    pub(crate) predicate: Option<PredicateFn>,
    pub(crate) transform: Option<TransformFn>,
    pub(crate) callback: Option<CallbackFn>,
}

impl SystemConfig {
    /// Start a declaration for a system named `name` (used in logs only).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Read-only component columns, in declaration order.
    pub fn reads(mut self, components: impl IntoIterator<Item = ComponentId>) -> Self {
        self.reads = components.into_iter().collect();
        self
    }

    /// Mutable component columns, in declaration order.
    pub fn writes(mut self, components: impl IntoIterator<Item = ComponentId>) -> Self {
        self.writes = components.into_iter().collect();
        self
    }

    /// The join policy over the declared columns.
    pub fn join(mut self, join: Join) -> Self {
        self.join = join;
        self
    }

    /// Scheduling priority within the bucket; higher runs earlier, ties
    /// break by registration order.
    pub fn priority(mut self, priority: i16) -> Self {
        self.priority = priority;
        self
    }

    /// What causes the system to run.
    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// The program bucket; systems in one bucket run sequentially, distinct
    /// buckets may run on distinct threads.
    pub fn bucket(mut self, bucket: u32) -> Self {
        self.bucket = bucket;
        self
    }

    /// Tag the system with a named barrier. The first system registered
    /// against a barrier leads it: each tick the leader runs to completion
    /// before any other member starts.
    pub fn barrier(mut self, name: impl Into<String>) -> Self {
        self.barriers.push(name.into());
        self
    }

    /// For cross joins: skip rows where the same entity occupies more than
    /// one column.
    pub fn cross_skip_collisions(mut self, skip: bool) -> Self {
        self.cross_skip_collisions = skip;
        self
    }

    /// The system's user state, surfaced mutably through the frame.
    pub fn state(mut self, state: Var) -> Self {
        self.state = state;
        self
    }

    /// Pre-condition checked once per dispatch.
    pub fn predicate(mut self, f: impl Fn(&Frame<'_>) -> bool + Send + 'static) -> Self {
        self.predicate = Some(Box::new(f));
        self
    }

    /// The transform run per matched row.
    pub fn transform(
        mut self,
        f: impl FnMut(&mut Instances<'_>, &mut Frame<'_>) + Send + 'static,
    ) -> Self {
        self.transform = Some(Box::new(f));
        self
    }

    /// Post-callback run once per dispatch.
    pub fn callback(mut self, f: impl FnMut(&mut Frame<'_>) + Send + 'static) -> Self {
        self.callback = Some(Box::new(f));
        self
    }
}
