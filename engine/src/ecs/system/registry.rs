//! System registration and barrier ownership.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::ecs::system::{
    CallbackFn, Join, PredicateFn, SystemConfig, SystemId, TransformFn, Trigger,
};
use crate::error::{Error, Result};

/// Immutable scheduling metadata for a registered system.
pub(crate) struct SystemMeta {
    pub id: SystemId,
    pub name: String,
    pub reads: Vec<crate::ecs::component::ComponentId>,
    pub writes: Vec<crate::ecs::component::ComponentId>,
    pub join: Join,
    pub priority: i16,
    pub trigger: Trigger,
    pub bucket: u32,
    pub barriers: Vec<String>,
    pub cross_skip_collisions: bool,
    pub enabled: AtomicBool,
}

/// The mutable half of a system: user state and the three callables. The
/// dispatcher locks this for the duration of one dispatch.
pub(crate) struct SystemRuntime {
    pub state: crate::value::Var,
    pub predicate: Option<PredicateFn>,
    pub transform: Option<TransformFn>,
    pub callback: Option<CallbackFn>,
}

/// One registered system: metadata plus lock-guarded runtime.
pub struct SystemCell {
    pub(crate) meta: SystemMeta,
    pub(crate) runtime: Mutex<SystemRuntime>,
}

impl SystemCell {
    /// The system's id.
    pub fn id(&self) -> SystemId {
        self.meta.id
    }

    /// The system's declared name.
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// What causes the system to run.
    pub fn trigger(&self) -> Trigger {
        self.meta.trigger
    }

    /// `true` while the system participates in dispatch.
    pub fn is_enabled(&self) -> bool {
        self.meta.enabled.load(Ordering::Acquire)
    }
}

/// A scene's registered systems.
///
/// Registration order is the tiebreaker for equal priorities and decides
/// barrier leadership: the first system registered against a barrier name
/// is that barrier's leader.
#[derive(Default)]
pub struct SystemSet {
    systems: Vec<Arc<SystemCell>>,
    barrier_leaders: HashMap<String, SystemId>,
}

impl SystemSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a system.
    ///
    /// The read and write lists must be disjoint and duplicate-free -
    /// overlap would have the dispatcher take the same store lock twice.
    pub fn register(&mut self, config: SystemConfig) -> Result<SystemId> {
        let mut all = config.reads.clone();
        all.extend(&config.writes);
        let total = all.len();
        all.sort();
        all.dedup();
        if all.len() != total {
            return Err(Error::IncompatibleDataTypes);
        }

        let id = SystemId::new(self.systems.len() as u32);
        for barrier in &config.barriers {
            self.barrier_leaders
                .entry(barrier.clone())
                .or_insert(id);
        }
        self.systems.push(Arc::new(SystemCell {
            meta: SystemMeta {
                id,
                name: config.name,
                reads: config.reads,
                writes: config.writes,
                join: config.join,
                priority: config.priority,
                trigger: config.trigger,
                bucket: config.bucket,
                barriers: config.barriers,
                cross_skip_collisions: config.cross_skip_collisions,
                enabled: AtomicBool::new(true),
            },
            runtime: Mutex::new(SystemRuntime {
                state: config.state,
                predicate: config.predicate,
                transform: config.transform,
                callback: config.callback,
            }),
        }));
        Ok(id)
    }

    /// The cell for one system.
    pub fn get(&self, id: SystemId) -> Option<&Arc<SystemCell>> {
        self.systems.get(id.index())
    }

    /// All systems in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SystemCell>> {
        self.systems.iter()
    }

    /// Number of registered systems.
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// The leader of a barrier: the first system registered against it.
    pub fn barrier_leader(&self, barrier: &str) -> Option<SystemId> {
        self.barrier_leaders.get(barrier).copied()
    }

    /// Include or exclude a system from dispatch.
    pub fn set_enabled(&self, id: SystemId, enabled: bool) -> Result<()> {
        let cell = self.get(id).ok_or(Error::DoesNotExist)?;
        cell.meta.enabled.store(enabled, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::ComponentId;

    #[test]
    fn register_hands_out_registration_ordered_ids() {
        let mut set = SystemSet::new();

        let a = set.register(SystemConfig::new("a")).unwrap();
        let b = set.register(SystemConfig::new("b")).unwrap();

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(a).unwrap().name(), "a");
    }

    #[test]
    fn overlapping_read_write_lists_are_rejected() {
        let mut set = SystemSet::new();
        let c = ComponentId::new(0);

        let err = set.register(SystemConfig::new("bad").reads([c]).writes([c]));

        assert_eq!(err.err(), Some(Error::IncompatibleDataTypes));
        assert!(set.is_empty());
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let mut set = SystemSet::new();
        let c = ComponentId::new(0);

        let err = set.register(SystemConfig::new("bad").reads([c, c]));

        assert_eq!(err.err(), Some(Error::IncompatibleDataTypes));
    }

    #[test]
    fn first_registered_system_leads_the_barrier() {
        let mut set = SystemSet::new();

        let first = set
            .register(SystemConfig::new("first").barrier("sync").priority(-5))
            .unwrap();
        let _second = set
            .register(SystemConfig::new("second").barrier("sync").priority(100))
            .unwrap();

        // Leadership follows registration, not priority.
        assert_eq!(set.barrier_leader("sync"), Some(first));
        assert_eq!(set.barrier_leader("other"), None);
    }

    #[test]
    fn systems_start_enabled_and_toggle() {
        let mut set = SystemSet::new();
        let id = set.register(SystemConfig::new("s")).unwrap();

        assert!(set.get(id).unwrap().is_enabled());
        set.set_enabled(id, false).unwrap();
        assert!(!set.get(id).unwrap().is_enabled());
        set.set_enabled(id, true).unwrap();
        assert!(set.get(id).unwrap().is_enabled());
    }

    #[test]
    fn toggling_unknown_system_fails() {
        let set = SystemSet::new();
        assert_eq!(
            set.set_enabled(SystemId::new(7), false).err(),
            Some(Error::DoesNotExist)
        );
    }
}
