//! Component declarations and per-scene store sets.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::ecs::component::{ComponentConfig, ComponentId, ComponentInfo, Store};
use crate::error::{Error, Result};

/// Universe-wide table of component declarations.
///
/// Declarations are append-only: a component id, once handed out, stays
/// valid for the universe lifetime even as scenes come and go. The table is
/// capped at a configured maximum; hitting the cap fails with
/// [`MaxComponentCountReached`](Error::MaxComponentCountReached) and leaves
/// existing components untouched.
pub struct Definitions {
    infos: Vec<ComponentInfo>,
    by_name: HashMap<String, ComponentId>,
    max_components: usize,
}

impl Definitions {
    /// Create a table capped at `max_components` declarations.
    pub fn new(max_components: usize) -> Self {
        Self {
            infos: Vec::new(),
            by_name: HashMap::new(),
            max_components,
        }
    }

    /// Register a component type.
    ///
    /// Schema-backed declarations also bind the schema to the new id, so
    /// [`Schema::component`](crate::value::Schema::component) resolves from
    /// then on.
    pub fn create(&mut self, config: ComponentConfig) -> Result<ComponentId> {
        if config.name.is_empty() {
            return Err(Error::NullArgument);
        }
        if self.infos.len() >= self.max_components {
            return Err(Error::MaxComponentCountReached);
        }
        if self.by_name.contains_key(&config.name) {
            return Err(Error::AlreadyExists);
        }

        let id = ComponentId::new(self.infos.len() as u32);
        if let crate::ecs::component::ComponentKind::Schema(schema) = &config.kind {
            // A schema backs at most one component for the process lifetime.
            schema.bind_component(id)?;
        }
        self.by_name.insert(config.name.clone(), id);
        self.infos.push(ComponentInfo::new(id, config));
        log::debug!(
            "registered component {:?} as {:?}",
            self.infos.last().unwrap().name(),
            id
        );
        Ok(id)
    }

    /// Metadata for a component id.
    pub fn get(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    /// Look a component up by name.
    pub fn find(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(name).copied()
    }

    /// Number of registered components.
    #[inline]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// `true` when nothing is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// All declarations in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }
}

/// Per-scene instance storage: one lock-guarded [`Store`] per registered
/// component.
///
/// The reader/writer locks are the shared-component contract: the
/// dispatcher takes read locks for a system's const components and write
/// locks for its mutable ones, in component-id order, before the transform
/// runs.
#[derive(Default)]
pub struct StoreSet {
    stores: Vec<RwLock<Store>>,
}

impl StoreSet {
    /// Create an empty store set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow to cover every id below `count`. Called whenever a scene
    /// becomes active so late-registered components get storage.
    pub fn ensure(&mut self, count: usize) {
        while self.stores.len() < count {
            let id = ComponentId::new(self.stores.len() as u32);
            self.stores.push(RwLock::new(Store::new(id)));
        }
    }

    /// The lock for one component's store.
    pub fn store(&self, id: ComponentId) -> Option<&RwLock<Store>> {
        self.stores.get(id.index())
    }

    /// Number of component stores.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// `true` when no stores exist yet.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::ComponentKind;
    use crate::ecs::entity::Manager;
    use crate::value::Var;

    #[test]
    fn create_assigns_dense_ids() {
        let mut defs = Definitions::new(16);

        let a = defs.create(ComponentConfig::new("position").size(24)).unwrap();
        let b = defs.create(ComponentConfig::new("velocity").size(24)).unwrap();

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(defs.len(), 2);
        assert_eq!(defs.get(a).unwrap().name(), "position");
    }

    #[test]
    fn find_resolves_by_name() {
        let mut defs = Definitions::new(16);
        let id = defs.create(ComponentConfig::new("health")).unwrap();

        assert_eq!(defs.find("health"), Some(id));
        assert_eq!(defs.find("mana"), None);
    }

    #[test]
    fn duplicate_name_fails() {
        let mut defs = Definitions::new(16);
        defs.create(ComponentConfig::new("tag")).unwrap();

        let err = defs.create(ComponentConfig::new("tag"));
        assert_eq!(err.err(), Some(Error::AlreadyExists));
        assert_eq!(defs.len(), 1);
    }

    #[test]
    fn empty_name_fails() {
        let mut defs = Definitions::new(16);
        assert_eq!(
            defs.create(ComponentConfig::new("")).err(),
            Some(Error::NullArgument)
        );
    }

    #[test]
    fn cap_is_enforced_and_existing_components_survive() {
        let mut defs = Definitions::new(2);
        let a = defs.create(ComponentConfig::new("a")).unwrap();
        defs.create(ComponentConfig::new("b")).unwrap();

        let err = defs.create(ComponentConfig::new("c"));

        assert_eq!(err.err(), Some(Error::MaxComponentCountReached));
        assert_eq!(defs.len(), 2);
        assert_eq!(defs.get(a).unwrap().name(), "a");
        assert_eq!(defs.find("c"), None);
    }

    #[test]
    fn kind_defaults_to_raw() {
        let mut defs = Definitions::new(4);
        let id = defs.create(ComponentConfig::new("plain")).unwrap();

        assert!(matches!(defs.get(id).unwrap().kind(), ComponentKind::Raw));
    }

    #[test]
    fn store_set_grows_to_definitions() {
        let mut defs = Definitions::new(8);
        let a = defs.create(ComponentConfig::new("a")).unwrap();
        let b = defs.create(ComponentConfig::new("b")).unwrap();

        let mut stores = StoreSet::new();
        stores.ensure(defs.len());

        assert_eq!(stores.len(), 2);
        assert!(stores.store(a).is_some());
        assert!(stores.store(b).is_some());
        assert!(stores.store(ComponentId::new(2)).is_none());

        // ensure is idempotent
        stores.ensure(defs.len());
        assert_eq!(stores.len(), 2);
    }

    #[test]
    fn store_set_locks_guard_instance_data() {
        let mut defs = Definitions::new(4);
        let id = defs.create(ComponentConfig::new("counter")).unwrap();
        let mut stores = StoreSet::new();
        stores.ensure(defs.len());

        let mut manager = Manager::new();
        let e = manager.create();

        stores.store(id).unwrap().write().unwrap().insert(e, Var::Int(7));

        let guard = stores.store(id).unwrap().read().unwrap();
        assert_eq!(guard.get(e), Some(&Var::Int(7)));
        assert_eq!(guard.count(), 1);
    }
}
