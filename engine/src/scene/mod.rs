//! Scenes: named containers of runtime state.
//!
//! A [`Scene`] owns everything a logical game state needs: its entity
//! manager, component stores, event bus, system set, deferred-mutation log
//! and sync-coroutine lists. The universe keeps scenes on a stack; only the
//! top scene ticks, and popping destroys the scene - its entities are torn
//! down with their destroy hooks, then the scene's on-destroy hook fires.
//!
//! Component *declarations* are universe-wide; a scene only holds instance
//! storage, which is why most operations here take the shared
//! [`Definitions`] table.

use std::sync::Mutex;

use crate::coro::Coro;
use crate::ecs::command::{Mutation, MutationLog};
use crate::ecs::component::{ComponentId, ComponentKind, Definitions, StoreSet};
use crate::ecs::entity::{Entity, Manager};
use crate::ecs::event::Bus;
use crate::ecs::system::SystemSet;
use crate::error::{Error, Result};
use crate::value::Var;

/// Hook fired after a popped scene's entities and systems are torn down.
pub type SceneHook = Box<dyn FnOnce(&str) + Send>;

/// A named container of entities, systems, events and coroutines.
pub struct Scene {
    name: String,
    pub(crate) entities: Manager,
    pub(crate) stores: StoreSet,
    pub(crate) bus: Bus,
    pub(crate) systems: SystemSet,
    pub(crate) mutations: MutationLog,
    /// Sync coroutines the driver steps each tick.
    pub(crate) coros_active: Vec<Coro>,
    /// Newly scheduled sync coroutines, promoted at the next tick boundary.
    pub(crate) coros_staged: Mutex<Vec<Coro>>,
    pub(crate) on_destroy: Option<SceneHook>,
}

impl Scene {
    /// Create an empty scene.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entities: Manager::new(),
            stores: StoreSet::new(),
            bus: Bus::new(),
            systems: SystemSet::new(),
            mutations: MutationLog::new(),
            coros_active: Vec::new(),
            coros_staged: Mutex::new(Vec::new()),
            on_destroy: None,
        }
    }

    /// The scene's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Grow instance storage to cover every registered component.
    pub(crate) fn ensure_storage(&mut self, definitions: &Definitions) {
        self.stores.ensure(definitions.len());
    }

    /// Allocate an entity in this scene.
    pub(crate) fn spawn(&mut self) -> Entity {
        self.entities.create()
    }

    /// `true` when `entity` is live and owns an instance of `component`.
    pub(crate) fn has(&self, entity: Entity, component: ComponentId) -> bool {
        self.entities.has_membership(entity, component)
    }

    /// Instance count for one component.
    pub(crate) fn count(&self, component: ComponentId) -> usize {
        self.stores
            .store(component)
            .map(|lock| lock.read().unwrap().count())
            .unwrap_or(0)
    }

    /// Clone `entity`'s instance payload. `None` for stale handles and
    /// absent instances.
    pub(crate) fn get(&self, component: ComponentId, entity: Entity) -> Option<Var> {
        self.stores
            .store(component)?
            .read()
            .unwrap()
            .get(entity)
            .cloned()
    }

    /// Attach an instance now: insert, record membership, fire the create
    /// hook. A stale entity handle is a silent no-op.
    pub(crate) fn attach_now(
        &mut self,
        definitions: &Definitions,
        entity: Entity,
        component: ComponentId,
        payload: Var,
    ) -> Result<()> {
        let info = definitions.get(component).ok_or(Error::DoesNotExist)?;
        if !self.entities.is_alive(entity) {
            return Ok(()); // the target no longer exists
        }
        self.ensure_storage(definitions);

        // Schema-backed components take struct payloads of their schema;
        // `Nil` asks for a default-initialized instance.
        let payload = match (info.schema(), payload) {
            (Some(schema), Var::Nil) => schema.instantiate(Vec::new())?,
            (Some(schema), Var::Struct(value)) => {
                if value.schema() != schema {
                    return Err(Error::IncompatibleDataTypes);
                }
                Var::Struct(value)
            }
            (Some(_), _) => return Err(Error::IncompatibleDataTypes),
            (None, payload) => payload,
        };

        let lock = self.stores.store(component).expect("storage was ensured");
        let mut store = lock.write().unwrap();
        store.insert(entity, payload);
        let slot = store.get_mut(entity).expect("instance was just inserted");
        info.fire_create(entity, slot);
        drop(store);
        self.entities.set_membership(entity, component, true);
        Ok(())
    }

    /// Detach an instance now: fire the destroy hook, swap-remove, drop
    /// membership. Absent instances and stale handles are silent no-ops.
    /// Returns entities orphaned by a `Composite` payload for the caller to
    /// destroy.
    pub(crate) fn detach_now(
        &mut self,
        definitions: &Definitions,
        entity: Entity,
        component: ComponentId,
    ) -> Result<Vec<Entity>> {
        let info = definitions.get(component).ok_or(Error::DoesNotExist)?;
        let Some(lock) = self.stores.store(component) else {
            return Ok(Vec::new());
        };
        let Some(mut payload) = lock.write().unwrap().remove(entity) else {
            return Ok(Vec::new());
        };
        info.fire_destroy(entity, &mut payload);
        self.entities.set_membership(entity, component, false);

        let mut orphans = Vec::new();
        if matches!(info.kind(), ComponentKind::Composite) {
            collect_entities(&payload, &mut orphans);
        }
        Ok(orphans)
    }

    /// Destroy an entity now: fire every attached component's destroy hook
    /// in component-registration order, then free the slot. `Composite`
    /// payloads cascade into the entities they reference.
    pub(crate) fn destroy_entity_now(&mut self, definitions: &Definitions, entity: Entity) {
        let mut pending = vec![entity];
        while let Some(entity) = pending.pop() {
            if !self.entities.is_alive(entity) {
                continue;
            }
            for index in 0..definitions.len() {
                let component = ComponentId::new(index as u32);
                if !self.has(entity, component) {
                    continue;
                }
                match self.detach_now(definitions, entity, component) {
                    Ok(orphans) => pending.extend(orphans),
                    Err(err) => {
                        log::error!("detach during entity destroy failed: {err}")
                    }
                }
            }
            self.entities.destroy(entity);
        }
    }

    /// Apply the deferred-mutation log in FIFO order. Component destroy
    /// hooks fire here. Mutations aimed at entities that died earlier in
    /// the same drain are silent no-ops.
    pub(crate) fn apply_mutations(&mut self, definitions: &Definitions) {
        for mutation in self.mutations.drain() {
            let outcome = match mutation {
                Mutation::Add {
                    entity,
                    component,
                    payload,
                } => self.attach_now(definitions, entity, component, payload),
                Mutation::Remove { entity, component } => {
                    self.detach_now(definitions, entity, component).map(|orphans| {
                        for orphan in orphans {
                            self.destroy_entity_now(definitions, orphan);
                        }
                    })
                }
                Mutation::Destroy { entity } => {
                    self.destroy_entity_now(definitions, entity);
                    Ok(())
                }
            };
            if let Err(err) = outcome {
                log::error!("deferred mutation failed in scene {:?}: {err}", self.name);
            }
        }
    }

    /// Tear the scene down: destroy every entity (hooks included), then
    /// fire the scene's on-destroy hook.
    pub(crate) fn teardown(&mut self, definitions: &Definitions) {
        // Settle anything still queued so hooks observe the final state.
        self.apply_mutations(definitions);
        let live: Vec<Entity> = self.entities.iter().collect();
        for entity in live {
            self.destroy_entity_now(definitions, entity);
        }
        if let Some(hook) = self.on_destroy.take() {
            hook(&self.name);
        }
        log::debug!("scene {:?} destroyed", self.name);
    }
}

/// Collect every `Entity`-tagged value reachable inside a payload.
fn collect_entities(value: &Var, out: &mut Vec<Entity>) {
    match value {
        Var::Entity(entity) => out.push(*entity),
        Var::Array(items) => {
            for item in items {
                collect_entities(item, out);
            }
        }
        Var::Map(map) => {
            for (_, v) in map.iter() {
                collect_entities(v, out);
            }
        }
        Var::Struct(s) => {
            for field in s.fields() {
                collect_entities(field, out);
            }
        }
        _ => {}
    }
}
