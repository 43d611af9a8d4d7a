//! Runtime-declared component types.
//!
//! Components are declared at runtime: a [`ComponentConfig`] names the type,
//! fixes its payload size and [`ComponentKind`], and optionally attaches
//! create/destroy hooks. Declarations live in the universe-wide
//! [`Definitions`](registry::Definitions) table; instance storage is
//! per-scene (see [`Store`] and [`StoreSet`](registry::StoreSet)).
//!
//! Instance payloads are [`Var`] values owned by the store. Cross-references
//! between instances are [`Entity`] handles carried inside the payload,
//! never pointers; the `Composite` kind makes the registry walk those
//! handles on destroy.

pub mod registry;
pub mod store;

pub use registry::{Definitions, StoreSet};
pub use store::Store;

use std::sync::Arc;

use crate::ecs::entity::Entity;
use crate::value::{Schema, Var};

/// A registered component type id. Ids are dense and double as the
/// registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(u32);

impl ComponentId {
    /// Construct an id from its raw value.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The id's index for indexable storage.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// How instances of a component are destroyed.
#[derive(Debug, Clone, Default)]
pub enum ComponentKind {
    /// Plain data; dropping the payload is enough.
    #[default]
    Raw,
    /// The payload wraps a shared object; the destroy hook acts as the user
    /// destructor for it.
    Pointer,
    /// The payload's `Entity`-tagged values (including those nested in
    /// arrays, maps and structs) are owned children, destroyed with the
    /// instance.
    Composite,
    /// The payload is a struct of this schema; destroy walks the schema
    /// fields.
    Schema(Schema),
}

/// A lifecycle hook: receives the owning entity, the instance payload and
/// the user state the component was declared with.
pub type Hook = Arc<dyn Fn(Entity, &mut Var, &Var) + Send + Sync>;

/// Declaration of a component type, passed to
/// [`Definitions::create`](registry::Definitions::create).
#[derive(Default)]
pub struct ComponentConfig {
    pub(crate) name: String,
    pub(crate) size: usize,
    pub(crate) kind: ComponentKind,
    pub(crate) on_create: Option<Hook>,
    pub(crate) on_destroy: Option<Hook>,
    pub(crate) hook_state: Var,
    pub(crate) shared: bool,
}

impl ComponentConfig {
    /// Start a declaration for a component named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Payload size in bytes. Schema-backed components take their size from
    /// the schema instead.
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// The destruction behavior for instances.
    pub fn kind(mut self, kind: ComponentKind) -> Self {
        self.kind = kind;
        self
    }

    /// Back the component with a schema: instances are structs of this
    /// schema and the payload size is [`Schema::size`].
    pub fn schema(mut self, schema: Schema) -> Self {
        self.size = schema.size();
        self.kind = ComponentKind::Schema(schema);
        self
    }

    /// Hook invoked synchronously after an instance is inserted.
    pub fn on_create(mut self, hook: impl Fn(Entity, &mut Var, &Var) + Send + Sync + 'static) -> Self {
        self.on_create = Some(Arc::new(hook));
        self
    }

    /// Hook invoked before an instance is removed.
    pub fn on_destroy(mut self, hook: impl Fn(Entity, &mut Var, &Var) + Send + Sync + 'static) -> Self {
        self.on_destroy = Some(Arc::new(hook));
        self
    }

    /// User state passed to both hooks.
    pub fn hook_state(mut self, state: Var) -> Self {
        self.hook_state = state;
        self
    }

    /// Mark the component as shared between program buckets. All stores are
    /// lock-protected regardless; the flag documents intent and is surfaced
    /// on [`ComponentInfo`].
    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }
}

/// Immutable metadata for a registered component type.
pub struct ComponentInfo {
    id: ComponentId,
    name: String,
    size: usize,
    kind: ComponentKind,
    on_create: Option<Hook>,
    on_destroy: Option<Hook>,
    hook_state: Var,
    shared: bool,
}

impl ComponentInfo {
    pub(crate) fn new(id: ComponentId, config: ComponentConfig) -> Self {
        Self {
            id,
            name: config.name,
            size: config.size,
            kind: config.kind,
            on_create: config.on_create,
            on_destroy: config.on_destroy,
            hook_state: config.hook_state,
            shared: config.shared,
        }
    }

    /// The component's id.
    #[inline]
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// The declared name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared payload size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The destruction behavior.
    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    /// The backing schema for `Schema`-kind components.
    pub fn schema(&self) -> Option<&Schema> {
        match &self.kind {
            ComponentKind::Schema(schema) => Some(schema),
            _ => None,
        }
    }

    /// `true` when declared shared between buckets.
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Run the create hook, if any.
    pub(crate) fn fire_create(&self, entity: Entity, payload: &mut Var) {
        if let Some(hook) = &self.on_create {
            hook(entity, payload, &self.hook_state);
        }
    }

    /// Run the destroy hook, if any.
    pub(crate) fn fire_destroy(&self, entity: Entity, payload: &mut Var) {
        if let Some(hook) = &self.on_destroy {
            hook(entity, payload, &self.hook_state);
        }
    }
}
