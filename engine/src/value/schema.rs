//! Runtime-defined composite schemas.
//!
//! A [`Schema`] is a named, ordered list of typed fields. Schemas describe
//! both dynamic components and script-visible structs; the two share the
//! same layout metadata. Construction goes through [`SchemaBuilder`], which
//! fixes every field's offset and size at build time; a registered schema's
//! layout never changes afterwards.
//!
//! Registered schemas live in a process-lifetime registry: looking a name up
//! with [`Schema::find`] returns the same handle for as long as the process
//! runs.

use std::fmt;
use std::sync::{Arc, LazyLock, OnceLock};

use dashmap::DashMap;

use crate::ecs::component::ComponentId;
use crate::error::{Error, Result};
use crate::value::Var;

/// Process-lifetime schema registry, keyed by schema name.
static REGISTRY: LazyLock<DashMap<String, Schema>> = LazyLock::new(DashMap::new);

/// The tag of a [`Var`] or schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Nil,
    Int,
    Uint,
    Double,
    Bool,
    String,
    Bytes,
    Ptr,
    Array,
    Map,
    Struct,
    Entity,
}

impl Tag {
    /// The packed size of a field with this tag: scalars and handles are
    /// word-sized, containers contribute a word-sized header (their storage
    /// is owned out-of-line), `Bytes` fields size themselves explicitly.
    fn field_size(&self) -> usize {
        match self {
            Tag::Bytes => 0, // caller supplies the size
            _ => std::mem::size_of::<u64>(),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::Nil => "nil",
            Tag::Int => "int",
            Tag::Uint => "uint",
            Tag::Double => "double",
            Tag::Bool => "bool",
            Tag::String => "string",
            Tag::Bytes => "bytes",
            Tag::Ptr => "ptr",
            Tag::Array => "array",
            Tag::Map => "map",
            Tag::Struct => "struct",
            Tag::Entity => "entity",
        };
        f.write_str(name)
    }
}

/// One field of a schema: key, tag, and the offset/size fixed at build time.
#[derive(Debug, Clone)]
pub struct SchemaField {
    key: String,
    tag: Tag,
    offset: usize,
    size: usize,
    element: Option<Tag>,
    value_element: Option<Tag>,
}

impl SchemaField {
    /// The field's key string.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The field's tag.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Byte offset of the field in the packed layout.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Byte size of the field in the packed layout.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Element tag for `Array` fields, key tag for `Map` fields.
    pub fn element(&self) -> Option<Tag> {
        self.element
    }

    /// Value tag for `Map` fields.
    pub fn value_element(&self) -> Option<Tag> {
        self.value_element
    }
}

/// Accumulates fields for [`Schema::create`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<SchemaField>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scalar, handle or struct field of the given tag.
    pub fn scalar(mut self, key: impl Into<String>, tag: Tag) -> Self {
        self.push(key.into(), tag, tag.field_size(), None, None);
        self
    }

    /// Add a fixed-size byte buffer field.
    pub fn bytes(mut self, key: impl Into<String>, size: usize) -> Self {
        self.push(key.into(), Tag::Bytes, size, None, None);
        self
    }

    /// Add an array field with the given element tag.
    pub fn array(mut self, key: impl Into<String>, element: Tag) -> Self {
        self.push(key.into(), Tag::Array, Tag::Array.field_size(), Some(element), None);
        self
    }

    /// Add a map field with the given key and value tags.
    pub fn map(mut self, key: impl Into<String>, map_key: Tag, map_value: Tag) -> Self {
        self.push(
            key.into(),
            Tag::Map,
            Tag::Map.field_size(),
            Some(map_key),
            Some(map_value),
        );
        self
    }

    fn push(
        &mut self,
        key: String,
        tag: Tag,
        size: usize,
        element: Option<Tag>,
        value_element: Option<Tag>,
    ) {
        // Offsets accumulate behind the word-sized instance header.
        let offset = self
            .fields
            .last()
            .map(|f| f.offset + f.size)
            .unwrap_or(std::mem::size_of::<u64>());
        self.fields.push(SchemaField {
            key,
            tag,
            offset,
            size,
            element,
            value_element,
        });
    }

    /// Number of fields accumulated so far.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// `true` when no fields were added.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

struct SchemaInner {
    name: String,
    fields: Vec<SchemaField>,
    size: usize,
    component: OnceLock<ComponentId>,
}

/// A shared handle to a registered schema.
#[derive(Clone)]
pub struct Schema(Arc<SchemaInner>);

impl Schema {
    /// Build and register a schema under `name`.
    ///
    /// Fails with [`Error::AlreadyExists`] when the name is taken. Field
    /// counts are capped at `u8::MAX`; exceeding the cap is a bug in the
    /// caller and panics.
    pub fn create(name: impl Into<String>, builder: SchemaBuilder) -> Result<Schema> {
        let name = name.into();
        assert!(
            builder.fields.len() <= u8::MAX as usize,
            "schema field count overflow: {}",
            builder.fields.len()
        );
        let size = std::mem::size_of::<u64>()
            + builder.fields.iter().map(|f| f.size).sum::<usize>();
        let schema = Schema(Arc::new(SchemaInner {
            name: name.clone(),
            fields: builder.fields,
            size,
            component: OnceLock::new(),
        }));
        use dashmap::mapref::entry::Entry;
        match REGISTRY.entry(name) {
            Entry::Occupied(_) => Err(Error::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(schema.clone());
                Ok(schema)
            }
        }
    }

    /// Look a schema up by name. The same handle is returned for the
    /// process lifetime.
    pub fn find(name: &str) -> Option<Schema> {
        REGISTRY.get(name).map(|entry| entry.value().clone())
    }

    /// The schema's registered name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Total packed payload size in bytes: a word-sized header plus the
    /// packed field array.
    pub fn size(&self) -> usize {
        self.0.size
    }

    /// Number of fields.
    pub fn num_fields(&self) -> usize {
        self.0.fields.len()
    }

    /// All fields in declaration order.
    pub fn fields(&self) -> &[SchemaField] {
        &self.0.fields
    }

    /// Field metadata by position.
    pub fn field(&self, index: usize) -> Option<&SchemaField> {
        self.0.fields.get(index)
    }

    /// Position of a field by key.
    pub fn field_index(&self, key: &str) -> Option<usize> {
        self.0.fields.iter().position(|f| f.key == key)
    }

    /// The component this schema backs, once bound.
    pub fn component(&self) -> Option<ComponentId> {
        self.0.component.get().copied()
    }

    /// Bind this schema to a component id. A schema backs at most one
    /// component; rebinding fails with [`Error::AlreadyExists`].
    pub(crate) fn bind_component(&self, id: ComponentId) -> Result<()> {
        self.0.component.set(id).map_err(|_| Error::AlreadyExists)
    }

    /// Create a struct instance, filling unsupplied trailing fields with
    /// `Nil`. Supplying more values than the schema has fields fails with
    /// [`Error::IncompatibleDataTypes`].
    pub fn instantiate(&self, values: Vec<Var>) -> Result<Var> {
        Ok(Var::Struct(StructValue::create(self, values)?))
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.0.name)
            .field("fields", &self.0.fields.len())
            .field("size", &self.0.size)
            .finish()
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A schema-backed struct instance: the schema handle plus one var per
/// field.
#[derive(Debug, Clone)]
pub struct StructValue {
    schema: Schema,
    fields: Box<[Var]>,
}

impl StructValue {
    /// Build an instance from leading field values; the rest default to
    /// `Nil`.
    pub fn create(schema: &Schema, mut values: Vec<Var>) -> Result<Self> {
        if values.len() > schema.num_fields() {
            return Err(Error::IncompatibleDataTypes);
        }
        values.resize(schema.num_fields(), Var::Nil);
        Ok(Self {
            schema: schema.clone(),
            fields: values.into_boxed_slice(),
        })
    }

    /// The backing schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of fields.
    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Field value by key.
    pub fn at(&self, key: &str) -> Option<&Var> {
        self.fields.get(self.schema.field_index(key)?)
    }

    /// Mutable field value by key.
    pub fn at_mut(&mut self, key: &str) -> Option<&mut Var> {
        let index = self.schema.field_index(key)?;
        self.fields.get_mut(index)
    }

    /// Field value by position.
    pub fn at_index(&self, index: usize) -> Option<&Var> {
        self.fields.get(index)
    }

    /// Mutable field value by position.
    pub fn at_index_mut(&mut self, index: usize) -> Option<&mut Var> {
        self.fields.get_mut(index)
    }

    /// Field key by position.
    pub fn key_at(&self, index: usize) -> Option<&str> {
        self.schema.field(index).map(SchemaField::key)
    }

    /// All field values in declaration order.
    pub fn fields(&self) -> &[Var] {
        &self.fields
    }
}

impl PartialEq for StructValue {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema && self.fields == other.fields
    }
}
