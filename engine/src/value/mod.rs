//! Runtime-typed values.
//!
//! [`Var`] is the engine's tagged value: the payload of schema fields and
//! dynamic components, the currency of coroutines, channels and events, and
//! the shape scripts see. Scalar tags are stored inline; container tags own
//! their heap storage, so cloning a `Var` is a deep copy everywhere except
//! [`Var::Ptr`], which deliberately shares the pointed-to object.
//!
//! The companion types live in submodules:
//!
//! - [`VarMap`] - insertion-ordered map with scalar keys
//! - [`Schema`] / [`StructValue`] - runtime-defined composite layouts
//! - [`parse`] - the text schema-file loader

pub mod map;
pub mod parse;
pub mod schema;

pub use map::VarMap;
pub use schema::{Schema, SchemaBuilder, SchemaField, StructValue, Tag};

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::ecs::entity::Entity;
use crate::error::{Error, Result};

/// A shared opaque object.
///
/// `Ptr` is the one aliasing tag: clones share the same underlying value,
/// and equality is identity. Everything reachable through a `Ptr` must be
/// `Send + Sync` since vars cross thread boundaries freely.
#[derive(Clone)]
pub struct Ptr(Arc<dyn Any + Send + Sync>);

impl Ptr {
    /// Wrap a value in a shared opaque handle.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Borrow the wrapped value if it has type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// `true` when both handles point at the same object.
    pub fn same(&self, other: &Ptr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Ptr {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for Ptr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Ptr(..)")
    }
}

/// The engine's tagged value type.
#[derive(Debug, Default, Clone, PartialEq)]
pub enum Var {
    /// The absent value.
    #[default]
    Nil,
    /// Signed 64-bit integer.
    Int(i64),
    /// Unsigned 64-bit integer.
    Uint(u64),
    /// 64-bit float.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// Owned UTF-8 string.
    String(String),
    /// Owned byte buffer.
    Bytes(Vec<u8>),
    /// Shared opaque object; the only aliasing tag.
    Ptr(Ptr),
    /// Owned array of vars.
    Array(Vec<Var>),
    /// Owned insertion-ordered map.
    Map(VarMap),
    /// Schema-backed struct instance.
    Struct(StructValue),
    /// Entity handle; how vars reference other entities.
    Entity(Entity),
}

impl Var {
    /// The tag of this value.
    pub fn tag(&self) -> Tag {
        match self {
            Var::Nil => Tag::Nil,
            Var::Int(_) => Tag::Int,
            Var::Uint(_) => Tag::Uint,
            Var::Double(_) => Tag::Double,
            Var::Bool(_) => Tag::Bool,
            Var::String(_) => Tag::String,
            Var::Bytes(_) => Tag::Bytes,
            Var::Ptr(_) => Tag::Ptr,
            Var::Array(_) => Tag::Array,
            Var::Map(_) => Tag::Map,
            Var::Struct(_) => Tag::Struct,
            Var::Entity(_) => Tag::Entity,
        }
    }

    /// `true` for [`Var::Nil`].
    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Var::Nil)
    }

    /// The integer payload, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Var::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The unsigned payload, if this is a `Uint`.
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Var::Uint(v) => Some(*v),
            _ => None,
        }
    }

    /// The float payload, if this is a `Double`.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Var::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// The boolean payload, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Var::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The string payload, if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Var::String(v) => Some(v),
            _ => None,
        }
    }

    /// The byte payload, if this is `Bytes`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Var::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// The entity payload, if this is an `Entity`.
    pub fn as_entity(&self) -> Option<Entity> {
        match self {
            Var::Entity(e) => Some(*e),
            _ => None,
        }
    }

    /// The struct payload, if this is a `Struct`.
    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Var::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Mutable struct payload, if this is a `Struct`.
    pub fn as_struct_mut(&mut self) -> Option<&mut StructValue> {
        match self {
            Var::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Mutable reference to a struct field by key.
    ///
    /// Returns `None` for non-struct vars and unknown keys. The reference is
    /// invalidated if the struct itself is replaced.
    pub fn struct_at(&mut self, key: &str) -> Option<&mut Var> {
        match self {
            Var::Struct(s) => s.at_mut(key),
            _ => None,
        }
    }

    /// Mutable reference to a map slot, inserting `Nil` for new keys.
    ///
    /// Fails with [`Error::IncompatibleDataTypes`] when this is not a map or
    /// the key is not a scalar tag.
    pub fn map_at(&mut self, key: Var) -> Result<&mut Var> {
        match self {
            Var::Map(m) => m.at(key),
            _ => Err(Error::IncompatibleDataTypes),
        }
    }

    /// Mutable reference to an array element. `None` when out of bounds or
    /// not an array.
    pub fn index_mut(&mut self, index: usize) -> Option<&mut Var> {
        match self {
            Var::Array(items) => items.get_mut(index),
            _ => None,
        }
    }

    /// Resize an array, filling growth with `Nil`.
    ///
    /// Shrinking to zero releases the backing storage; growth never shrinks
    /// capacity that is already sufficient.
    pub fn resize(&mut self, len: usize) -> Result<()> {
        match self {
            Var::Array(items) => {
                items.resize(len, Var::Nil);
                if len == 0 {
                    *items = Vec::new();
                }
                Ok(())
            }
            _ => Err(Error::IncompatibleDataTypes),
        }
    }

    /// Element count for containers: array/map/struct length, byte and
    /// string lengths, zero otherwise.
    pub fn len(&self) -> usize {
        match self {
            Var::String(s) => s.len(),
            Var::Bytes(b) => b.len(),
            Var::Array(a) => a.len(),
            Var::Map(m) => m.len(),
            Var::Struct(s) => s.num_fields(),
            _ => 0,
        }
    }

    /// `true` when [`Var::len`] is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<i64> for Var {
    fn from(v: i64) -> Self {
        Var::Int(v)
    }
}

impl From<u64> for Var {
    fn from(v: u64) -> Self {
        Var::Uint(v)
    }
}

impl From<f64> for Var {
    fn from(v: f64) -> Self {
        Var::Double(v)
    }
}

impl From<bool> for Var {
    fn from(v: bool) -> Self {
        Var::Bool(v)
    }
}

impl From<&str> for Var {
    fn from(v: &str) -> Self {
        Var::String(v.to_owned())
    }
}

impl From<String> for Var {
    fn from(v: String) -> Self {
        Var::String(v)
    }
}

impl From<Vec<u8>> for Var {
    fn from(v: Vec<u8>) -> Self {
        Var::Bytes(v)
    }
}

impl From<Entity> for Var {
    fn from(e: Entity) -> Self {
        Var::Entity(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Tags and accessors ====================

    #[test]
    fn default_is_nil() {
        assert!(Var::default().is_nil());
        assert_eq!(Var::default().tag(), Tag::Nil);
    }

    #[test]
    fn scalar_accessors_match_tags() {
        assert_eq!(Var::Int(-3).as_int(), Some(-3));
        assert_eq!(Var::Uint(7).as_uint(), Some(7));
        assert_eq!(Var::Double(1.5).as_double(), Some(1.5));
        assert_eq!(Var::Bool(true).as_bool(), Some(true));
        assert_eq!(Var::from("hi").as_str(), Some("hi"));

        // Wrong-tag access yields None, not a coercion.
        assert_eq!(Var::Int(3).as_uint(), None);
        assert_eq!(Var::Nil.as_int(), None);
    }

    // ==================== Deep copy ====================

    #[test]
    fn clone_is_deep_for_containers() {
        let mut original = Var::Array(vec![Var::from("a"), Var::Int(1)]);
        let mut copy = original.clone();

        *original.index_mut(0).unwrap() = Var::from("changed");

        assert_eq!(copy.index_mut(0), Some(&mut Var::from("a")));
    }

    #[test]
    fn deep_copy_is_stable() {
        let v = Var::Array(vec![
            Var::from("s"),
            Var::Bytes(vec![1, 2, 3]),
            Var::Array(vec![Var::Int(9)]),
        ]);

        let once = v.clone();
        let twice = once.clone();

        assert_eq!(once, twice);
        assert_eq!(v, twice);
    }

    #[test]
    fn ptr_clone_aliases() {
        let p = Ptr::new(41u32);
        let a = Var::Ptr(p.clone());
        let b = a.clone();

        match (&a, &b) {
            (Var::Ptr(x), Var::Ptr(y)) => assert!(x.same(y)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn ptr_downcast() {
        let p = Ptr::new(String::from("payload"));
        assert_eq!(p.downcast_ref::<String>().map(String::as_str), Some("payload"));
        assert!(p.downcast_ref::<u32>().is_none());
    }

    // ==================== Arrays ====================

    #[test]
    fn resize_fills_with_nil() {
        let mut v = Var::Array(Vec::new());
        v.resize(3).unwrap();

        assert_eq!(v.len(), 3);
        assert!(v.index_mut(2).unwrap().is_nil());
    }

    #[test]
    fn resize_to_zero_releases_storage() {
        let mut v = Var::Array(vec![Var::Int(1); 100]);
        v.resize(0).unwrap();

        match &v {
            Var::Array(items) => {
                assert_eq!(items.len(), 0);
                assert_eq!(items.capacity(), 0);
            }
            _ => unreachable!(),
        }
        assert!(v.index_mut(0).is_none());
    }

    #[test]
    fn resize_non_array_fails() {
        let mut v = Var::Int(1);
        assert_eq!(v.resize(3), Err(Error::IncompatibleDataTypes));
    }

    // ==================== Maps ====================

    #[test]
    fn map_at_inserts_nil_then_reads_back() {
        let mut v = Var::Map(VarMap::new());

        *v.map_at(Var::from("k")).unwrap() = Var::Int(5);

        assert_eq!(v.map_at(Var::from("k")).unwrap(), &mut Var::Int(5));
    }

    #[test]
    fn map_at_on_non_map_fails() {
        let mut v = Var::Nil;
        assert!(v.map_at(Var::from("k")).is_err());
    }
}
