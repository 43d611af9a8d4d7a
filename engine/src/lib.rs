//! An entity-component-system runtime with an integrated coroutine
//! scheduler, parallel system executor, event bus, scene stack and dynamic
//! schema layer.
//!
//! The engine is a library: a host application builds a
//! [`Universe`](core::Universe) from a [`Config`](core::Config), declares
//! components (plain or backed by runtime [`Schema`](value::Schema)s),
//! spawns entities, registers systems and events, schedules coroutines, and
//! drives the per-frame loop. Rendering, audio, windowing and scripting are
//! external collaborators; the core exposes only their contracts.
//!
//! ```rust,ignore
//! use kestrel_engine::core::{Config, LoopCallbacks, Universe};
//! use kestrel_engine::ecs::system::SystemConfig;
//! use kestrel_engine::value::{Schema, SchemaBuilder, Tag, Var};
//!
//! let schema = Schema::create(
//!     "Position",
//!     SchemaBuilder::new().scalar("x", Tag::Double).scalar("y", Tag::Double),
//! )?;
//!
//! let mut universe = Universe::init(Config::default())?;
//! let position = universe.schema_component(&schema)?;
//!
//! let e = universe.entity_create();
//! universe.entity_add(e, position, Var::Nil)?;
//!
//! universe.system_create(
//!     SystemConfig::new("drift").writes([position]).transform(|row, frame| {
//!         let pos = row.write(0).unwrap();
//!         *pos.struct_at("x").unwrap() = Var::Double(frame.dt);
//!     }),
//! )?;
//!
//! universe.start()?;
//! let mut callbacks = LoopCallbacks::default();
//! universe.loop_once(&mut callbacks)?;
//! ```

pub mod coro;
pub mod core;
pub mod ecs;
pub mod error;
pub mod mem;
pub mod scene;
pub mod tasks;
pub mod value;

pub use error::{Error, Result};
