//! An archetype-chunked ECS core with event-driven systems.
//!
//! # Storage
//! Entities with the same set of component types ("signature") share an [`Archetype`].
//! An archetype stores its rows in fixed-size chunks,
//! each holding an entity id array followed by one array per component type.
//! Adding or removing components migrates the entity to another archetype;
//! all changes of one [`Edit`](world::Edit) are applied in a single migration,
//! and the target archetype of each transition is cached.
//!
//! Any `'static` type can be a component.
//! Component values are only manipulated through type-erased
//! move, clone and drop functions recorded in the process-wide [`comp`] registry.
//!
//! # Iteration
//! A [`View`] filters archetypes by required and excluded components on every use.
//! A [`Query`] caches its matching archetypes inside the world,
//! so that new archetypes are appended as they are created.
//! Both invoke a callback whose parameters select the components to borrow:
//!
//! ```
//! use dynarch::{EntityId, View, World};
//!
//! struct Position(f32);
//! struct Velocity(f32);
//!
//! let mut world = World::new();
//! world.entity().add(Position(0.0)).add(Velocity(1.5)).apply();
//! world.entity().add(Position(4.0)).apply();
//!
//! View::new().for_each(&mut world, |pos: &mut Position, vel: &Velocity| pos.0 += vel.0);
//!
//! let mut total = 0.0;
//! View::new().for_each(&mut world, |pos: &Position| total += pos.0);
//! assert_eq!(total, 5.5);
//! ```
//!
//! # Systems and events
//! A [system](system) is a callback registered on the world,
//! run whenever an [event](event) it subscribes to is dispatched.
//! Systems are ordered explicitly through [`World::order_systems`],
//! so the same registrations always run in the same order.
//!
//! Callbacks cannot access the world directly.
//! Structural changes requested through [`Deferred`] are applied
//! once the outermost operation finishes.

#![cfg_attr(not(debug_assertions), deny(missing_docs))]
#![cfg_attr(doc, warn(missing_docs))]

pub mod archetype;
pub use archetype::{Archetype, ArchetypeId};

pub mod comp;
pub use comp::{Component, ComponentId};

pub mod entity;
pub use entity::EntityId;

mod error;
pub use error::Error;

pub mod event;
pub use event::{AnyEvent, Event, On, OnAppear, OnChange, OnDisappear};
/// Derives the [`Event`] trait.
///
/// # Options
/// Options are applied behind the attribute name `dynarch`.
/// Multiple options can be separated by commas.
///
/// ## `dynarch_as($path)`
/// Reexports dynarch from another path instead of `::dynarch`.
///
/// ## `name = $string`
/// Overrides the name reported by [`Event::name`], which defaults to the type name.
pub use dynarch_codegen::Event;

pub mod query;
pub use query::{Query, View};

mod registry;

pub mod system;
pub use system::{SystemId, SystemState};

mod tracking;

#[cfg(any(test, feature = "internal-bench"))]
pub mod test_util;

pub mod world;
pub use world::{Config, Deferred, World};
