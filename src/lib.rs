//! # Archetype ECS
//!
//! In-process entity-component storage engine for interactive simulations.
//!
//! Entities are addressed by stable, generation-validated handles and
//! grouped into archetypes — column-major tables of every entity sharing
//! the same component type set — so bulk iteration over a chosen component
//! subset is cache-efficient and allocation-free on the hot path.
//!
//! ## Design goals
//! - Archetype-based storage for cache efficiency
//! - O(1) random-access CRUD through a generational slot map
//! - Lock-disciplined parallel iteration over split row ranges
//! - Safe, explicit data access with typed failure results
//!
//! ## Quick tour
//! ```ignore
//! use archetype_ecs::prelude::*;
//!
//! let registry = Registry::default();
//! let handle = registry.create((Position { x: 0.0, y: 0.0 }, Velocity { dx: 1.0, dy: 0.0 }))?;
//!
//! registry.put(handle, (Velocity { dx: 2.0, dy: 0.0 },))?;
//! let position: Position = registry.get(handle)?;
//!
//! for (handle, (position, velocity)) in registry.view::<(Position, Velocity)>()?.iter() {
//!     // ...
//! }
//! registry.erase(handle)?;
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Core storage types

pub use engine::registry::{Registry, RegistryConfig, RegistryMode};

pub use engine::handle::{EntityLocation, Handle};

pub use engine::component::{
    component_desc_by_id, component_desc_of, component_id_of, ComponentBundle, ComponentDesc,
    ComponentFetch, ComponentSet,
};

pub use engine::view::{Query, RowWindow, SubRange, View, ViewIter, ViewIterMut, ViewMut};

pub use engine::error::{
    CapacityError, EcsError, EcsResult, PartitionBoundsError, TypeMismatchError,
};

pub use engine::types::{ArchetypeId, ComponentId, Signature};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude (Optional but recommended)
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used storage-engine types.
///
/// Import with:
/// ```rust
/// use archetype_ecs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        component_id_of, EcsError, EcsResult, Handle, Registry, RegistryConfig, RegistryMode,
        SubRange, View, ViewMut,
    };
}
