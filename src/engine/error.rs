//! Error types for the storage engine.
//!
//! This module declares focused, composable error types used across handle
//! resolution, column storage, and archetype migration. Each error carries
//! enough context to make failures actionable while remaining small and
//! cheap to pass around or convert into the aggregate [`EcsError`].
//!
//! ## Goals
//! * **Specificity:** Each error type models a single failure mode (stale
//!   handles, missing components, capacity exhaustion).
//! * **Ergonomics:** All errors implement [`std::error::Error`] and
//!   [`fmt::Display`], and provide `From<T>` conversions into [`EcsError`].
//! * **Actionability:** Structured fields (requested vs. available
//!   capacity, offending component names, expected vs. actual types) make
//!   failures diagnosable without reproducing the issue.
//!
//! ## Typical flow
//! Low-level column and slot operations return small, dedicated error types.
//! Higher-level registry code uses `?` to bubble failures into [`EcsError`],
//! which callers can match on for control flow.
//!
//! Every operation on a missing or erased entity surfaces as a typed failure
//! result; the engine never substitutes silent default values.

use std::any::TypeId;
use std::fmt;

use crate::engine::types::PartitionId;

/// Returned when a slot-map partition cannot satisfy a request to allocate
/// additional entities because its index space is exhausted.
///
/// ### Fields
/// * `slots_needed` — Total number of slots the operation attempted to
///   create or accommodate.
/// * `capacity` — The upper bound that prevented the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityError {
    /// Total slots the operation attempted to allocate.
    pub slots_needed: u64,

    /// Current capacity limiting the operation.
    pub capacity: u64,
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entity limit reached ({} needed; capacity {})",
            self.slots_needed, self.capacity
        )
    }
}

impl std::error::Error for CapacityError {}

/// Returned when a partition index is outside the valid range for the
/// registry's slot map.
///
/// ### Fields
/// * `index` — The partition index that was requested.
/// * `max_index` — The maximum valid partition index (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionBoundsError {
    /// Offending partition index that was requested.
    pub index: PartitionId,

    /// Maximum valid partition index (inclusive).
    pub max_index: u32,
}

impl fmt::Display for PartitionBoundsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "partition index {} out of bounds (max index {})",
            self.index, self.max_index
        )
    }
}

impl std::error::Error for PartitionBoundsError {}

/// Returned when a value's dynamic type does not match the element type of
/// the column it is being written into.
///
/// This is a logic error surfaced by type-erased storage when component
/// routing diverges (e.g. writing a `Velocity` into a `Position` column).
///
/// ### Fields
/// * `expected` — The [`TypeId`] the destination column declares.
/// * `actual` — The [`TypeId`] of the value provided by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMismatchError {
    /// Destination column's declared element type.
    pub expected: TypeId,

    /// Provided value's dynamic type.
    pub actual: TypeId,
}

impl fmt::Display for TypeMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type mismatch: expected {:?}, actual {:?}",
            self.expected, self.actual
        )
    }
}

impl std::error::Error for TypeMismatchError {}

/// Aggregate error for registry, archetype, and column operations.
///
/// ### Variants
/// * `StaleHandle` — the handle's generation no longer matches its slot;
///   the entity was erased. A second `erase` on the same handle reports
///   this, never memory corruption.
/// * `MissingComponent` — the entity is alive but does not carry the
///   requested component type.
/// * `DuplicateComponent` — the same component type was named twice in one
///   `create`/`put` call.
/// * `Capacity` / `PartitionBounds` / `ComponentCapacity` — an identifier
///   space was exhausted.
/// * `TypeMismatch` — type-erased storage was handed a value of the wrong
///   type; indicates an internal routing bug.
/// * `IterationActive` — a sequential-mode registry rejected a structural
///   mutation because a live view holds the affected archetype.
/// * `PoisonedLock` — a lock was poisoned by a panicking thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// The handle refers to an erased or recycled slot.
    StaleHandle,

    /// The entity exists but does not carry the requested component.
    MissingComponent {
        /// Rust type name of the missing component.
        name: &'static str,
    },

    /// The same component type appeared more than once in a single call.
    DuplicateComponent {
        /// Rust type name of the duplicated component.
        name: &'static str,
    },

    /// A slot-map partition ran out of slot indices.
    Capacity(CapacityError),

    /// A partition index was outside the valid range.
    PartitionBounds(PartitionBoundsError),

    /// The component-id space was exhausted.
    ComponentCapacity {
        /// Maximum number of registrable component types.
        cap: usize,
    },

    /// A value reached a column of a different element type.
    TypeMismatch(TypeMismatchError),

    /// A structural mutation was attempted while a view held the archetype
    /// (sequential mode only; parallel mode blocks instead).
    IterationActive,

    /// A lock was poisoned by a panic on another thread.
    PoisonedLock,

    /// An internal storage invariant was violated. Indicates a bug.
    Internal(&'static str),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::StaleHandle => f.write_str("stale or erased entity handle"),
            EcsError::MissingComponent { name } => {
                write!(f, "entity does not carry component {}", name)
            }
            EcsError::DuplicateComponent { name } => {
                write!(f, "component type {} named more than once in one call", name)
            }
            EcsError::Capacity(e) => write!(f, "{e}"),
            EcsError::PartitionBounds(e) => write!(f, "{e}"),
            EcsError::ComponentCapacity { cap } => {
                write!(f, "component type limit reached (capacity {})", cap)
            }
            EcsError::TypeMismatch(e) => write!(f, "{e}"),
            EcsError::IterationActive => {
                f.write_str("structural mutation rejected: a view is iterating this archetype")
            }
            EcsError::PoisonedLock => f.write_str("lock poisoned by a panicked thread"),
            EcsError::Internal(message) => write!(f, "internal invariant violated: {}", message),
        }
    }
}

impl std::error::Error for EcsError {}

impl From<CapacityError> for EcsError {
    fn from(e: CapacityError) -> Self {
        EcsError::Capacity(e)
    }
}

impl From<PartitionBoundsError> for EcsError {
    fn from(e: PartitionBoundsError) -> Self {
        EcsError::PartitionBounds(e)
    }
}

impl From<TypeMismatchError> for EcsError {
    fn from(e: TypeMismatchError) -> Self {
        EcsError::TypeMismatch(e)
    }
}

/// Convenience alias for results produced by this crate.
pub type EcsResult<T> = Result<T, EcsError>;
