//! Component identity and bundle traits.
//!
//! ## Purpose
//! This module assigns each component type a stable, process-local
//! [`ComponentId`] — an unsigned integer derived from the type so that two
//! ids are equal exactly when the types are the same — and records a
//! [`ComponentDesc`] (name, size, alignment) for diagnostics. It also
//! provides the tuple traits that carry component values and component type
//! lists through the registry's public operations:
//!
//! - [`ComponentBundle`] — a tuple of component *values*, consumed by
//!   `create` and `put`.
//! - [`ComponentSet`] — a tuple of component *types*, used by `remove` and
//!   by view matching.
//! - [`ComponentFetch`] — a tuple of clonable component types, producing a
//!   tuple of values for multi-component reads.
//!
//! ## Design
//! - Ids are assigned on first touch; there is no explicit registration
//!   step, because the registry's `create` must accept component types it
//!   has never seen.
//! - Only type *identity* is process-global. All entity and component
//!   storage lives in explicit `Registry` values, so independent worlds
//!   coexist freely.
//! - Id derivation is deterministic within a process; cross-process
//!   stability is not provided and not required.
//!
//! ## Concurrency
//! The identity table is behind a `RwLock` with an uncontended read fast
//! path; the write path runs only the first time a type is seen.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::mem::{align_of, size_of};
use std::sync::{OnceLock, RwLock};

use crate::engine::archetype::ArchetypeInner;
use crate::engine::error::{EcsError, EcsResult};
use crate::engine::storage::{new_column, ColumnOps};
use crate::engine::types::{ComponentId, RowIndex, COMPONENT_CAP};

/// Process-global mapping between Rust component types and compact ids.
///
/// ## Invariants
/// - Every entry in `by_type` has a matching `by_id[id]`.
/// - Ids are assigned sequentially and never reused.
struct IdentityTable {
    next_id: ComponentId,
    by_type: HashMap<TypeId, ComponentId>,
    by_id: Vec<ComponentDesc>,
}

static IDENTITY: OnceLock<RwLock<IdentityTable>> = OnceLock::new();

fn identity_table() -> &'static RwLock<IdentityTable> {
    IDENTITY.get_or_init(|| {
        RwLock::new(IdentityTable {
            next_id: 0,
            by_type: HashMap::new(),
            by_id: Vec::new(),
        })
    })
}

/// Returns the [`ComponentId`] for type `T`, assigning one on first use.
///
/// ## Errors
/// `ComponentCapacity` once the id space is exhausted; `PoisonedLock` if a
/// panicking thread poisoned the table.
pub fn component_id_of<T: 'static + Send + Sync>() -> EcsResult<ComponentId> {
    let type_id = TypeId::of::<T>();

    {
        let table = identity_table().read().map_err(|_| EcsError::PoisonedLock)?;
        if let Some(&id) = table.by_type.get(&type_id) {
            return Ok(id);
        }
    }

    let mut table = identity_table().write().map_err(|_| EcsError::PoisonedLock)?;
    if let Some(&id) = table.by_type.get(&type_id) {
        return Ok(id);
    }

    let id = table.next_id;
    if (id as usize) >= COMPONENT_CAP {
        return Err(EcsError::ComponentCapacity { cap: COMPONENT_CAP });
    }
    table.next_id = id.wrapping_add(1);
    table.by_type.insert(type_id, id);
    let desc = ComponentDesc::of::<T>().with_id(id);
    table.by_id.push(desc);
    Ok(id)
}

/// Returns the descriptor recorded for type `T`, assigning an id on first
/// use.
pub fn component_desc_of<T: 'static + Send + Sync>() -> EcsResult<ComponentDesc> {
    let id = component_id_of::<T>()?;
    component_desc_by_id(id)?.ok_or(EcsError::Internal("descriptor missing for assigned id"))
}

/// Returns the descriptor for `component_id`, if one was assigned.
pub fn component_desc_by_id(component_id: ComponentId) -> EcsResult<Option<ComponentDesc>> {
    let table = identity_table().read().map_err(|_| EcsError::PoisonedLock)?;
    Ok(table.by_id.get(component_id as usize).copied())
}

/// Describes a component type known to the identity table.
///
/// `ComponentDesc` is `Copy` and safe to clone freely for reporting.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComponentDesc {
    /// Runtime identifier assigned to this component type.
    pub component_id: ComponentId,

    /// Rust type name for diagnostics.
    pub name: &'static str,

    /// Runtime `TypeId` of the component.
    pub type_id: TypeId,

    /// Size of the component type in bytes.
    pub size: usize,

    /// Alignment of the component type in bytes.
    pub align: usize,
}

impl ComponentDesc {
    /// Constructs a descriptor for type `T` with an unset id.
    #[inline]
    pub fn of<T: 'static>() -> Self {
        Self {
            component_id: 0,
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            size: size_of::<T>(),
            align: align_of::<T>(),
        }
    }

    /// Returns a copy of this descriptor with `component_id` set.
    #[inline]
    pub fn with_id(mut self, component_id: ComponentId) -> Self {
        self.component_id = component_id;
        self
    }
}

impl std::fmt::Display for ComponentDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ComponentDesc {{ id: {}, name: {}, size: {}, align: {} }}",
            self.component_id, self.name, self.size, self.align
        )
    }
}

/// One component of a bundle: its id, name, and a seed that allocates an
/// empty column for it.
///
/// The seed lets archetype construction and migration allocate storage for
/// component types they have never stored, without a global factory table.
pub struct BundleEntry {
    /// Component id of this entry.
    pub id: ComponentId,
    /// Rust type name, for precondition diagnostics.
    pub name: &'static str,
    /// Allocates an empty column with the given segment-size exponent.
    pub seed: fn(u32) -> Box<dyn ColumnOps>,
}

/// A tuple of component values, consumed whole by `create` and `put`.
///
/// Implemented for tuples of up to eight distinct component types. Each
/// value is routed to its column by component id; declaration order is
/// immaterial.
pub trait ComponentBundle: Send + 'static {
    /// One entry per component, in declaration order.
    fn entries() -> EcsResult<Vec<BundleEntry>>;

    /// The component values, type-erased and paired with their ids.
    fn into_values(self) -> EcsResult<Vec<(ComponentId, Box<dyn Any + Send>)>>;
}

/// A tuple of component *types*, used where only identity matters.
pub trait ComponentSet: 'static {
    /// Component ids in declaration order, assigning ids on first use.
    fn component_ids() -> EcsResult<Vec<ComponentId>>;

    /// Rust type names in declaration order.
    fn component_names() -> Vec<&'static str>;
}

/// A tuple of clonable component types, producing a tuple of values.
pub trait ComponentFetch: ComponentSet + Sized {
    /// The tuple of fetched values.
    type Output;

    /// Clones each component of the entity at `row` out of `inner`.
    ///
    /// Fails with `MissingComponent` naming the first absent type.
    fn fetch(inner: &ArchetypeInner, row: RowIndex) -> EcsResult<Self::Output>;
}

macro_rules! impl_component_tuple {
    ($(($c:ident, $index:tt)),+) => {
        impl<$($c: 'static + Send + Sync),+> ComponentBundle for ($($c,)+) {
            fn entries() -> EcsResult<Vec<BundleEntry>> {
                Ok(vec![$(
                    BundleEntry {
                        id: component_id_of::<$c>()?,
                        name: type_name::<$c>(),
                        seed: new_column::<$c>,
                    }
                ),+])
            }

            fn into_values(self) -> EcsResult<Vec<(ComponentId, Box<dyn Any + Send>)>> {
                Ok(vec![$(
                    (
                        component_id_of::<$c>()?,
                        Box::new(self.$index) as Box<dyn Any + Send>,
                    )
                ),+])
            }
        }

        impl<$($c: 'static + Send + Sync),+> ComponentSet for ($($c,)+) {
            fn component_ids() -> EcsResult<Vec<ComponentId>> {
                Ok(vec![$(component_id_of::<$c>()?),+])
            }

            fn component_names() -> Vec<&'static str> {
                vec![$(type_name::<$c>()),+]
            }
        }

        impl<$($c: 'static + Send + Sync + Clone),+> ComponentFetch for ($($c,)+) {
            type Output = ($($c,)+);

            fn fetch(inner: &ArchetypeInner, row: RowIndex) -> EcsResult<Self::Output> {
                Ok(($(
                    inner
                        .value_ref::<$c>(component_id_of::<$c>()?, row)
                        .ok_or(EcsError::MissingComponent { name: type_name::<$c>() })?
                        .clone(),
                )+))
            }
        }
    };
}

impl_component_tuple!((C0, 0));
impl_component_tuple!((C0, 0), (C1, 1));
impl_component_tuple!((C0, 0), (C1, 1), (C2, 2));
impl_component_tuple!((C0, 0), (C1, 1), (C2, 2), (C3, 3));
impl_component_tuple!((C0, 0), (C1, 1), (C2, 2), (C3, 3), (C4, 4));
impl_component_tuple!((C0, 0), (C1, 1), (C2, 2), (C3, 3), (C4, 4), (C5, 5));
impl_component_tuple!((C0, 0), (C1, 1), (C2, 2), (C3, 3), (C4, 4), (C5, 5), (C6, 6));
impl_component_tuple!((C0, 0), (C1, 1), (C2, 2), (C3, 3), (C4, 4), (C5, 5), (C6, 6), (C7, 7));
