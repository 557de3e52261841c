//! Archetype tables: column-major storage for entities sharing a type set.
//!
//! ## Purpose
//! An [`Archetype`] owns one [`Column`](crate::engine::storage::Column) per
//! component type in its (immutable) signature, plus a dense handle column,
//! and mediates row-level insert, erase, and cross-archetype moves.
//!
//! ## Invariants
//! - Every column has exactly as many rows as the handle column; the row
//!   count *is* the archetype's entity count.
//! - The signature exactly reflects the set of columns present.
//! - Row `r` of the handle column holds the handle of the entity whose
//!   component values sit at row `r` of every column.
//! - Rows are kept dense with swap-erase; whenever a removal backfills a
//!   hole, the displaced handle is reported to the caller so the slot map
//!   can be reindexed.
//!
//! ## Concurrency
//! All columns and the handle column sit behind a single archetype-level
//! `RwLock`. Mutations (insert, erase, migration, clear) take it exclusive;
//! reads and iteration take it shared. The atomic `revision` counter is
//! bumped by every operation that may invalidate outstanding references
//! into the archetype (erase, clear, migration, and inserts that grow a
//! column), so iterators can detect staleness without holding the lock.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::engine::error::{EcsError, EcsResult};
use crate::engine::handle::Handle;
use crate::engine::storage::{Column, ColumnOps};
use crate::engine::types::{ArchetypeId, ComponentId, RowIndex, Signature, COMPONENT_CAP};

/// Column table plus handle column; the lock-protected interior of an
/// [`Archetype`].
pub struct ArchetypeInner {
    /// Columns indexed by `ComponentId`; `None` for absent components.
    columns: Vec<Option<Box<dyn ColumnOps>>>,
    /// Handle of the entity stored at each row.
    handles: Vec<Handle>,
}

impl ArchetypeInner {
    fn new(columns: Vec<(ComponentId, Box<dyn ColumnOps>)>, capacity_hint: usize) -> Self {
        let mut table: Vec<Option<Box<dyn ColumnOps>>> =
            (0..COMPONENT_CAP).map(|_| None).collect();
        for (component_id, mut column) in columns {
            debug_assert!(table[component_id as usize].is_none());
            column.reserve_rows(capacity_hint);
            table[component_id as usize] = Some(column);
        }
        Self { columns: table, handles: Vec::with_capacity(capacity_hint) }
    }

    /// Number of entities stored (row count of every column).
    #[inline]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` if the archetype holds no entities.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Handle of the entity at `row`.
    #[inline]
    pub fn handle_at(&self, row: usize) -> Option<Handle> {
        self.handles.get(row).copied()
    }

    /// Dense handle column.
    #[inline]
    pub fn handles(&self) -> &[Handle] {
        &self.handles
    }

    /// Type-erased column for `component_id`, if present.
    #[inline]
    pub fn column(&self, component_id: ComponentId) -> Option<&dyn ColumnOps> {
        self.columns
            .get(component_id as usize)
            .and_then(|column| column.as_deref())
    }

    #[inline]
    fn column_mut(&mut self, component_id: ComponentId) -> Option<&mut Box<dyn ColumnOps>> {
        self.columns
            .get_mut(component_id as usize)
            .and_then(|column| column.as_mut())
    }

    /// Typed column for `component_id`, if present and of element type `T`.
    #[inline]
    pub fn column_ref<T: 'static + Send + Sync>(
        &self,
        component_id: ComponentId,
    ) -> Option<&Column<T>> {
        self.column(component_id)?.as_any().downcast_ref::<Column<T>>()
    }

    /// Typed mutable column for `component_id`.
    #[inline]
    pub fn column_ref_mut<T: 'static + Send + Sync>(
        &mut self,
        component_id: ComponentId,
    ) -> Option<&mut Column<T>> {
        self.column_mut(component_id)?
            .as_any_mut()
            .downcast_mut::<Column<T>>()
    }

    /// Reference to the component value of type `T` at `row`.
    #[inline]
    pub fn value_ref<T: 'static + Send + Sync>(
        &self,
        component_id: ComponentId,
        row: RowIndex,
    ) -> Option<&T> {
        let column = self.column_ref::<T>(component_id)?;
        if (row as usize) < column.len() {
            Some(column.get(row as usize))
        } else {
            None
        }
    }

    /// Appends one row: a value for every column plus the handle.
    ///
    /// `values` must contain exactly one value per column of this archetype
    /// (order immaterial; each value is routed by its component id). All
    /// columns grow by one and agree on the new row index.
    ///
    /// Returns the new row and whether any column allocated a segment.
    pub fn push_row(
        &mut self,
        handle: Handle,
        values: Vec<(ComponentId, Box<dyn Any + Send>)>,
    ) -> EcsResult<(RowIndex, bool)> {
        let row = self.handles.len();
        let mut grew = false;
        let mut written = 0usize;

        for (component_id, value) in values {
            let column = self
                .column_mut(component_id)
                .ok_or(EcsError::Internal("insert routed a value to an absent column"))?;
            grew |= column.len() == column.capacity();
            let index = column.push_dyn(value)?;
            debug_assert_eq!(index, row, "column row misalignment on insert");
            written += 1;
        }

        debug_assert_eq!(
            written,
            self.columns.iter().filter(|column| column.is_some()).count(),
            "insert did not cover every column"
        );

        self.handles.push(handle);
        self.assert_aligned();
        Ok((row as RowIndex, grew))
    }

    /// Overwrites one component value in place, dropping the old value.
    pub fn write_value(
        &mut self,
        component_id: ComponentId,
        row: RowIndex,
        value: Box<dyn Any + Send>,
    ) -> EcsResult<()> {
        let column = self
            .column_mut(component_id)
            .ok_or(EcsError::Internal("overwrite routed a value to an absent column"))?;
        column.write_dyn(row as usize, value)?;
        Ok(())
    }

    /// Swap-erases `row` from every column and the handle column.
    ///
    /// If the erased row was not last, the previous last row now lives at
    /// `row`; its handle is returned so the slot map can be reindexed.
    pub fn erase_row(&mut self, row: RowIndex) -> Option<Handle> {
        let row = row as usize;
        let last = self.handles.len() - 1;
        let expected = if row != last { Some(last) } else { None };

        for column in self.columns.iter_mut().flatten() {
            let moved_from = column.swap_erase(row);
            debug_assert_eq!(moved_from, expected, "column swap misalignment on erase");
        }

        self.handles.swap_remove(row);
        self.assert_aligned();

        if row < self.handles.len() {
            Some(self.handles[row])
        } else {
            None
        }
    }

    /// Drops every row of every column, keeping the columns themselves.
    pub fn clear(&mut self) {
        for column in self.columns.iter_mut().flatten() {
            column.clear();
        }
        self.handles.clear();
    }

    #[inline]
    fn assert_aligned(&self) {
        debug_assert!(
            self.columns
                .iter()
                .flatten()
                .all(|column| column.len() == self.handles.len()),
            "column lengths diverged from handle column"
        );
    }
}

/// Moves one entity's row from `source` to `target` during migration.
///
/// For each component in `target`'s signature the value comes from one of
/// two places: `added` (caller-supplied, for components the source lacks or
/// the caller overwrites) or the source row (moved, for components both
/// archetypes share). Source components with no counterpart in the target,
/// and source values displaced by an overwrite, are swap-erased and dropped.
/// Every source-side compaction must agree on which row backfilled.
///
/// The caller holds both archetype locks exclusive and patches the slot map
/// afterwards: first the backfilled handle (if any), then the migrating
/// handle — the slot-map update is the commit point that decides the
/// entity's authoritative location.
///
/// Returns the new row in `target` and the backfilled source handle.
pub fn move_row(
    source: &mut ArchetypeInner,
    source_signature: &Signature,
    target: &mut ArchetypeInner,
    target_signature: &Signature,
    row: RowIndex,
    handle: Handle,
    mut added: Vec<(ComponentId, Box<dyn Any + Send>)>,
) -> EcsResult<(RowIndex, Option<Handle>)> {
    let row = row as usize;
    let last = source.handles.len() - 1;
    let expected_backfill = if row != last { Some(last) } else { None };

    let mut overwritten = Signature::default();
    let new_row = target.handles.len();

    for component_id in target_signature.iter() {
        match added.iter().position(|(id, _)| *id == component_id) {
            Some(position) => {
                let (_, value) = added.swap_remove(position);
                let target_column = target
                    .column_mut(component_id)
                    .ok_or(EcsError::Internal("migration target column missing"))?;
                let index = target_column.push_dyn(value)?;
                debug_assert_eq!(index, new_row, "column row misalignment on migration insert");
                if source_signature.has(component_id) {
                    overwritten.set(component_id);
                }
            }
            None => {
                debug_assert!(
                    source_signature.has(component_id),
                    "migration has no value source for a target component"
                );
                let source_column = source
                    .column_mut(component_id)
                    .ok_or(EcsError::Internal("migration source column missing"))?;
                let target_column = target
                    .column_mut(component_id)
                    .ok_or(EcsError::Internal("migration target column missing"))?;
                let (index, moved_from) = target_column.move_from(source_column.as_mut(), row)?;
                debug_assert_eq!(index, new_row, "column row misalignment on migration move");
                debug_assert_eq!(moved_from, expected_backfill, "column swap misalignment");
            }
        }
    }

    // Source-only components, and source values displaced by an overwrite,
    // are dropped here.
    for component_id in source_signature.iter() {
        if !target_signature.has(component_id) || overwritten.has(component_id) {
            if let Some(column) = source.column_mut(component_id) {
                let moved_from = column.swap_erase(row);
                debug_assert_eq!(moved_from, expected_backfill, "column swap misalignment");
            }
        }
    }

    target.handles.push(handle);
    source.handles.swap_remove(row);

    source.assert_aligned();
    target.assert_aligned();

    let backfilled = if row < source.handles.len() {
        Some(source.handles[row])
    } else {
        None
    };

    Ok((new_row as RowIndex, backfilled))
}

/// Stores entities that share an identical component type set, column-major.
///
/// The signature is fixed at construction; entity membership changes only
/// through insert, erase, and migration. See the module docs for the
/// invariants and locking discipline.
pub struct Archetype {
    id: ArchetypeId,
    signature: Signature,
    inner: RwLock<ArchetypeInner>,
    revision: AtomicU64,
}

impl Archetype {
    /// Creates an archetype with the given columns, one per component in
    /// `signature`.
    pub fn new(
        id: ArchetypeId,
        signature: Signature,
        columns: Vec<(ComponentId, Box<dyn ColumnOps>)>,
        capacity_hint: usize,
    ) -> Self {
        debug_assert_eq!(signature.count(), columns.len());
        debug_assert!(columns.iter().all(|(component_id, _)| signature.has(*component_id)));
        Self {
            id,
            signature,
            inner: RwLock::new(ArchetypeInner::new(columns, capacity_hint)),
            revision: AtomicU64::new(0),
        }
    }

    /// Identifier of this archetype within its registry. Stable for the
    /// archetype's lifetime; doubles as the lock-acquisition order during
    /// migration.
    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// The archetype's immutable component type set.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Returns `true` if this archetype carries every component in `need`.
    #[inline]
    pub fn matches(&self, need: &Signature) -> bool {
        self.signature.contains_all(need)
    }

    /// The archetype's read/write lock.
    #[inline]
    pub fn lock(&self) -> &RwLock<ArchetypeInner> {
        &self.inner
    }

    /// Current value of the change counter.
    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Bumps the change counter. Called by every operation that may
    /// invalidate outstanding references into this archetype.
    #[inline]
    pub fn bump_revision(&self) {
        self.revision.fetch_add(1, Ordering::Release);
    }

    /// Number of entities currently stored.
    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(inner) => inner.len(),
            Err(_) => 0,
        }
    }

    /// Returns `true` if no entities are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
