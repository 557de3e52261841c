//! Views: filtered, lock-holding iteration over matching archetypes.
//!
//! A view is constructed from a registry and a tuple of requested component
//! types. It snapshots the set of archetypes whose type set is a superset
//! of the request and holds each one's lock — shared for [`View`],
//! exclusive for [`ViewMut`] — for the view's entire lifetime. While the
//! view is alive no structural mutation can touch the matched archetypes,
//! so every reference it yields stays valid until the iterator advances
//! past the row, and writing through a yielded mutable reference is safe.
//!
//! Archetypes created *after* the view was built are not part of the
//! snapshot; iterators watch the registry's archetype-set version and fuse
//! with [`ViewIter::invalidated`] set if it moves mid-iteration.
//!
//! ## Parallel iteration
//! [`split`](View::split) partitions the view's total row count into up to
//! N contiguous sub-ranges of `(archetype, start_row, end_row)` windows;
//! the sub-ranges are disjoint and cover the view, so a scheduler may hand
//! each one to a separate worker with no further locking.
//! [`ViewMut::par_for_each`] does exactly that on rayon.
//!
//! ## Unsafe code
//! Views hold their lock guards with an erased lifetime next to the `Arc`
//! that owns the lock, and iterate through per-segment raw pointer tables
//! snapshotted under those guards. The guards pin the storage and exclude
//! mutation; disjoint rows make parallel writes race-free.

use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};

use crate::engine::archetype::{Archetype, ArchetypeInner};
use crate::engine::component::{component_id_of, ComponentSet};
use crate::engine::error::{EcsError, EcsResult};
use crate::engine::handle::Handle;
use crate::engine::registry::Registry;
use crate::engine::types::{ArchetypeId, Signature};

/// A tuple of component types usable as a view request.
///
/// Implemented for tuples of up to eight component types. `Item` is the
/// matching tuple of shared references, `ItemMut` of mutable references.
pub trait Query: ComponentSet {
    /// Tuple of shared component references.
    type Item<'a>;

    /// Tuple of mutable component references.
    type ItemMut<'a>;

    /// Per-archetype table of raw row addresses.
    type Cursor: Send + Sync;

    /// Builds a read-only cursor over one archetype's columns.
    fn cursor(inner: &ArchetypeInner) -> Option<Self::Cursor>;

    /// Builds a cursor with write provenance over one archetype's columns.
    fn cursor_mut(inner: &mut ArchetypeInner) -> Option<Self::Cursor>;

    /// Dereferences the row as shared references.
    ///
    /// ## Safety
    /// `row` must be below the archetype's row count at cursor-snapshot
    /// time, and the archetype must still be pinned by the guard the
    /// cursor was built under.
    unsafe fn item<'a>(cursor: &Self::Cursor, row: usize) -> Self::Item<'a>;

    /// Dereferences the row as mutable references.
    ///
    /// ## Safety
    /// As for [`item`](Self::item); additionally the cursor must have been
    /// built with [`cursor_mut`](Self::cursor_mut) and no other reference
    /// to this row may be live.
    unsafe fn item_mut<'a>(cursor: &Self::Cursor, row: usize) -> Self::ItemMut<'a>;
}

macro_rules! impl_query_tuple {
    ($(($c:ident, $index:tt)),+) => {
        impl<$($c: 'static + Send + Sync),+> Query for ($($c,)+) {
            type Item<'a> = ($(&'a $c,)+);
            type ItemMut<'a> = ($(&'a mut $c,)+);
            type Cursor = ($(crate::engine::storage::ColumnCursor<$c>,)+);

            fn cursor(inner: &ArchetypeInner) -> Option<Self::Cursor> {
                Some(($(
                    inner.column_ref::<$c>(component_id_of::<$c>().ok()?)?.cursor(),
                )+))
            }

            fn cursor_mut(inner: &mut ArchetypeInner) -> Option<Self::Cursor> {
                Some(($(
                    inner.column_ref_mut::<$c>(component_id_of::<$c>().ok()?)?.cursor_mut(),
                )+))
            }

            unsafe fn item<'a>(cursor: &Self::Cursor, row: usize) -> Self::Item<'a> {
                ($(unsafe { &*cursor.$index.row_ptr(row) },)+)
            }

            unsafe fn item_mut<'a>(cursor: &Self::Cursor, row: usize) -> Self::ItemMut<'a> {
                ($(unsafe { &mut *cursor.$index.row_ptr(row) },)+)
            }
        }
    };
}

impl_query_tuple!((C0, 0));
impl_query_tuple!((C0, 0), (C1, 1));
impl_query_tuple!((C0, 0), (C1, 1), (C2, 2));
impl_query_tuple!((C0, 0), (C1, 1), (C2, 2), (C3, 3));
impl_query_tuple!((C0, 0), (C1, 1), (C2, 2), (C3, 3), (C4, 4));
impl_query_tuple!((C0, 0), (C1, 1), (C2, 2), (C3, 3), (C4, 4), (C5, 5));
impl_query_tuple!((C0, 0), (C1, 1), (C2, 2), (C3, 3), (C4, 4), (C5, 5), (C6, 6));
impl_query_tuple!((C0, 0), (C1, 1), (C2, 2), (C3, 3), (C4, 4), (C5, 5), (C6, 6), (C7, 7));

/// One archetype's iteration state: row count, handle column address, and
/// the query's typed row-address tables, all snapshotted under the guard.
struct ArchetypeCursor<Q: Query> {
    id: ArchetypeId,
    len: usize,
    handles: *const Handle,
    query: Q::Cursor,
}

// Cursors are dumb address tables; the guards held by the owning view pin
// the storage they point into, and workers touch disjoint rows.
unsafe impl<Q: Query> Send for ArchetypeCursor<Q> {}
unsafe impl<Q: Query> Sync for ArchetypeCursor<Q> {}

/// A shared-lock guard whose lifetime is erased to `'static`.
///
/// The `Arc` declared after the guard keeps the lock alive; the guard field
/// is declared first so it drops first. The erased lifetime never escapes
/// this module.
struct ReadSlot {
    _guard: RwLockReadGuard<'static, ArchetypeInner>,
    _archetype: Arc<Archetype>,
}

struct WriteSlot {
    _guard: RwLockWriteGuard<'static, ArchetypeInner>,
    _archetype: Arc<Archetype>,
}

/// A window of rows within one archetype of a view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowWindow {
    /// Index of the archetype within the view's snapshot.
    pub(crate) slot: usize,
    /// The archetype the rows belong to.
    pub archetype: ArchetypeId,
    /// First row of the window.
    pub start: usize,
    /// One past the last row of the window.
    pub end: usize,
}

/// A contiguous share of a view, produced by `split`.
///
/// Sub-ranges of one split are pairwise disjoint and cover the view, so
/// each can be consumed by a separate worker without row-level locking.
#[derive(Clone, Debug, Default)]
pub struct SubRange {
    /// The row windows making up this share, in view order.
    pub windows: Vec<RowWindow>,
}

impl SubRange {
    /// Total number of rows in this sub-range.
    pub fn len(&self) -> usize {
        self.windows.iter().map(|window| window.end - window.start).sum()
    }

    /// Returns `true` if this sub-range holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn request_signature<Q: Query>() -> EcsResult<Signature> {
    let ids = Q::component_ids()?;
    let names = Q::component_names();
    let mut signature = Signature::default();
    for (position, &component_id) in ids.iter().enumerate() {
        if signature.has(component_id) {
            return Err(EcsError::DuplicateComponent { name: names[position] });
        }
        signature.set(component_id);
    }
    Ok(signature)
}

fn split_cursors<Q: Query>(cursors: &[ArchetypeCursor<Q>], parts: usize) -> Vec<SubRange> {
    let total: usize = cursors.iter().map(|cursor| cursor.len).sum();
    if total == 0 || parts == 0 {
        return Vec::new();
    }

    let parts = parts.min(total);
    let chunk = (total + parts - 1) / parts;

    let mut ranges = Vec::with_capacity(parts);
    let mut current = SubRange::default();
    let mut room = chunk;

    for (slot, cursor) in cursors.iter().enumerate() {
        let mut start = 0;
        while start < cursor.len {
            let take = room.min(cursor.len - start);
            current.windows.push(RowWindow {
                slot,
                archetype: cursor.id,
                start,
                end: start + take,
            });
            start += take;
            room -= take;
            if room == 0 {
                ranges.push(std::mem::take(&mut current));
                room = chunk;
            }
        }
    }
    if !current.windows.is_empty() {
        ranges.push(current);
    }
    ranges
}

/// Read view over every entity carrying the requested component types.
///
/// Holds a shared lock on each matched archetype for its lifetime, so the
/// registry rejects (sequential mode) or blocks (parallel mode) structural
/// mutation of those archetypes until the view is dropped.
pub struct View<'r, Q: Query> {
    registry: &'r Registry,
    expected_version: u64,
    cursors: Vec<ArchetypeCursor<Q>>,
    _slots: Vec<ReadSlot>,
}

impl<'r, Q: Query> View<'r, Q> {
    pub(crate) fn new(registry: &'r Registry) -> EcsResult<Self> {
        let need = request_signature::<Q>()?;
        let expected_version = registry.archetype_set_version();
        let matched = registry.matching_archetypes(&need)?;

        let mut cursors = Vec::with_capacity(matched.len());
        let mut slots = Vec::with_capacity(matched.len());
        for archetype in matched {
            let guard = registry.lock_read(&archetype)?;
            // The transmute only erases the guard's lifetime; the Arc
            // stored beside it owns the lock and outlives the guard.
            let guard: RwLockReadGuard<'static, ArchetypeInner> =
                unsafe { std::mem::transmute(guard) };
            let inner: &ArchetypeInner = &guard;
            let query = Q::cursor(inner)
                .ok_or(EcsError::Internal("matched archetype lacks a requested column"))?;
            cursors.push(ArchetypeCursor {
                id: archetype.id(),
                len: inner.len(),
                handles: inner.handles().as_ptr(),
                query,
            });
            slots.push(ReadSlot { _guard: guard, _archetype: archetype });
        }

        Ok(Self {
            registry,
            expected_version,
            cursors,
            _slots: slots,
        })
    }

    /// Total number of entities the view covers.
    pub fn len(&self) -> usize {
        self.cursors.iter().map(|cursor| cursor.len).sum()
    }

    /// Returns `true` if the view covers no entities.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates every row, yielding the handle and shared references.
    pub fn iter(&self) -> ViewIter<'_, Q> {
        ViewIter {
            registry: self.registry,
            expected_version: self.expected_version,
            cursors: &self.cursors,
            archetype: 0,
            row: 0,
            invalidated: false,
        }
    }

    /// Partitions the view into up to `parts` disjoint sub-ranges covering
    /// every row.
    pub fn split(&self, parts: usize) -> Vec<SubRange> {
        split_cursors(&self.cursors, parts)
    }

    /// Iterates the rows of one sub-range, yielding shared references.
    pub fn for_each_in<F>(&self, range: &SubRange, mut f: F)
    where
        F: for<'a> FnMut(Handle, Q::Item<'a>),
    {
        for window in &range.windows {
            let cursor = &self.cursors[window.slot];
            for row in window.start..window.end {
                let handle = unsafe { *cursor.handles.add(row) };
                let item = unsafe { Q::item(&cursor.query, row) };
                f(handle, item);
            }
        }
    }

    /// Applies `f` to every row of the view.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: for<'a> FnMut(Handle, Q::Item<'a>),
    {
        for (handle, item) in self.iter() {
            f(handle, item);
        }
    }
}

/// Iterator over a [`View`], yielding `(handle, (&T1, &T2, …))` per row.
///
/// Rows stream in archetype order; the order across archetypes is
/// unspecified but stable within one iteration. If a new archetype is
/// created in the registry mid-iteration the iterator fuses and
/// [`invalidated`](Self::invalidated) reports it.
pub struct ViewIter<'v, Q: Query> {
    registry: &'v Registry,
    expected_version: u64,
    cursors: &'v [ArchetypeCursor<Q>],
    archetype: usize,
    row: usize,
    invalidated: bool,
}

impl<'v, Q: Query> ViewIter<'v, Q> {
    /// Returns `true` if iteration halted because the registry's archetype
    /// set changed underneath it.
    pub fn invalidated(&self) -> bool {
        self.invalidated
    }
}

impl<'v, Q: Query> Iterator for ViewIter<'v, Q> {
    type Item = (Handle, Q::Item<'v>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.invalidated {
            return None;
        }
        if self.registry.archetype_set_version() != self.expected_version {
            self.invalidated = true;
            return None;
        }

        while self.archetype < self.cursors.len() {
            let cursor = &self.cursors[self.archetype];
            if self.row < cursor.len {
                let row = self.row;
                self.row += 1;
                let handle = unsafe { *cursor.handles.add(row) };
                let item = unsafe { Q::item(&cursor.query, row) };
                return Some((handle, item));
            }
            self.archetype += 1;
            self.row = 0;
        }
        None
    }
}

/// Write view over every entity carrying the requested component types.
///
/// Holds an exclusive lock on each matched archetype for its lifetime, so
/// no other view or registry operation can touch them until it is dropped.
pub struct ViewMut<'r, Q: Query> {
    registry: &'r Registry,
    expected_version: u64,
    cursors: Vec<ArchetypeCursor<Q>>,
    _slots: Vec<WriteSlot>,
}

impl<'r, Q: Query> ViewMut<'r, Q> {
    pub(crate) fn new(registry: &'r Registry) -> EcsResult<Self> {
        let need = request_signature::<Q>()?;
        let expected_version = registry.archetype_set_version();
        let matched = registry.matching_archetypes(&need)?;

        let mut cursors = Vec::with_capacity(matched.len());
        let mut slots = Vec::with_capacity(matched.len());
        for archetype in matched {
            let guard = registry.lock_write(&archetype)?;
            // Lifetime-erased exactly as in `View::new`.
            let mut guard: RwLockWriteGuard<'static, ArchetypeInner> =
                unsafe { std::mem::transmute(guard) };
            let inner: &mut ArchetypeInner = &mut guard;
            let len = inner.len();
            let handles = inner.handles().as_ptr();
            let query = Q::cursor_mut(inner)
                .ok_or(EcsError::Internal("matched archetype lacks a requested column"))?;
            cursors.push(ArchetypeCursor { id: archetype.id(), len, handles, query });
            slots.push(WriteSlot { _guard: guard, _archetype: archetype });
        }

        Ok(Self {
            registry,
            expected_version,
            cursors,
            _slots: slots,
        })
    }

    /// Total number of entities the view covers.
    pub fn len(&self) -> usize {
        self.cursors.iter().map(|cursor| cursor.len).sum()
    }

    /// Returns `true` if the view covers no entities.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates every row, yielding the handle and mutable references.
    pub fn iter_mut(&mut self) -> ViewIterMut<'_, Q> {
        ViewIterMut {
            registry: self.registry,
            expected_version: self.expected_version,
            cursors: &self.cursors,
            archetype: 0,
            row: 0,
            invalidated: false,
        }
    }

    /// Partitions the view into up to `parts` disjoint sub-ranges covering
    /// every row.
    pub fn split(&self, parts: usize) -> Vec<SubRange> {
        split_cursors(&self.cursors, parts)
    }

    /// Applies `f` to every row of the view with mutable access.
    pub fn for_each<F>(&mut self, mut f: F)
    where
        F: for<'a> FnMut(Handle, Q::ItemMut<'a>),
    {
        for (handle, item) in self.iter_mut() {
            f(handle, item);
        }
    }

    /// Applies `f` to the rows of one sub-range with mutable access.
    ///
    /// Distinct sub-ranges of one `split` touch disjoint rows, so callers
    /// driving them from separate workers need no further synchronization.
    pub fn for_each_in<F>(&mut self, range: &SubRange, mut f: F)
    where
        F: for<'a> FnMut(Handle, Q::ItemMut<'a>),
    {
        for window in &range.windows {
            let cursor = &self.cursors[window.slot];
            for row in window.start..window.end {
                let handle = unsafe { *cursor.handles.add(row) };
                let item = unsafe { Q::item_mut(&cursor.query, row) };
                f(handle, item);
            }
        }
    }

    /// Splits the view into up to `workers` sub-ranges and drives them on
    /// the rayon thread pool. Writes through the yielded references touch
    /// disjoint rows and never conflict.
    pub fn par_for_each<F>(&mut self, workers: usize, f: F)
    where
        F: for<'a> Fn(Handle, Q::ItemMut<'a>) + Send + Sync,
    {
        let ranges = self.split(workers.max(1));
        let cursors = &self.cursors;
        let f = &f;

        rayon::scope(|scope| {
            for range in ranges {
                scope.spawn(move |_| {
                    for window in &range.windows {
                        let cursor = &cursors[window.slot];
                        for row in window.start..window.end {
                            let handle = unsafe { *cursor.handles.add(row) };
                            let item = unsafe { Q::item_mut(&cursor.query, row) };
                            f(handle, item);
                        }
                    }
                });
            }
        });
    }
}

/// Iterator over a [`ViewMut`], yielding `(handle, (&mut T1, …))` per row.
pub struct ViewIterMut<'v, Q: Query> {
    registry: &'v Registry,
    expected_version: u64,
    cursors: &'v [ArchetypeCursor<Q>],
    archetype: usize,
    row: usize,
    invalidated: bool,
}

impl<'v, Q: Query> ViewIterMut<'v, Q> {
    /// Returns `true` if iteration halted because the registry's archetype
    /// set changed underneath it.
    pub fn invalidated(&self) -> bool {
        self.invalidated
    }
}

impl<'v, Q: Query> Iterator for ViewIterMut<'v, Q> {
    type Item = (Handle, Q::ItemMut<'v>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.invalidated {
            return None;
        }
        if self.registry.archetype_set_version() != self.expected_version {
            self.invalidated = true;
            return None;
        }

        while self.archetype < self.cursors.len() {
            let cursor = &self.cursors[self.archetype];
            if self.row < cursor.len {
                let row = self.row;
                self.row += 1;
                let handle = unsafe { *cursor.handles.add(row) };
                // Each row is yielded exactly once, so the mutable
                // references handed out by successive calls never alias.
                let item = unsafe { Q::item_mut(&cursor.query, row) };
                return Some((handle, item));
            }
            self.archetype += 1;
            self.row = 0;
        }
        None
    }
}
