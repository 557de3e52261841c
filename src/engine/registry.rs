//! The registry: entity CRUD, archetype lookup, and migration.
//!
//! A [`Registry`] owns the slot map and the set of archetypes keyed by
//! component type set, and orchestrates every public operation: `create`,
//! `get`/`fetch`, `put`, `remove`, `erase`, `types`, and view construction.
//!
//! ## Locking discipline
//! - Mutations take the affected archetype's lock exclusive; reads take it
//!   shared. Migration locks both archetypes exclusive, acquired in
//!   ascending archetype-id order to prevent deadlock, with the slot-map
//!   lock taken last.
//! - Readers never hold a slot-map guard while acquiring an archetype
//!   guard. They read the slot, drop the guard, lock the archetype, and
//!   re-validate the handle against the handle column, retrying if a
//!   migration won the race. The slot-map update is therefore the single
//!   commit point deciding an entity's authoritative location.
//! - In `Sequential` mode every archetype-lock acquisition uses the
//!   non-blocking path; a structural call while a view holds the archetype
//!   fails with [`EcsError::IterationActive`] instead of deadlocking. In
//!   `Parallel` mode acquisition blocks, unboundedly, like any lock wait.
//! - No lock is ever held across user code.

use std::any::type_name;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use crate::engine::archetype::{move_row, Archetype, ArchetypeInner};
use crate::engine::component::{
    BundleEntry, ComponentBundle, ComponentFetch, ComponentSet, component_id_of,
};
use crate::engine::error::{EcsError, EcsResult};
use crate::engine::handle::{EntityLocation, Handle, SlotPartitions};
use crate::engine::storage::ColumnOps;
use crate::engine::types::{ArchetypeId, ComponentId, RowIndex, Signature, SignatureKey};
use crate::engine::view::{Query, View, ViewMut};

/// Threading model of a registry, selected at construction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RegistryMode {
    /// Single-threaded use. Lock acquisition never blocks; a structural
    /// mutation attempted while a view is live fails with
    /// [`EcsError::IterationActive`].
    Sequential,

    /// Multi-threaded use. Lock acquisition blocks until the holder
    /// releases; lock waits are unbounded.
    Parallel,
}

/// Construction-time configuration for a [`Registry`].
#[derive(Clone, Copy, Debug)]
pub struct RegistryConfig {
    /// Threading model. Defaults to [`RegistryMode::Sequential`].
    pub mode: RegistryMode,

    /// Row capacity reserved in every column of a freshly created
    /// archetype. Defaults to 1024.
    pub initial_archetype_capacity: usize,

    /// Base-2 logarithm of the column segment size, in rows. Defaults to
    /// 10 (1024 rows per segment).
    pub segment_size_log2: u32,

    /// Number of slot-map partitions. Defaults to 1.
    pub slot_map_partitions: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            mode: RegistryMode::Sequential,
            initial_archetype_capacity: 1024,
            segment_size_log2: 10,
            slot_map_partitions: 1,
        }
    }
}

struct ArchetypeSet {
    list: Vec<Arc<Archetype>>,
    by_signature: HashMap<SignatureKey, ArchetypeId>,
}

/// In-process entity storage: a slot map plus archetypes keyed by component
/// type set.
///
/// All methods take `&self`; interior locks make a `Parallel`-mode registry
/// safe to share across threads. Independent registries are fully isolated
/// worlds.
pub struct Registry {
    config: RegistryConfig,
    slots: SlotPartitions,
    archetypes: RwLock<ArchetypeSet>,
    set_version: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl Registry {
    /// Creates an empty registry with the given configuration.
    ///
    /// ## Panics
    /// Panics if `segment_size_log2` exceeds 31 or `slot_map_partitions` is
    /// zero or beyond the partition-id space.
    pub fn new(config: RegistryConfig) -> Self {
        assert!(config.segment_size_log2 < 32);
        Self {
            config,
            slots: SlotPartitions::new(config.slot_map_partitions),
            archetypes: RwLock::new(ArchetypeSet {
                list: Vec::new(),
                by_signature: HashMap::new(),
            }),
            set_version: AtomicU64::new(0),
        }
    }

    /// The configuration this registry was built with.
    #[inline]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no entities are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `handle` addresses a live entity.
    pub fn exists(&self, handle: Handle) -> bool {
        self.slots.contains(handle)
    }

    // ── lock helpers ────────────────────────────────────────────────────

    pub(crate) fn lock_read<'a>(
        &self,
        archetype: &'a Archetype,
    ) -> EcsResult<RwLockReadGuard<'a, ArchetypeInner>> {
        match self.config.mode {
            RegistryMode::Parallel => {
                archetype.lock().read().map_err(|_| EcsError::PoisonedLock)
            }
            RegistryMode::Sequential => match archetype.lock().try_read() {
                Ok(guard) => Ok(guard),
                Err(TryLockError::Poisoned(_)) => Err(EcsError::PoisonedLock),
                Err(TryLockError::WouldBlock) => Err(EcsError::IterationActive),
            },
        }
    }

    pub(crate) fn lock_write<'a>(
        &self,
        archetype: &'a Archetype,
    ) -> EcsResult<RwLockWriteGuard<'a, ArchetypeInner>> {
        match self.config.mode {
            RegistryMode::Parallel => {
                archetype.lock().write().map_err(|_| EcsError::PoisonedLock)
            }
            RegistryMode::Sequential => match archetype.lock().try_write() {
                Ok(guard) => Ok(guard),
                Err(TryLockError::Poisoned(_)) => Err(EcsError::PoisonedLock),
                Err(TryLockError::WouldBlock) => Err(EcsError::IterationActive),
            },
        }
    }

    // ── archetype lookup ────────────────────────────────────────────────

    fn archetype_by_id(&self, id: ArchetypeId) -> EcsResult<Arc<Archetype>> {
        let set = self.archetypes.read().map_err(|_| EcsError::PoisonedLock)?;
        set.list
            .get(id as usize)
            .cloned()
            .ok_or(EcsError::Internal("slot map references an unknown archetype"))
    }

    /// Finds the archetype for `signature`, creating it (with columns from
    /// `build`) on first need. Newly created archetypes bump the set
    /// version, which view iterators watch for staleness.
    fn get_or_create_with<F>(&self, signature: Signature, build: F) -> EcsResult<Arc<Archetype>>
    where
        F: FnOnce(u32) -> EcsResult<Vec<(ComponentId, Box<dyn ColumnOps>)>>,
    {
        {
            let set = self.archetypes.read().map_err(|_| EcsError::PoisonedLock)?;
            if let Some(&id) = set.by_signature.get(&signature.words) {
                return Ok(Arc::clone(&set.list[id as usize]));
            }
        }

        // Built outside the write lock; discarded if another thread wins.
        let columns = build(self.config.segment_size_log2)?;

        let mut set = self.archetypes.write().map_err(|_| EcsError::PoisonedLock)?;
        if let Some(&id) = set.by_signature.get(&signature.words) {
            return Ok(Arc::clone(&set.list[id as usize]));
        }

        let id = set.list.len() as ArchetypeId;
        let archetype = Arc::new(Archetype::new(
            id,
            signature,
            columns,
            self.config.initial_archetype_capacity,
        ));
        set.list.push(Arc::clone(&archetype));
        set.by_signature.insert(signature.words, id);
        self.set_version.fetch_add(1, Ordering::Release);
        Ok(archetype)
    }

    /// Archetypes whose type set is a superset of `need`, in id order.
    pub(crate) fn matching_archetypes(&self, need: &Signature) -> EcsResult<Vec<Arc<Archetype>>> {
        let set = self.archetypes.read().map_err(|_| EcsError::PoisonedLock)?;
        Ok(set
            .list
            .iter()
            .filter(|archetype| archetype.matches(need))
            .cloned()
            .collect())
    }

    /// Monotone counter bumped whenever a new archetype is created.
    pub(crate) fn archetype_set_version(&self) -> u64 {
        self.set_version.load(Ordering::Acquire)
    }

    fn distinct_signature(entries: &[BundleEntry]) -> EcsResult<Signature> {
        let mut signature = Signature::default();
        for entry in entries {
            if signature.has(entry.id) {
                return Err(EcsError::DuplicateComponent { name: entry.name });
            }
            signature.set(entry.id);
        }
        Ok(signature)
    }

    // ── entity CRUD ─────────────────────────────────────────────────────

    /// Creates an entity from a tuple of distinct component values and
    /// returns its handle.
    ///
    /// The archetype for the bundle's type set is created lazily on first
    /// need. The handle is allocated with a placeholder location and
    /// patched once the row lands, so a failure midway never leaves a live
    /// slot pointing at a missing row.
    pub fn create<B: ComponentBundle>(&self, bundle: B) -> EcsResult<Handle> {
        let entries = B::entries()?;
        let signature = Self::distinct_signature(&entries)?;
        let archetype = self.get_or_create_with(signature, |segment_log2| {
            Ok(entries
                .iter()
                .map(|entry| (entry.id, (entry.seed)(segment_log2)))
                .collect())
        })?;

        let values = bundle.into_values()?;
        let mut inner = self.lock_write(&archetype)?;
        let handle = self.slots.insert(EntityLocation {
            archetype: archetype.id(),
            row: RowIndex::MAX,
        })?;

        match inner.push_row(handle, values) {
            Ok((row, grew)) => {
                self.slots
                    .set_location(handle, EntityLocation { archetype: archetype.id(), row })?;
                drop(inner);
                if grew {
                    archetype.bump_revision();
                }
                Ok(handle)
            }
            Err(error) => {
                drop(inner);
                let _ = self.slots.erase(handle);
                Err(error)
            }
        }
    }

    /// Returns a copy of the entity's component of type `T`.
    ///
    /// Fails with `StaleHandle` if the entity was erased, or
    /// `MissingComponent` if it does not carry `T`.
    pub fn get<T: 'static + Send + Sync + Clone>(&self, handle: Handle) -> EcsResult<T> {
        let component_id = component_id_of::<T>()?;
        loop {
            let location = self.slots.get(handle).ok_or(EcsError::StaleHandle)?;
            let archetype = self.archetype_by_id(location.archetype)?;
            let inner = self.lock_read(&archetype)?;
            if inner.handle_at(location.row as usize) != Some(handle) {
                continue; // migrated between the slot read and the lock
            }
            let value = inner
                .value_ref::<T>(component_id, location.row)
                .ok_or(EcsError::MissingComponent { name: type_name::<T>() })?;
            return Ok(value.clone());
        }
    }

    /// Returns copies of several components at once, e.g.
    /// `registry.fetch::<(Position, Velocity)>(handle)`.
    pub fn fetch<Q: ComponentFetch>(&self, handle: Handle) -> EcsResult<Q::Output> {
        loop {
            let location = self.slots.get(handle).ok_or(EcsError::StaleHandle)?;
            let archetype = self.archetype_by_id(location.archetype)?;
            let inner = self.lock_read(&archetype)?;
            if inner.handle_at(location.row as usize) != Some(handle) {
                continue;
            }
            return Q::fetch(&inner, location.row);
        }
    }

    /// Returns `true` if the entity is live and carries a component of
    /// type `T`.
    pub fn has<T: 'static + Send + Sync>(&self, handle: Handle) -> bool {
        let Ok(component_id) = component_id_of::<T>() else {
            return false;
        };
        let Some(location) = self.slots.get(handle) else {
            return false;
        };
        match self.archetype_by_id(location.archetype) {
            Ok(archetype) => archetype.signature().has(component_id),
            Err(_) => false,
        }
    }

    /// The entity's component type ids, in ascending id order.
    pub fn types(&self, handle: Handle) -> EcsResult<Vec<ComponentId>> {
        loop {
            let location = self.slots.get(handle).ok_or(EcsError::StaleHandle)?;
            let archetype = self.archetype_by_id(location.archetype)?;
            let inner = self.lock_read(&archetype)?;
            if inner.handle_at(location.row as usize) != Some(handle) {
                continue;
            }
            return Ok(archetype.signature().iter().collect());
        }
    }

    /// Writes a tuple of distinct component values onto an entity.
    ///
    /// Types the entity already carries are overwritten in place (O(1));
    /// any new type triggers a migration to the archetype for the union
    /// type set, moving every retained component value exactly once.
    pub fn put<B: ComponentBundle>(&self, handle: Handle, bundle: B) -> EcsResult<()> {
        let entries = B::entries()?;
        let provided = Self::distinct_signature(&entries)?;
        let mut values = Some(bundle.into_values()?);

        loop {
            let location = self.slots.get(handle).ok_or(EcsError::StaleHandle)?;
            let source = self.archetype_by_id(location.archetype)?;

            if source.signature().contains_all(&provided) {
                let mut inner = self.lock_write(&source)?;
                if inner.handle_at(location.row as usize) != Some(handle) {
                    continue;
                }
                let values = values
                    .take()
                    .ok_or(EcsError::Internal("put consumed its values twice"))?;
                for (component_id, value) in values {
                    inner.write_value(component_id, location.row, value)?;
                }
                return Ok(());
            }

            let mut target_signature = *source.signature();
            for entry in &entries {
                target_signature.set(entry.id);
            }

            let target = self.get_or_create_with(target_signature, |segment_log2| {
                let mut columns: Vec<(ComponentId, Box<dyn ColumnOps>)> = entries
                    .iter()
                    .map(|entry| (entry.id, (entry.seed)(segment_log2)))
                    .collect();
                let inner = self.lock_read(&source)?;
                for component_id in source.signature().iter() {
                    if !provided.has(component_id) {
                        let column = inner
                            .column(component_id)
                            .ok_or(EcsError::Internal("signature lists an absent column"))?;
                        columns.push((component_id, column.clone_empty()));
                    }
                }
                Ok(columns)
            })?;

            let (mut source_inner, mut target_inner) = self.lock_pair(&source, &target)?;
            if source_inner.handle_at(location.row as usize) != Some(handle) {
                continue;
            }

            let added = values
                .take()
                .ok_or(EcsError::Internal("put consumed its values twice"))?;
            let (new_row, backfilled) = move_row(
                &mut source_inner,
                source.signature(),
                &mut target_inner,
                target.signature(),
                location.row,
                handle,
                added,
            )?;

            if let Some(moved) = backfilled {
                self.slots.set_location(
                    moved,
                    EntityLocation { archetype: source.id(), row: location.row },
                )?;
            }
            self.slots
                .set_location(handle, EntityLocation { archetype: target.id(), row: new_row })?;

            drop(source_inner);
            drop(target_inner);
            source.bump_revision();
            target.bump_revision();
            return Ok(());
        }
    }

    /// Removes a tuple of component types from an entity, destructing their
    /// values and migrating the remainder to the archetype for the
    /// difference type set.
    ///
    /// Removing the final component leaves the entity alive in the empty
    /// archetype; its handle stays valid until `erase`.
    pub fn remove<S: ComponentSet>(&self, handle: Handle) -> EcsResult<()> {
        let ids = S::component_ids()?;
        let names = S::component_names();

        let mut removed = Signature::default();
        for (position, &component_id) in ids.iter().enumerate() {
            if removed.has(component_id) {
                return Err(EcsError::DuplicateComponent { name: names[position] });
            }
            removed.set(component_id);
        }

        loop {
            let location = self.slots.get(handle).ok_or(EcsError::StaleHandle)?;
            let source = self.archetype_by_id(location.archetype)?;

            for (position, &component_id) in ids.iter().enumerate() {
                if !source.signature().has(component_id) {
                    return Err(EcsError::MissingComponent { name: names[position] });
                }
            }

            let mut target_signature = *source.signature();
            for &component_id in &ids {
                target_signature.clear(component_id);
            }

            let target = self.get_or_create_with(target_signature, |_| {
                let inner = self.lock_read(&source)?;
                let mut columns = Vec::new();
                for component_id in target_signature.iter() {
                    let column = inner
                        .column(component_id)
                        .ok_or(EcsError::Internal("signature lists an absent column"))?;
                    columns.push((component_id, column.clone_empty()));
                }
                Ok(columns)
            })?;

            let (mut source_inner, mut target_inner) = self.lock_pair(&source, &target)?;
            if source_inner.handle_at(location.row as usize) != Some(handle) {
                continue;
            }

            let (new_row, backfilled) = move_row(
                &mut source_inner,
                source.signature(),
                &mut target_inner,
                target.signature(),
                location.row,
                handle,
                Vec::new(),
            )?;

            if let Some(moved) = backfilled {
                self.slots.set_location(
                    moved,
                    EntityLocation { archetype: source.id(), row: location.row },
                )?;
            }
            self.slots
                .set_location(handle, EntityLocation { archetype: target.id(), row: new_row })?;

            drop(source_inner);
            drop(target_inner);
            source.bump_revision();
            target.bump_revision();
            return Ok(());
        }
    }

    /// Erases an entity, invalidating every copy of its handle.
    ///
    /// The row is swap-erased; if another entity backfills the hole, its
    /// slot is reindexed in the same critical section. A second erase on
    /// the same handle fails with `StaleHandle`.
    pub fn erase(&self, handle: Handle) -> EcsResult<()> {
        loop {
            let location = self.slots.get(handle).ok_or(EcsError::StaleHandle)?;
            let archetype = self.archetype_by_id(location.archetype)?;
            let mut inner = self.lock_write(&archetype)?;
            if inner.handle_at(location.row as usize) != Some(handle) {
                continue;
            }

            let backfilled = inner.erase_row(location.row);
            let erased = self.slots.erase(handle)?;
            debug_assert!(erased.is_some(), "validated handle vanished from the slot map");
            if let Some(moved) = backfilled {
                self.slots.set_location(
                    moved,
                    EntityLocation { archetype: archetype.id(), row: location.row },
                )?;
            }

            drop(inner);
            archetype.bump_revision();
            return Ok(());
        }
    }

    /// Erases every entity. Archetypes persist, empty, and all outstanding
    /// handles become stale.
    pub fn clear(&self) -> EcsResult<()> {
        let list: Vec<Arc<Archetype>> = {
            let set = self.archetypes.read().map_err(|_| EcsError::PoisonedLock)?;
            set.list.clone()
        };

        for archetype in &list {
            let mut inner = self.lock_write(archetype)?;
            inner.clear();
            drop(inner);
            archetype.bump_revision();
        }

        self.slots.clear()
    }

    /// Locks two distinct archetypes exclusive, in ascending id order.
    fn lock_pair<'a>(
        &self,
        source: &'a Archetype,
        target: &'a Archetype,
    ) -> EcsResult<(
        RwLockWriteGuard<'a, ArchetypeInner>,
        RwLockWriteGuard<'a, ArchetypeInner>,
    )> {
        debug_assert_ne!(source.id(), target.id());
        if source.id() < target.id() {
            let source_guard = self.lock_write(source)?;
            let target_guard = self.lock_write(target)?;
            Ok((source_guard, target_guard))
        } else {
            let target_guard = self.lock_write(target)?;
            let source_guard = self.lock_write(source)?;
            Ok((source_guard, target_guard))
        }
    }

    // ── views ───────────────────────────────────────────────────────────

    /// Builds a read view over every entity carrying all of `Q`'s component
    /// types. The view holds a shared lock on each matched archetype for
    /// its lifetime.
    pub fn view<Q: Query>(&self) -> EcsResult<View<'_, Q>> {
        View::new(self)
    }

    /// Builds a write view over every entity carrying all of `Q`'s
    /// component types. The view holds an exclusive lock on each matched
    /// archetype for its lifetime.
    pub fn view_mut<Q: Query>(&self) -> EcsResult<ViewMut<'_, Q>> {
        ViewMut::new(self)
    }
}
