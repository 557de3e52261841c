//! Entity handles and the generational slot map.
//!
//! ## Purpose
//! Entities are addressed by lightweight, opaque handles that stay stable
//! while archetype rows move underneath them. This module is responsible
//! for:
//!
//! - Generating packed, versioned handle values
//! - Tracking entity liveness via generation counters
//! - Mapping handles to `(archetype, row)` storage locations
//! - Scaling allocation across independent slot-map partitions
//!
//! ## Handle model
//! A [`Handle`] packs three fields into a single 64-bit value:
//!
//! - A **slot index**, identifying the slot within a partition
//! - A **partition id**, identifying which partition owns the slot
//! - A **generation**, incremented on each erase to invalidate stale copies
//!
//! Generations start at 1 and wrap back to 1, never 0, so the all-zero
//! handle value is reserved and permanently invalid. A handle dereferences
//! successfully only while its generation matches the slot's current
//! generation; a handle that outlives 2^32 erase/reuse cycles at its own
//! slot is undefined.
//!
//! ## Partitioning
//! Slots are distributed across one or more partitions (configurable at
//! registry construction) to reduce contention during concurrent insert and
//! erase. Each partition has its own shared/exclusive lock and a relaxed
//! atomic live counter, so `len` and existence checks never serialize
//! against each other.
//!
//! ## Invariants
//! - A slot is occupied if and only if it is not on the free list.
//! - An occupied slot's location always reflects the entity's actual
//!   archetype row; it is updated in the same critical section as the row
//!   move that displaced it.
//! - Free slots keep their (already bumped) generation, so every handle
//!   issued for a reused slot compares unequal to all prior holders.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockWriteGuard};

use crate::engine::error::{CapacityError, EcsError, EcsResult, PartitionBoundsError};
use crate::engine::types::{
    ArchetypeId, Generation, HandleBits, PartitionId, RowIndex, SlotIndex, GENERATION_BITS,
    INDEX_BITS, INDEX_CAP, INDEX_MASK, PARTITION_BITS, PARTITION_CAP, PARTITION_MASK,
};

/// Rows-per-block used when a partition grows its slot storage.
const SLOT_GROWTH: usize = 1024;

/// Opaque, generation-validated identifier for a live entity.
///
/// ## Representation
/// Packs `generation | partition | index` into one `u64`. Two handles
/// compare equal iff all three fields match. Handles are cheap to copy,
/// hash, and send across threads.
///
/// ## Invariants
/// - The all-zero value is reserved and never identifies a live entity.
/// - Two handles for the same `(partition, index)` with different
///   generations are distinct; at most one of them is live.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Handle(pub HandleBits);

#[inline]
const fn pack(partition: PartitionId, index: SlotIndex, generation: Generation) -> HandleBits {
    ((generation as HandleBits) << (PARTITION_BITS + INDEX_BITS))
        | ((partition as HandleBits) << INDEX_BITS)
        | (index as HandleBits)
}

#[inline]
fn make_handle(partition: PartitionId, index: SlotIndex, generation: Generation) -> Handle {
    debug_assert!((index as HandleBits) <= INDEX_MASK);
    debug_assert!((partition as HandleBits) <= PARTITION_MASK);
    debug_assert!(generation != 0);
    Handle(pack(partition, index, generation))
}

#[inline]
const fn split_handle(handle: Handle) -> (PartitionId, SlotIndex, Generation) {
    let bits = handle.0;
    let partition = ((bits >> INDEX_BITS) & PARTITION_MASK) as PartitionId;
    let index = (bits & INDEX_MASK) as SlotIndex;
    let generation = (bits >> (INDEX_BITS + PARTITION_BITS)) as Generation;
    (partition, index, generation)
}

impl Handle {
    /// The reserved invalid handle. Never identifies a live entity.
    pub const INVALID: Handle = Handle(0);

    /// Returns the `(partition, index, generation)` fields of this handle.
    #[inline]
    pub fn fields(self) -> (PartitionId, SlotIndex, Generation) {
        split_handle(self)
    }

    /// Returns the partition identifier encoded in this handle.
    #[inline]
    pub fn partition(self) -> PartitionId {
        ((self.0 >> INDEX_BITS) & PARTITION_MASK) as PartitionId
    }

    /// Returns the slot index encoded in this handle.
    #[inline]
    pub fn index(self) -> SlotIndex {
        (self.0 & INDEX_MASK) as SlotIndex
    }

    /// Returns the generation encoded in this handle.
    #[inline]
    pub fn generation(self) -> Generation {
        (self.0 >> (INDEX_BITS + PARTITION_BITS)) as Generation
    }

    /// Returns `true` if this is the reserved invalid handle.
    #[inline]
    pub fn is_invalid(self) -> bool {
        self.0 == 0
    }
}

const _: [(); 1] = [(); (GENERATION_BITS == 32) as usize];

#[inline]
fn next_generation(generation: Generation) -> Generation {
    // Zero is reserved for the invalid handle; wrap skips it.
    let next = generation.wrapping_add(1);
    if next == 0 { 1 } else { next }
}

/// Physical storage location of an entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityLocation {
    /// Archetype containing the entity's row.
    pub archetype: ArchetypeId,

    /// Row index within the archetype.
    pub row: RowIndex,
}

/// Partition-local slot pool.
///
/// ## Design
/// - Slots are allocated from a free list of indices, growing in blocks.
/// - Generations are bumped on erase to invalidate stale handles.
/// - Storage is dense and index-addressable.
///
/// ## Invariants
/// - `generations.len() == occupied.len() == locations.len()`.
/// - If `occupied[i]` is `true`, then `locations[i]` is valid.
/// - Free indices always refer to unoccupied slots.
///
/// ## Concurrency
/// Not thread-safe; protected by the owning partition's `RwLock`.
#[derive(Default)]
pub struct SlotPool {
    generations: Vec<Generation>,
    free: Vec<SlotIndex>,
    occupied: Vec<bool>,
    locations: Vec<EntityLocation>,
}

impl SlotPool {
    fn grow(&mut self, additional: usize) -> Result<(), CapacityError> {
        if additional == 0 {
            return Ok(());
        }

        let current = self.generations.len() as u64;
        let wanted = current + additional as u64;
        let capacity = INDEX_CAP as u64 + 1;
        if wanted > capacity {
            return Err(CapacityError { slots_needed: wanted, capacity });
        }

        self.generations.resize(wanted as usize, 1);
        self.occupied.resize(wanted as usize, false);
        self.locations.resize(wanted as usize, EntityLocation::default());

        for index in current..wanted {
            self.free.push(index as SlotIndex);
        }
        Ok(())
    }

    /// Allocates a slot and records its initial location.
    ///
    /// Reuses a free slot when one exists, otherwise grows storage by a
    /// block. The returned handle carries the slot's current generation,
    /// which is unchanged from the previous occupant's erase.
    fn insert(
        &mut self,
        partition: PartitionId,
        location: EntityLocation,
    ) -> Result<Handle, CapacityError> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.grow(SLOT_GROWTH)?;
                match self.free.pop() {
                    Some(index) => index,
                    None => {
                        let slots_needed = (self.generations.len() as u64).saturating_add(1);
                        let capacity = (INDEX_CAP as u64).saturating_add(1);
                        return Err(CapacityError { slots_needed, capacity });
                    }
                }
            }
        };

        let generation = self.generations[index as usize];
        self.occupied[index as usize] = true;
        self.locations[index as usize] = location;

        Ok(make_handle(partition, index, generation))
    }

    /// Erases the slot addressed by `handle`, invalidating every copy of it.
    ///
    /// Bumps the slot's generation (skipping zero) and returns the slot to
    /// the free list. Returns the stored location if the handle was live.
    fn erase(&mut self, handle: Handle) -> Option<EntityLocation> {
        let (_, index, generation) = split_handle(handle);
        let slot = index as usize;
        match self.generations.get_mut(slot) {
            Some(live)
                if *live == generation && self.occupied.get(slot).copied().unwrap_or(false) =>
            {
                *live = next_generation(*live);
                self.occupied[slot] = false;
                let location = self.locations[slot];
                self.locations[slot] = EntityLocation::default();
                self.free.push(index);
                Some(location)
            }
            _ => None,
        }
    }

    /// Returns `true` if the handle addresses a live slot.
    fn contains(&self, handle: Handle) -> bool {
        let (_, index, generation) = split_handle(handle);
        let slot = index as usize;
        slot < self.generations.len()
            && self.occupied.get(slot).copied().unwrap_or(false)
            && self.generations[slot] == generation
    }

    /// Returns the stored location, if the handle is live.
    fn get(&self, handle: Handle) -> Option<EntityLocation> {
        let (_, index, _) = split_handle(handle);
        if self.contains(handle) {
            Some(self.locations[index as usize])
        } else {
            None
        }
    }

    /// Updates the stored location for a live handle.
    fn set_location(&mut self, handle: Handle, location: EntityLocation) {
        let (_, index, _) = split_handle(handle);
        debug_assert!(
            self.contains(handle),
            "set_location on a dead or stale handle: {:?} -> {:?}",
            handle,
            location
        );
        if (index as usize) < self.locations.len() {
            self.locations[index as usize] = location;
        }
    }

    /// Erases every occupied slot, bumping its generation.
    fn clear(&mut self) -> usize {
        let mut erased = 0;
        for slot in 0..self.occupied.len() {
            if self.occupied[slot] {
                self.occupied[slot] = false;
                self.generations[slot] = next_generation(self.generations[slot]);
                self.locations[slot] = EntityLocation::default();
                self.free.push(slot as SlotIndex);
                erased += 1;
            }
        }
        erased
    }
}

struct Partition {
    pool: RwLock<SlotPool>,
    live: AtomicU32,
}

impl Partition {
    fn new() -> Self {
        Self { pool: RwLock::new(SlotPool::default()), live: AtomicU32::new(0) }
    }
}

/// Partitioned slot map.
///
/// Routes operations to the partition encoded in each handle; new entities
/// are assigned partitions round-robin. Public methods are thread-safe.
pub struct SlotPartitions {
    partitions: Vec<Partition>,
    cursor: AtomicUsize,
}

impl SlotPartitions {
    /// Creates a slot map with `count` partitions.
    ///
    /// ## Panics
    /// Panics if `count` is zero or exceeds the partition-id space.
    pub fn new(count: usize) -> Self {
        assert!(count > 0 && count <= PARTITION_CAP);
        let mut partitions = Vec::with_capacity(count);
        for _ in 0..count {
            partitions.push(Partition::new());
        }
        Self { partitions, cursor: AtomicUsize::new(0) }
    }

    /// Number of partitions.
    #[inline]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Total number of live entities across all partitions.
    pub fn len(&self) -> usize {
        self.partitions
            .iter()
            .map(|partition| partition.live.load(Ordering::Relaxed) as usize)
            .sum()
    }

    fn partition(&self, id: PartitionId) -> EcsResult<&Partition> {
        self.partitions.get(id as usize).ok_or_else(|| {
            EcsError::PartitionBounds(PartitionBoundsError {
                index: id,
                max_index: self.partitions.len().saturating_sub(1) as u32,
            })
        })
    }

    fn write_pool(&self, id: PartitionId) -> EcsResult<RwLockWriteGuard<'_, SlotPool>> {
        self.partition(id)?
            .pool
            .write()
            .map_err(|_| EcsError::PoisonedLock)
    }

    /// Allocates a handle in the next partition (round-robin).
    pub fn insert(&self, location: EntityLocation) -> EcsResult<Handle> {
        let id = (self.cursor.fetch_add(1, Ordering::Relaxed) % self.partitions.len())
            as PartitionId;
        let partition = self.partition(id)?;

        let handle = {
            let mut pool = partition.pool.write().map_err(|_| EcsError::PoisonedLock)?;
            pool.insert(id, location)?
        };

        partition.live.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    /// Returns `true` if the handle addresses a live entity.
    pub fn contains(&self, handle: Handle) -> bool {
        if handle.is_invalid() {
            return false;
        }
        let id = handle.partition() as usize;
        if id >= self.partitions.len() {
            return false;
        }
        match self.partitions[id].pool.read() {
            Ok(pool) => pool.contains(handle),
            Err(_) => false,
        }
    }

    /// Returns the location of a live entity.
    pub fn get(&self, handle: Handle) -> Option<EntityLocation> {
        if handle.is_invalid() {
            return None;
        }
        let id = handle.partition() as usize;
        if id >= self.partitions.len() {
            return None;
        }
        match self.partitions[id].pool.read() {
            Ok(pool) => pool.get(handle),
            Err(_) => None,
        }
    }

    /// Updates the location for a live handle.
    ///
    /// Callers must ensure the handle is live and the location matches the
    /// row move that prompted the update.
    pub fn set_location(&self, handle: Handle, location: EntityLocation) -> EcsResult<()> {
        let mut pool = self.write_pool(handle.partition())?;
        pool.set_location(handle, location);
        Ok(())
    }

    /// Erases the entity addressed by `handle`.
    pub fn erase(&self, handle: Handle) -> EcsResult<Option<EntityLocation>> {
        if handle.is_invalid() {
            return Ok(None);
        }
        let id = handle.partition();
        let partition = self.partition(id)?;

        let location = {
            let mut pool = partition.pool.write().map_err(|_| EcsError::PoisonedLock)?;
            pool.erase(handle)
        };

        if location.is_some() {
            partition.live.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(location)
    }

    /// Erases every live entity, invalidating all outstanding handles.
    pub fn clear(&self) -> EcsResult<()> {
        for partition in &self.partitions {
            let erased = {
                let mut pool = partition.pool.write().map_err(|_| EcsError::PoisonedLock)?;
                pool.clear()
            };
            partition.live.fetch_sub(erased as u32, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_wrap_skips_zero() {
        assert_eq!(next_generation(1), 2);
        assert_eq!(next_generation(Generation::MAX), 1);
    }

    #[test]
    fn handle_packing_roundtrip() {
        let handle = make_handle(3, 12345, 777);
        assert_eq!(handle.fields(), (3, 12345, 777));
        assert_eq!(handle.partition(), 3);
        assert_eq!(handle.index(), 12345);
        assert_eq!(handle.generation(), 777);
        assert!(!handle.is_invalid());
        assert!(Handle::INVALID.is_invalid());
    }

    #[test]
    fn first_generation_is_never_zero() {
        let pool_handle = {
            let mut pool = SlotPool::default();
            pool.insert(0, EntityLocation::default()).unwrap()
        };
        assert_eq!(pool_handle.generation(), 1);
        assert_ne!(pool_handle, Handle::INVALID);
    }
}
