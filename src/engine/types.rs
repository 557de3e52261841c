//! Core identifiers, bit-level layouts, and component signatures.
//!
//! This module defines the numeric types and bit layouts shared by every
//! subsystem of the storage engine: handle packing, component and archetype
//! identifiers, and the bitset [`Signature`] used both as archetype identity
//! and for view matching.
//!
//! ## Design
//!
//! - Handles are encoded as a packed 64-bit value so they are cheap to copy,
//!   compare, and hash.
//! - Component sets are fixed-size bit arrays, which makes set equality,
//!   subset tests, and set algebra plain word-wise operations. Two type sets
//!   that are equal as *sets* produce identical signatures regardless of the
//!   order the components were named in, so a signature is usable directly
//!   as an order-independent archetype key.
//! - All capacities are compile-time constants validated by static
//!   assertions.

/// Bit-width type used for compile-time layout calculations.
pub type Bits = u8;

/// Packed 64-bit handle value.
pub type HandleBits = u64;
/// Identifier for a slot-map partition.
pub type PartitionId = u16;
/// Slot index within a partition.
pub type SlotIndex = u32;
/// Generation counter used to detect stale handles.
pub type Generation = u32;

/// Unique identifier for a component type.
pub type ComponentId = u16;
/// Unique identifier for an archetype within one registry.
pub type ArchetypeId = u32;
/// Row index within an archetype.
pub type RowIndex = u32;

/// Total number of bits in a packed handle.
pub const HANDLE_BITS: Bits = 64;
/// Number of bits reserved for the slot-map partition.
pub const PARTITION_BITS: Bits = 10;
/// Number of bits reserved for the generation counter.
pub const GENERATION_BITS: Bits = 32;
/// Number of bits reserved for the slot index within a partition.
pub const INDEX_BITS: Bits = HANDLE_BITS - PARTITION_BITS - GENERATION_BITS;

const _: [(); 1] = [(); (GENERATION_BITS + PARTITION_BITS < HANDLE_BITS) as usize];
const _: [(); 1] = [(); (INDEX_BITS > 0) as usize];
const _: [(); 1] = [(); (GENERATION_BITS >= 16) as usize];

const fn mask(bits: Bits) -> HandleBits {
    if bits == 0 { 0 } else { ((1 as HandleBits) << bits) - 1 }
}

/// Mask selecting the index portion of a packed handle.
pub const INDEX_MASK: HandleBits = mask(INDEX_BITS);
/// Mask selecting the partition portion of a packed handle.
pub const PARTITION_MASK: HandleBits = mask(PARTITION_BITS);
/// Maximum number of slots per partition.
pub const INDEX_CAP: SlotIndex = INDEX_MASK as SlotIndex;
/// Maximum number of slot-map partitions.
pub const PARTITION_CAP: usize = (PARTITION_MASK + 1) as usize;

/// Maximum number of distinct component types.
pub const COMPONENT_CAP: usize = 1024;
/// Number of `u64` words required to represent a full component signature.
pub const SIGNATURE_WORDS: usize = (COMPONENT_CAP + 63) / 64;

/// Raw signature word array, usable as an order-independent archetype key.
pub type SignatureKey = [u64; SIGNATURE_WORDS];

/// Bitset representing a set of component types.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Signature {
    /// Packed component bitset.
    pub words: SignatureKey,
}

impl Default for Signature {
    fn default() -> Self {
        Self { words: [0u64; SIGNATURE_WORDS] }
    }
}

impl Signature {
    /// Sets the bit corresponding to `component_id`.
    #[inline]
    pub fn set(&mut self, component_id: ComponentId) {
        let index = (component_id as usize) / 64;
        let bit = (component_id as usize) % 64;
        self.words[index] |= 1u64 << bit;
    }

    /// Clears the bit corresponding to `component_id`.
    #[inline]
    pub fn clear(&mut self, component_id: ComponentId) {
        let index = (component_id as usize) / 64;
        let bit = (component_id as usize) % 64;
        self.words[index] &= !(1u64 << bit);
    }

    /// Returns `true` if `component_id` is present in this signature.
    #[inline]
    pub fn has(&self, component_id: ComponentId) -> bool {
        let index = (component_id as usize) / 64;
        let bit = (component_id as usize) % 64;
        (self.words[index] >> bit) & 1 == 1
    }

    /// Returns `true` if every component in `other` is present in `self`.
    #[inline]
    pub fn contains_all(&self, other: &Signature) -> bool {
        for (word_a, word_b) in self.words.iter().zip(other.words.iter()) {
            if (word_a & word_b) != *word_b {
                return false;
            }
        }
        true
    }

    /// Returns `true` if no component is present.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&word| word == 0)
    }

    /// Number of components present.
    #[inline]
    pub fn count(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Iterates over all component IDs set in this signature, in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ComponentId> + '_ {
        iter_bits(&self.words)
    }
}

/// Iterates over component IDs set in a raw signature word array, ascending.
#[inline]
pub fn iter_bits(words: &SignatureKey) -> impl Iterator<Item = ComponentId> + '_ {
    words.iter().enumerate().flat_map(|(word_index, &word)| {
        let base = word_index * 64;
        let mut bits = word;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let tz = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            Some((base + tz) as ComponentId)
        })
    })
}
