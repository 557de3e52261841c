//! # Engine Module
//!
//! Internal storage-engine implementation.
//!
//! This module contains all core building blocks:
//! - Identifiers, bit layouts, and signatures
//! - Component identity and bundles
//! - Segmented typed columns
//! - Handles and the partitioned slot map
//! - Archetype tables and migration
//! - The registry
//! - Views and iterators
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod archetype;
pub mod component;
pub mod error;
pub mod handle;
pub mod registry;
pub mod storage;
pub mod types;
pub mod view;
