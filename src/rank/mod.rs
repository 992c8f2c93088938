//! Rank service client interface
//!
//! The remote rank service is an external collaborator. Lookups are always
//! awaited outside any partition lock and bounded by a timeout.

pub mod lookup;

pub use lookup::{StaticTierLookup, TierLookup, TimedTierLookup};
