//! Identity resolution
//!
//! Partitions records from every source into equivalence classes keyed by a
//! [`StableKey`](crate::record::StableKey). One documented policy replaces
//! ad-hoc filename comparisons.

mod normalize;
mod resolver;

pub use normalize::normalize_natural_key;
pub use resolver::{EquivalenceClass, IdentityIndex, IdentityResolver};
