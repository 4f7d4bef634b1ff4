//! The layer of the trusted S chip.
//!
//! The S chip is the small secure element that anchors the store: it keeps
//! the root hash and the endorsement key, and releases them only to the P
//! chip it was paired with at the factory.

mod factory_keys;
mod s_chip;

pub use self::factory_keys::FactoryKeys;
pub use self::s_chip::SoftSChip;
