//! The layer of untrusted block storage.
//!
//! A `Store` holds fixed-size data blocks. Nothing it returns is trusted;
//! block contents are authenticated by the hash tree layers above.

use static_assertions::assert_eq_size;

mod mem_store;
mod store;

pub use self::mem_store::MemStore;
pub use self::store::Store;

pub type BlockId = usize;

// This definition of BlockId assumes the target architecture is 64-bit
assert_eq_size!(usize, u64);
