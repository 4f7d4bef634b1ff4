//! The layer of the untrusted server.
//!
//! The server owns the store and the full hash tree, and decides what the P
//! chip's bounded caches hold. Nothing here is trusted: every decision is
//! checked by the P chip before it certifies a block.

mod config;
mod controller;
mod hash_tree_controller;
mod session_allocator;
mod setup;

pub use self::config::StoreConfig;
pub use self::controller::{Controller, Session};
pub use self::hash_tree_controller::{min_node_cache_size, CacheInfo, HashTreeController};
pub use self::session_allocator::{SessionAllocator, SessionId};
pub use self::setup::StoreSetup;
