mod error;
mod layers;
mod os;
mod prelude;
mod util;

pub use self::error::{Errno, Error};
pub use self::layers::bio::{BlockId, MemStore, Store};
pub use self::layers::crypto::{
    crypto_hash, hash_for_tree_node, hmac, hmac_for_block, hmac_for_block_hash, nonce, sk_decrypt,
    sk_encrypt, Certificate, Digest, HmacKey, KeyPair, Mac, Nonce, PublicKey, SkKey,
};
pub use self::layers::merkle::{
    full_tree_leaf_count, leaf_node_id, node_update_path, path_to_root, HashTree, NodeId,
    ROOT_NODE_ID,
};
pub use self::layers::pchip::{
    BootLogic, BootState, Command, CommandLink, HardNodeCache, HardPChip, LoopbackLink, NodeCache,
    Opcode, PChip, SessionSlot, SlotId, SoftNodeCache, SoftPChip, SoftSessionCache,
};
pub use self::layers::schip::{FactoryKeys, SoftSChip};
pub use self::layers::server::{
    min_node_cache_size, CacheInfo, Controller, HashTreeController, Session, SessionAllocator,
    SessionId, StoreConfig, StoreSetup,
};
pub use self::util::{CacheMetrics, HitRateMetrics, NoMetrics, RandomInit, ReqType};
