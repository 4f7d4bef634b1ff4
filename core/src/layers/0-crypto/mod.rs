//! The layer of cryptographic primitives used by the S-P store.
//!
//! Everything here is a pure function of its inputs (plus the OS RNG for
//! fresh keys and nonces). The tree combining hash mixes in the node id so
//! that moving a subtree to another position changes its hash.

mod sk;

pub use self::sk::{sk_decrypt, sk_encrypt, SkKey};
pub use crate::os::{Certificate, Digest, HmacKey, KeyPair, Mac, Nonce, PublicKey};

use crate::layers::merkle::NodeId;
use crate::os::{hmac_sha256, sha256};
use crate::prelude::*;

/// Hashes an arbitrary byte string, e.g. a data block.
pub fn crypto_hash(data: &[u8]) -> Digest {
    sha256(&[data])
}

/// The combining hash of an internal tree node.
pub fn hash_for_tree_node(node_id: NodeId, left: &Digest, right: &Digest) -> Digest {
    let id = node_id_bytes(node_id);
    sha256(&[&id[..], &**left, &**right])
}

/// HMAC over arbitrary data.
pub fn hmac(key: &[u8], data: &[u8]) -> Result<Mac> {
    hmac_sha256(key, &[data])
}

/// The authenticator returned to clients for a node: `HMAC(key, nonce || node_id || hash)`.
pub fn hmac_for_block_hash(
    node_id: NodeId,
    node_hash: &Digest,
    nonce: &Nonce,
    key: &HmacKey,
) -> Result<Mac> {
    let id = node_id_bytes(node_id);
    hmac_sha256(key, &[&**nonce, &id[..], &**node_hash])
}

/// Same as `hmac_for_block_hash`, over the hash of raw block data.
pub fn hmac_for_block(node_id: NodeId, data: &[u8], nonce: &Nonce, key: &HmacKey) -> Result<Mac> {
    hmac_for_block_hash(node_id, &crypto_hash(data), nonce, key)
}

/// A fresh random nonce.
pub fn nonce() -> Nonce {
    Nonce::random()
}

fn node_id_bytes(node_id: NodeId) -> [u8; 4] {
    (node_id as u32).to_be_bytes()
}
