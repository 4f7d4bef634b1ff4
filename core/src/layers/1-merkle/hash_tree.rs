//! The authoritative, full-fidelity hash tree.
use super::tree::{
    full_tree_leaf_count, full_tree_node_count, is_leaf_node, leaf_node_id, left_child,
    node_update_path, path_to_root, right_child, NodeId, ROOT_NODE_ID,
};
use crate::layers::bio::Store;
use crate::layers::crypto::{crypto_hash, hash_for_tree_node, Digest};
use crate::prelude::*;

use serde::{Deserialize, Serialize};

/// A Merkle tree that stores the hash of every node.
///
/// For every internal node `n`, `node_hash(n) == H(n, node_hash(2n), node_hash(2n + 1))`
/// where `H` is `hash_for_tree_node`. Leaves hold externally supplied
/// content hashes. The tree is only mutated through `set_leaf`, which
/// recomputes every ancestor of the leaf.
///
/// This is the untrusted side's copy of the tree; node caches load node
/// hashes from it and check them against their own trusted root.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashTree {
    capacity: usize,
    /// Indexed by node id; slot 0 is unused.
    nodes: Vec<Digest>,
}

impl HashTree {
    /// Creates a tree of at least `min_capacity` leaves, all set to `leaf_value`.
    pub fn new(min_capacity: usize, leaf_value: Digest) -> Self {
        let capacity = full_tree_leaf_count(min_capacity);
        let leaves = core::iter::repeat(leaf_value).take(capacity);
        Self::from_full_leaves(capacity, leaves)
    }

    /// Creates a tree whose leaves are the hashes of the blocks in `store`.
    ///
    /// Leaves past the end of the store hold the hash of an all-zero block.
    pub fn for_store(store: &impl Store) -> Result<Self> {
        let block_count = store.block_count();
        let capacity = full_tree_leaf_count(block_count);
        let padding = crypto_hash(&vec![0u8; store.block_size()]);
        let mut leaves = Vec::with_capacity(capacity);
        for block_id in 0..block_count {
            leaves.push(crypto_hash(&store.read_block(block_id)?));
        }
        leaves.resize(capacity, padding);
        Ok(Self::from_full_leaves(capacity, leaves))
    }

    fn from_full_leaves(capacity: usize, leaves: impl IntoIterator<Item = Digest>) -> Self {
        let mut nodes = Vec::with_capacity(full_tree_node_count(capacity) + 1);
        nodes.resize(capacity, Digest::default());
        nodes.extend(leaves);
        debug_assert_eq!(nodes.len(), capacity * 2);

        let mut new_self = Self { capacity, nodes };
        for node_id in (ROOT_NODE_ID..capacity).rev() {
            new_self.nodes[node_id] = new_self.correct_node_hash(node_id);
        }
        new_self
    }

    /// Number of leaves.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of nodes, leaves included.
    pub fn node_count(&self) -> usize {
        self.capacity * 2 - 1
    }

    /// The hash stored in a node, leaf or internal.
    pub fn node_hash(&self, node_id: NodeId) -> Result<Digest> {
        self.check_node_id(node_id)?;
        Ok(self.nodes[node_id])
    }

    /// The hash stored in the 0-based leaf `leaf_id`.
    pub fn leaf_hash(&self, leaf_id: usize) -> Result<Digest> {
        self.check_leaf_id(leaf_id)?;
        Ok(self.nodes[self.leaf_node_id(leaf_id)])
    }

    /// The summary of the entire tree.
    pub fn root_hash(&self) -> Digest {
        self.nodes[ROOT_NODE_ID]
    }

    pub fn leaf_node_id(&self, leaf_id: usize) -> NodeId {
        leaf_node_id(self.capacity, leaf_id)
    }

    pub fn is_leaf_node(&self, node_id: NodeId) -> bool {
        is_leaf_node(self.capacity, node_id)
    }

    /// The nodes needed to update or verify a leaf, see `node_update_path`.
    pub fn leaf_update_path(&self, leaf_id: usize) -> Result<Vec<NodeId>> {
        self.check_leaf_id(leaf_id)?;
        Ok(node_update_path(self.leaf_node_id(leaf_id)))
    }

    /// Sets a leaf's hash and recomputes all of its ancestors.
    pub fn set_leaf(&mut self, leaf_id: usize, new_value: Digest) -> Result<()> {
        self.check_leaf_id(leaf_id)?;
        let start_node_id = self.leaf_node_id(leaf_id);
        self.nodes[start_node_id] = new_value;
        for node_id in path_to_root(start_node_id).skip(1) {
            self.nodes[node_id] = self.correct_node_hash(node_id);
        }
        Ok(())
    }

    /// Serializes the tree for persistence next to its store.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self)
            .map_err(|_| Error::with_msg(IoFailed, "failed to serialize hash tree"))
    }

    /// Loads a tree saved by `to_bytes`.
    ///
    /// Only the shape is checked here. Node contents are untrusted and get
    /// verified against the trusted root as nodes are loaded into a node cache.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let tree: Self = postcard::from_bytes(bytes)
            .map_err(|_| Error::with_msg(IoFailed, "failed to deserialize hash tree"))?;
        if tree.capacity < 2
            || !tree.capacity.is_power_of_two()
            || tree.capacity.checked_mul(2) != Some(tree.nodes.len())
        {
            return_errno_with_msg!(InvalidArgs, "malformed hash tree");
        }
        Ok(tree)
    }

    /// The hash of an internal node, assuming its children are correct.
    fn correct_node_hash(&self, node_id: NodeId) -> Digest {
        hash_for_tree_node(
            node_id,
            &self.nodes[left_child(node_id)],
            &self.nodes[right_child(node_id)],
        )
    }

    fn check_leaf_id(&self, leaf_id: usize) -> Result<()> {
        if leaf_id >= self.capacity {
            return_errno_with_msg!(OutOfRange, "leaf id exceeds tree capacity");
        }
        Ok(())
    }

    fn check_node_id(&self, node_id: NodeId) -> Result<()> {
        if node_id == 0 || node_id > self.node_count() {
            return_errno_with_msg!(OutOfRange, "node id outside the tree");
        }
        Ok(())
    }
}

impl Debug for HashTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTree")
            .field("capacity", &self.capacity)
            .field("root_hash", &self.root_hash())
            .finish()
    }
}
