//! Drives a node cache against the authoritative hash tree.
use crate::layers::crypto::{Digest, Mac, Nonce};
use crate::layers::merkle::{
    is_left_child, node_update_path, parent, path_to_root, sibling, HashTree, NodeId,
    ROOT_NODE_ID,
};
use crate::layers::pchip::{NodeCache, SessionSlot, SlotId};
use crate::os::HashSet;
use crate::prelude::*;
use crate::util::{CacheMetrics, NoMetrics, ReqType};

/// Where a tree node sits in the node cache, and when it was last used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheInfo {
    pub cache_entry: Option<SlotId>,
    pub access_time: u64,
}

/// Serves read and write requests by keeping the right tree nodes in a
/// bounded node cache.
///
/// The controller runs on the untrusted side. It owns the full hash tree,
/// decides what to load into the cache and what to evict, and asks the
/// cache to certify leaves. The cache checks everything it is told, so a bug
/// here can only cause errors, never a wrong authenticator.
///
/// Eviction is LRU over the cached nodes that have no cached child, minus
/// the nodes the current request needs.
///
/// Requests must be serialized; see `Controller`.
pub struct HashTreeController<C> {
    cache: C,
    tree: HashTree,
    /// The root the node cache is anchored to. Comes from the boot and from
    /// updates the cache accepted, never from `tree`.
    trusted_root: Digest,
    /// Indexed by node id.
    cache_infos: Vec<CacheInfo>,
    /// Cached nodes with no cached child, i.e. eviction candidates.
    cache_leaves: HashSet<NodeId>,
    used_entries: usize,
    access_time: u64,
    metrics: Arc<dyn CacheMetrics>,
}

/// Smallest node cache that can hold a full update path of a tree with
/// `leaf_count` leaves: the root plus a node and its sibling on every level.
pub fn min_node_cache_size(leaf_count: usize) -> usize {
    2 * leaf_count.trailing_zeros() as usize + 1
}

impl<C: NodeCache> HashTreeController<C> {
    /// Creates a controller over `cache`, which must already hold
    /// `trusted_root` in slot 0.
    pub fn new(cache: C, tree: HashTree, trusted_root: Digest) -> Result<Self> {
        Self::with_metrics(cache, tree, trusted_root, Arc::new(NoMetrics))
    }

    /// Like `new`, reporting cache events to `metrics`.
    pub fn with_metrics(
        cache: C,
        tree: HashTree,
        trusted_root: Digest,
        metrics: Arc<dyn CacheMetrics>,
    ) -> Result<Self> {
        if cache.leaf_count() != tree.capacity() {
            return_errno_with_msg!(InvalidArgs, "node cache and hash tree disagree on size");
        }
        if cache.capacity() < min_node_cache_size(tree.capacity()) {
            return_errno_with_msg!(InvalidArgs, "node cache cannot hold an update path");
        }
        let mut new_self = Self {
            cache_infos: vec![CacheInfo::default(); 2 * tree.capacity()],
            cache,
            tree,
            trusted_root,
            cache_leaves: HashSet::new(),
            used_entries: 0,
            access_time: 1,
            metrics,
        };
        new_self.cache_root_node();
        Ok(new_self)
    }

    fn cache_root_node(&mut self) {
        self.cache_infos[ROOT_NODE_ID].cache_entry = Some(self.used_entries);
        self.update_node_access_time(ROOT_NODE_ID);
        self.used_entries += 1;
    }

    pub fn tree(&self) -> &HashTree {
        &self.tree
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// The root hash the node cache currently vouches for.
    pub fn trusted_root(&self) -> Digest {
        self.trusted_root
    }

    /// Number of leaves, i.e. the largest block count the tree can cover.
    pub fn capacity(&self) -> usize {
        self.tree.capacity()
    }

    /// The slot holding `node_id`, if it is cached.
    pub fn node_cache_entry(&self, node_id: NodeId) -> Option<SlotId> {
        self.cache_infos.get(node_id).and_then(|info| info.cache_entry)
    }

    /// Restarts the node cache from the trusted root.
    ///
    /// Used after a failed request, which may leave slots loaded but
    /// unverified, or the bookkeeping here out of step with the cache. A
    /// tree that disagrees with the trusted root keeps failing verification.
    pub fn reset_cache(&mut self) -> Result<()> {
        self.cache.set_root_hash(&self.trusted_root)?;
        self.cache_infos
            .iter_mut()
            .for_each(|info| *info = CacheInfo::default());
        self.cache_leaves.clear();
        self.used_entries = 0;
        self.cache_root_node();
        warn!("[HashTreeController] node cache reset to the trusted root");
        Ok(())
    }

    /// Certifies the current hash of block `block_id` for a session.
    pub fn sign_read_block(
        &mut self,
        block_id: BlockId,
        session: SessionSlot,
        nonce: &Nonce,
    ) -> Result<Mac> {
        self.check_block_id(block_id)?;
        self.increment_access_time();
        let start_node_id = self.tree.leaf_node_id(block_id);

        if self.node_cache_entry(start_node_id).is_some() {
            self.update_node_access_time(start_node_id);
            self.metrics.on_request(ReqType::Read, 1, 0);
        } else {
            let (nodes_to_load, nodes_needed) = self.plan_read_path(start_node_id);
            self.load_and_verify(&nodes_to_load, &nodes_needed)?;
            self.metrics
                .on_request(ReqType::Read, nodes_needed.len(), nodes_to_load.len());
        }
        self.certify(session, nonce, start_node_id)
    }

    /// Sets the hash of block `block_id` and certifies it for a session.
    ///
    /// Returns the authenticator of the new leaf hash. The tree is only left
    /// changed if the cache accepted the update.
    pub fn sign_write_block(
        &mut self,
        block_id: BlockId,
        data_hash: &Digest,
        session: SessionSlot,
        nonce: &Nonce,
    ) -> Result<Mac> {
        self.check_block_id(block_id)?;
        self.increment_access_time();
        let start_node_id = self.tree.leaf_node_id(block_id);

        let (nodes_to_load, nodes_needed) = self.plan_write_path(start_node_id);
        self.load_and_verify(&nodes_to_load, &nodes_needed)?;
        self.update_node_access_time(start_node_id);

        let update_path = node_update_path(start_node_id)
            .into_iter()
            .map(|node_id| {
                self.node_cache_entry(node_id)
                    .ok_or(Error::with_msg(InvalidUpdatePath, "update path not cached"))
            })
            .collect::<Result<Vec<_>>>()?;

        let old_leaf_hash = self.tree.leaf_hash(block_id)?;
        self.tree.set_leaf(block_id, *data_hash)?;
        let new_hashes = match self.cache.update(session, &update_path, data_hash) {
            Ok(new_hashes) => new_hashes,
            Err(e) => {
                self.tree.set_leaf(block_id, old_leaf_hash)?;
                return Err(e);
            }
        };
        let Some(&new_root) = new_hashes.last() else {
            return_errno_with_msg!(InvalidUpdatePath, "node cache returned no root hash");
        };
        self.trusted_root = new_root;
        if new_root != self.tree.root_hash() {
            error!(
                "[HashTreeController] node cache root diverged from the tree after writing block {}",
                block_id
            );
            return_errno_with_msg!(HashMismatch, "node cache root diverged from the tree");
        }

        self.metrics
            .on_request(ReqType::Write, nodes_needed.len(), nodes_to_load.len());
        self.certify(session, nonce, start_node_id)
    }

    /// Plans the nodes to load for reading `start_node_id`.
    ///
    /// Walks toward the root, taking each node and its sibling, until it
    /// meets a cached node or a cached sibling; that one becomes the anchor
    /// the new nodes hang from. Returns the nodes to load, root side first,
    /// and the nodes that must stay cached meanwhile, anchor included.
    fn plan_read_path(&mut self, start_node_id: NodeId) -> (Vec<NodeId>, HashSet<NodeId>) {
        let mut nodes_to_load = Vec::new();
        let mut anchor = ROOT_NODE_ID;
        for node_id in path_to_root(start_node_id) {
            if self.node_cache_entry(node_id).is_some() {
                anchor = node_id;
                break;
            }
            nodes_to_load.push(node_id);
            if self.node_cache_entry(sibling(node_id)).is_some() {
                anchor = sibling(node_id);
                break;
            }
            nodes_to_load.push(sibling(node_id));
        }
        self.update_node_access_time(anchor);

        let mut nodes_needed: HashSet<NodeId> = nodes_to_load.iter().copied().collect();
        nodes_needed.insert(anchor);
        nodes_to_load.reverse();
        (nodes_to_load, nodes_needed)
    }

    /// Plans the nodes to load for writing `start_node_id`.
    ///
    /// Every level changes, so the whole update path is needed.
    fn plan_write_path(&self, start_node_id: NodeId) -> (Vec<NodeId>, HashSet<NodeId>) {
        let nodes_needed: Vec<NodeId> = node_update_path(start_node_id);
        let mut nodes_to_load: Vec<NodeId> = nodes_needed
            .iter()
            .copied()
            .filter(|node_id| self.node_cache_entry(*node_id).is_none())
            .collect();
        nodes_to_load.reverse();
        (nodes_to_load, nodes_needed.into_iter().collect())
    }

    /// Loads `nodes_to_load` in order, verifying each node as soon as its
    /// sibling is cached too.
    ///
    /// Nodes come root side first, so a pair's parent is always verified by
    /// the time the pair is complete.
    fn load_and_verify(
        &mut self,
        nodes_to_load: &[NodeId],
        nodes_needed: &HashSet<NodeId>,
    ) -> Result<()> {
        for &node_id in nodes_to_load {
            let (slot, old_parent_slot) = self.allocate_cache_entry(node_id, nodes_needed)?;
            self.cache.load(
                slot,
                node_id,
                &self.tree.node_hash(node_id)?,
                old_parent_slot,
            )?;
            if self.node_cache_entry(sibling(node_id)).is_some() {
                self.verify_nodes(node_id, sibling(node_id))?;
            }
        }
        Ok(())
    }

    /// Picks a slot for `target_node`, evicting if the cache is full.
    ///
    /// Returns the slot and, when a node was evicted, the slot of the
    /// evicted node's parent.
    fn allocate_cache_entry(
        &mut self,
        target_node: NodeId,
        needed_nodes: &HashSet<NodeId>,
    ) -> Result<(SlotId, Option<SlotId>)> {
        let allocated = if self.used_entries < self.cache.capacity() {
            let slot = self.used_entries;
            self.used_entries += 1;
            self.cache_infos[target_node].cache_entry = Some(slot);
            self.cache_leaves.insert(target_node);
            self.cache_leaves.remove(&parent(target_node));
            (slot, None)
        } else {
            let Some(victim) = self.choose_victim(needed_nodes) else {
                return_errno_with_msg!(InvalidArgs, "no evictable node in the node cache");
            };
            debug_assert!(!needed_nodes.contains(&victim));
            let slot = self.replace_cache(victim, target_node)?;
            self.metrics.on_evict(victim);
            trace!(
                "[HashTreeController] evict node {} from slot {} for node {}",
                victim,
                slot,
                target_node
            );
            (slot, self.node_cache_entry(parent(victim)))
        };
        self.update_node_access_time(target_node);
        Ok(allocated)
    }

    /// The least recently used cache leaf outside `needed_nodes`; ties go to
    /// the lowest node id.
    fn choose_victim(&self, needed_nodes: &HashSet<NodeId>) -> Option<NodeId> {
        self.cache_leaves
            .iter()
            .copied()
            .filter(|node_id| !needed_nodes.contains(node_id))
            .min_by_key(|&node_id| (self.cache_infos[node_id].access_time, node_id))
    }

    /// Moves `victim`'s slot to `target_node`; returns the slot.
    fn replace_cache(&mut self, victim: NodeId, target_node: NodeId) -> Result<SlotId> {
        let Some(slot) = self.cache_infos[victim].cache_entry.take() else {
            return_errno_with_msg!(InvalidArgs, "eviction victim is not cached");
        };
        self.cache_infos[target_node].cache_entry = Some(slot);
        self.cache_leaves.insert(target_node);
        self.cache_leaves.remove(&parent(target_node));
        self.cache_leaves.remove(&victim);
        let victim_parent = parent(victim);
        if victim_parent != ROOT_NODE_ID && self.node_cache_entry(sibling(victim)).is_none() {
            self.cache_leaves.insert(victim_parent);
        }
        Ok(slot)
    }

    fn verify_nodes(&self, node_id: NodeId, sibling_id: NodeId) -> Result<()> {
        let (left, right) = if is_left_child(node_id) {
            (node_id, sibling_id)
        } else {
            (sibling_id, node_id)
        };
        match (
            self.node_cache_entry(parent(node_id)),
            self.node_cache_entry(left),
            self.node_cache_entry(right),
        ) {
            (Some(parent_slot), Some(left_slot), Some(right_slot)) => {
                self.cache.verify(parent_slot, left_slot, right_slot)
            }
            _ => Err(Error::with_msg(InvalidArgs, "verifying uncached nodes")),
        }
    }

    fn certify(&self, session: SessionSlot, nonce: &Nonce, node_id: NodeId) -> Result<Mac> {
        let Some(slot) = self.node_cache_entry(node_id) else {
            return_errno_with_msg!(NotVerified, "certified node is not cached");
        };
        self.cache.certify(session, nonce, slot)
    }

    fn check_block_id(&self, block_id: BlockId) -> Result<()> {
        if block_id >= self.tree.capacity() {
            return_errno_with_msg!(OutOfRange, "block id exceeds tree capacity");
        }
        Ok(())
    }

    fn increment_access_time(&mut self) {
        self.access_time += 1;
    }

    fn update_node_access_time(&mut self, node_id: NodeId) {
        self.cache_infos[node_id].access_time = self.access_time;
    }
}

impl<C> Debug for HashTreeController<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTreeController")
            .field("tree", &self.tree)
            .field("used_entries", &self.used_entries)
            .field("cache_leaves", &self.cache_leaves.len())
            .field("access_time", &self.access_time)
            .finish()
    }
}
