//! Node cache: the trusted, bounded window onto the hash tree.
use super::session_cache::{SessionSlot, SoftSessionCache};
use crate::layers::crypto::{hash_for_tree_node, hmac_for_block_hash, Digest, Mac, Nonce};
use crate::layers::merkle::{
    full_tree_leaf_count, is_left_child, is_siblings, left_child, parent, right_child, NodeId,
    ROOT_NODE_ID,
};
use crate::os::Mutex;
use crate::prelude::*;

use inherit_methods_macro::inherit_methods;

/// Index of an entry in a node cache.
pub type SlotId = usize;

/// A fixed number of entries, each holding one tree node's hash plus the
/// validity flags that let the P chip trust it.
///
/// Every entry is either empty, loaded (untrusted), or verified. A loaded
/// entry becomes verified only through `verify`, which checks it against an
/// already verified parent. Slot 0 holds the root, which is verified by
/// `set_root_hash` and never reloaded.
///
/// Only verified entries can be certified or take part in an update, so
/// whatever the untrusted side loads, a client only ever sees authenticators
/// for hashes consistent with the root.
///
/// # Thread safety
///
/// Methods take `&self`; implementations serialize access internally.
/// Callers still have to serialize whole load/verify/update sequences.
pub trait NodeCache: Send + Sync {
    /// Number of entries.
    fn capacity(&self) -> usize;

    /// Number of leaves in the tree this cache verifies.
    fn leaf_count(&self) -> usize;

    /// Loads an untrusted node hash into `slot`.
    ///
    /// If `slot` holds a verified node, that node is evicted: it must have
    /// no cached children, and `old_parent_slot` must hold its parent, whose
    /// child flag is then cleared.
    fn load(
        &self,
        slot: SlotId,
        node_id: NodeId,
        node_hash: &Digest,
        old_parent_slot: Option<SlotId>,
    ) -> Result<()>;

    /// Checks two loaded siblings against their verified parent and marks
    /// them verified.
    fn verify(&self, parent_slot: SlotId, left_slot: SlotId, right_slot: SlotId) -> Result<()>;

    /// Returns `HMAC(session_key, nonce || node_id || node_hash)` for a
    /// verified entry.
    fn certify(&self, session: SessionSlot, nonce: &Nonce, slot: SlotId) -> Result<Mac>;

    /// Replaces a leaf's hash and recomputes its ancestors.
    ///
    /// `update_path` lists slots as `[leaf, sibling, parent, sibling, ...,
    /// root]`. Returns the recomputed hashes, one per level, root last.
    /// Nothing changes unless the whole path checks out.
    fn update(
        &self,
        session: SessionSlot,
        update_path: &[SlotId],
        new_leaf_hash: &Digest,
    ) -> Result<Vec<Digest>>;

    /// Empties the cache, then places the verified root in slot 0.
    fn set_root_hash(&self, root_hash: &Digest) -> Result<()>;
}

macro_rules! impl_node_cache_pointer {
    ($typ:ty,$from:tt) => {
        #[inherit_methods(from = $from)]
        impl<T: NodeCache> NodeCache for $typ {
            fn capacity(&self) -> usize;
            fn leaf_count(&self) -> usize;
            fn load(
                &self,
                slot: SlotId,
                node_id: NodeId,
                node_hash: &Digest,
                old_parent_slot: Option<SlotId>,
            ) -> Result<()>;
            fn verify(
                &self,
                parent_slot: SlotId,
                left_slot: SlotId,
                right_slot: SlotId,
            ) -> Result<()>;
            fn certify(&self, session: SessionSlot, nonce: &Nonce, slot: SlotId) -> Result<Mac>;
            fn update(
                &self,
                session: SessionSlot,
                update_path: &[SlotId],
                new_leaf_hash: &Digest,
            ) -> Result<Vec<Digest>>;
            fn set_root_hash(&self, root_hash: &Digest) -> Result<()>;
        }
    };
}

impl_node_cache_pointer!(&T, "(**self)");
impl_node_cache_pointer!(Box<T>, "(**self)");
impl_node_cache_pointer!(Arc<T>, "(**self)");

/// Software model of the P chip's node cache.
pub struct SoftNodeCache {
    capacity: usize,
    leaf_count: usize,
    entries: Mutex<Vec<Entry>>,
    session_cache: Arc<SoftSessionCache>,
}

/// State of one cache entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Entry {
    Empty,
    Loaded {
        node_id: NodeId,
        node_hash: Digest,
    },
    Verified {
        node_id: NodeId,
        node_hash: Digest,
        left_cached: bool,
        right_cached: bool,
    },
}

impl Entry {
    fn node_id(&self) -> Option<NodeId> {
        match self {
            Entry::Empty => None,
            Entry::Loaded { node_id, .. } | Entry::Verified { node_id, .. } => Some(*node_id),
        }
    }

    fn node_hash(&self) -> Option<Digest> {
        match self {
            Entry::Empty => None,
            Entry::Loaded { node_hash, .. } | Entry::Verified { node_hash, .. } => {
                Some(*node_hash)
            }
        }
    }

    fn is_verified(&self) -> bool {
        matches!(self, Entry::Verified { .. })
    }

    /// Whether a verified entry records `child` as cached.
    fn child_flag(&self, child: NodeId) -> bool {
        match self {
            Entry::Verified {
                left_cached,
                right_cached,
                ..
            } => {
                if is_left_child(child) {
                    *left_cached
                } else {
                    *right_cached
                }
            }
            _ => false,
        }
    }

    fn clear_child_flag(&mut self, child: NodeId) {
        if let Entry::Verified {
            left_cached,
            right_cached,
            ..
        } = self
        {
            if is_left_child(child) {
                *left_cached = false;
            } else {
                *right_cached = false;
            }
        }
    }

    /// Turns a loaded entry into a verified one. Verified entries keep
    /// their child flags.
    fn mark_verified(&mut self) {
        if let Entry::Loaded { node_id, node_hash } = *self {
            *self = Entry::Verified {
                node_id,
                node_hash,
                left_cached: false,
                right_cached: false,
            };
        }
    }

    fn set_node_hash(&mut self, new_hash: Digest) {
        match self {
            Entry::Empty => {}
            Entry::Loaded { node_hash, .. } | Entry::Verified { node_hash, .. } => {
                *node_hash = new_hash
            }
        }
    }
}

impl SoftNodeCache {
    /// Creates a cache of `capacity` entries for a tree holding at least
    /// `min_leaf_count` leaves.
    ///
    /// All entries start empty; nothing verifies until `set_root_hash`.
    pub fn new(
        capacity: usize,
        min_leaf_count: usize,
        session_cache: Arc<SoftSessionCache>,
    ) -> Result<Self> {
        if capacity == 0 {
            return_errno_with_msg!(InvalidArgs, "node cache needs at least one entry");
        }
        Ok(Self {
            capacity,
            leaf_count: full_tree_leaf_count(min_leaf_count),
            entries: Mutex::new(vec![Entry::Empty; capacity]),
            session_cache,
        })
    }

    /// The node held in a slot, if any.
    pub fn node_id(&self, slot: SlotId) -> Option<NodeId> {
        self.entries.lock().get(slot).and_then(Entry::node_id)
    }

    /// Whether a slot holds a verified node.
    pub fn is_verified(&self, slot: SlotId) -> bool {
        self.entries
            .lock()
            .get(slot)
            .map_or(false, Entry::is_verified)
    }

    fn check_slot(&self, slot: SlotId) -> Result<()> {
        if slot >= self.capacity {
            return_errno_with_msg!(InvalidSlot, "slot exceeds node cache capacity");
        }
        Ok(())
    }

    /// Checks every precondition of an update path, without side effects.
    fn check_update_path(&self, entries: &[Entry], update_path: &[SlotId]) -> Result<()> {
        if update_path.len() < 3 || update_path.len() % 2 == 0 {
            return_errno_with_msg!(InvalidUpdatePath, "update path has the wrong length");
        }
        for &slot in update_path {
            self.check_slot(slot)?;
            if entries[slot].node_id().is_none() {
                return_errno_with_msg!(InvalidUpdatePath, "update path contains an empty entry");
            }
        }
        let node_id_at = |slot: SlotId| entries[slot].node_id().unwrap_or_default();
        if node_id_at(update_path[0]) < self.leaf_count {
            return_errno_with_msg!(InvalidUpdatePath, "update path does not start at a leaf");
        }
        if node_id_at(update_path[update_path.len() - 1]) != ROOT_NODE_ID {
            return_errno_with_msg!(InvalidUpdatePath, "update path does not end at the root");
        }
        for level in update_path.windows(3).step_by(2) {
            let (hot, cold, parent_slot) = (level[0], level[1], level[2]);
            if !is_siblings(node_id_at(hot), node_id_at(cold)) {
                return_errno_with_msg!(InvalidUpdatePath, "update path contains non-siblings");
            }
            if parent(node_id_at(hot)) != node_id_at(parent_slot) {
                return_errno_with_msg!(InvalidUpdatePath, "update path skips a parent");
            }
            // The root is verified from `set_root_hash` on and never reloaded.
            if !entries[hot].is_verified() || !entries[cold].is_verified() {
                return_errno_with_msg!(UnverifiedEntry, "update path contains unverified entry");
            }
        }
        Ok(())
    }
}

impl NodeCache for SoftNodeCache {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    fn load(
        &self,
        slot: SlotId,
        node_id: NodeId,
        node_hash: &Digest,
        old_parent_slot: Option<SlotId>,
    ) -> Result<()> {
        self.check_slot(slot)?;
        if node_id <= ROOT_NODE_ID || node_id >= 2 * self.leaf_count {
            return_errno_with_msg!(InvalidNodeId, "node id outside the tree or is the root");
        }

        let mut entries = self.entries.lock();
        if let Entry::Verified {
            node_id: old_node_id,
            left_cached,
            right_cached,
            ..
        } = entries[slot]
        {
            let Some(old_parent_slot) = old_parent_slot else {
                return_errno_with_msg!(WrongParent, "evicting a verified node needs its parent");
            };
            self.check_slot(old_parent_slot)?;
            if left_cached || right_cached {
                return_errno_with_msg!(ChildStillCached, "evicted node has a cached child");
            }
            if entries[old_parent_slot].node_id() != Some(parent(old_node_id)) {
                return_errno_with_msg!(WrongParent, "old parent slot does not hold the parent");
            }
            entries[old_parent_slot].clear_child_flag(old_node_id);
        }

        entries[slot] = Entry::Loaded {
            node_id,
            node_hash: *node_hash,
        };
        trace!("[NodeCache] load: slot = {}, node = {}", slot, node_id);
        Ok(())
    }

    fn verify(&self, parent_slot: SlotId, left_slot: SlotId, right_slot: SlotId) -> Result<()> {
        self.check_slot(parent_slot)?;
        self.check_slot(left_slot)?;
        self.check_slot(right_slot)?;

        let mut entries = self.entries.lock();
        let parent_entry = entries[parent_slot];
        let (left_entry, right_entry) = (entries[left_slot], entries[right_slot]);
        let Entry::Verified {
            node_id: parent_id,
            node_hash: parent_hash,
            ..
        } = parent_entry
        else {
            return_errno_with_msg!(UnverifiedEntry, "parent entry not verified");
        };
        let left_id = left_child(parent_id);
        let right_id = right_child(parent_id);
        if left_entry.node_id() != Some(left_id) {
            return_errno_with_msg!(WrongChild, "incorrect left child entry");
        }
        if right_entry.node_id() != Some(right_id) {
            return_errno_with_msg!(WrongChild, "incorrect right child entry");
        }
        // A child that is not verified here must not be verified elsewhere.
        if left_entry.is_verified() != parent_entry.child_flag(left_id) {
            return_errno_with_msg!(DuplicateChild, "duplicate left child node");
        }
        if right_entry.is_verified() != parent_entry.child_flag(right_id) {
            return_errno_with_msg!(DuplicateChild, "duplicate right child node");
        }

        let (Some(left_hash), Some(right_hash)) = (left_entry.node_hash(), right_entry.node_hash())
        else {
            return_errno_with_msg!(WrongChild, "child entry is empty");
        };
        if hash_for_tree_node(parent_id, &left_hash, &right_hash) != parent_hash {
            warn!(
                "[NodeCache] hash mismatch: children of node {} do not match its verified hash",
                parent_id
            );
            return_errno_with_msg!(HashMismatch, "children do not match the parent hash");
        }

        if let Entry::Verified {
            left_cached,
            right_cached,
            ..
        } = &mut entries[parent_slot]
        {
            *left_cached = true;
            *right_cached = true;
        }
        entries[left_slot].mark_verified();
        entries[right_slot].mark_verified();
        trace!("[NodeCache] verified children of node {}", parent_id);
        Ok(())
    }

    fn certify(&self, session: SessionSlot, nonce: &Nonce, slot: SlotId) -> Result<Mac> {
        self.check_slot(slot)?;
        let entry = self.entries.lock()[slot];
        let Entry::Verified {
            node_id, node_hash, ..
        } = entry
        else {
            return_errno_with_msg!(NotVerified, "certified entry not verified");
        };
        let session_key = self.session_cache.session_key(session)?;
        hmac_for_block_hash(node_id, &node_hash, nonce, &session_key)
    }

    fn update(
        &self,
        session: SessionSlot,
        update_path: &[SlotId],
        new_leaf_hash: &Digest,
    ) -> Result<Vec<Digest>> {
        // Writes are only accepted on behalf of a live session.
        let _session_key = self.session_cache.session_key(session)?;

        let mut entries = self.entries.lock();
        self.check_update_path(&entries, update_path)?;

        entries[update_path[0]].set_node_hash(*new_leaf_hash);
        let mut new_hashes = Vec::with_capacity(update_path.len() / 2);
        for level in update_path.windows(3).step_by(2) {
            let (hot, cold, parent_slot) = (level[0], level[1], level[2]);
            let (hot_entry, cold_entry) = (entries[hot], entries[cold]);
            let (Some(hot_id), Some(hot_hash), Some(cold_hash), Some(parent_id)) = (
                hot_entry.node_id(),
                hot_entry.node_hash(),
                cold_entry.node_hash(),
                entries[parent_slot].node_id(),
            ) else {
                return_errno_with_msg!(InvalidUpdatePath, "update path contains an empty entry");
            };
            let parent_hash = if is_left_child(hot_id) {
                hash_for_tree_node(parent_id, &hot_hash, &cold_hash)
            } else {
                hash_for_tree_node(parent_id, &cold_hash, &hot_hash)
            };
            entries[parent_slot].set_node_hash(parent_hash);
            new_hashes.push(parent_hash);
        }
        Ok(new_hashes)
    }

    fn set_root_hash(&self, root_hash: &Digest) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.iter_mut().for_each(|entry| *entry = Entry::Empty);
        entries[0] = Entry::Verified {
            node_id: ROOT_NODE_ID,
            node_hash: *root_hash,
            left_cached: false,
            right_cached: false,
        };
        debug!("[NodeCache] root hash set, {} entries cleared", self.capacity);
        Ok(())
    }
}

impl Debug for SoftNodeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("SoftNodeCache")
            .field("capacity", &self.capacity)
            .field("leaf_count", &self.leaf_count)
            .field(
                "verified",
                &entries.iter().filter(|entry| entry.is_verified()).count(),
            )
            .finish()
    }
}
