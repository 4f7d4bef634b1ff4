//! The server front end: sessions over a booted S-P pair.
use super::hash_tree_controller::HashTreeController;
use super::session_allocator::{SessionAllocator, SessionId};
use crate::layers::bio::Store;
use crate::layers::crypto::{Certificate, Digest, Mac, Nonce};
use crate::layers::merkle::HashTree;
use crate::layers::pchip::PChip;
use crate::layers::schip::SoftSChip;
use crate::os::Mutex;
use crate::prelude::*;
use crate::util::{CacheMetrics, NoMetrics};

/// Glues the store, the hash tree and the S-P chip pair together.
///
/// Every block read or written through a session comes back with an HMAC
/// that the P chip computes under the session's key over the block's
/// position and hash. Clients trust data only if the HMAC checks out.
///
/// # Thread safety
///
/// `Controller` is `Sync`. Requests are serialized internally: the hash
/// tree, the node cache and the session cache are updated together under
/// one lock.
pub struct Controller<P: PChip, S: Store> {
    store: S,
    p_chip: Arc<P>,
    endorsement_certificate: Certificate,
    inner: Mutex<ControllerInner<P>>,
}

struct ControllerInner<P: PChip> {
    allocator: SessionAllocator,
    hash_tree_controller: HashTreeController<Arc<P::NodeCache>>,
}

impl<P: PChip, S: Store> Controller<P, S> {
    /// Boots `p_chip` against `s_chip` and starts serving `store`, whose
    /// contents `tree` describes.
    pub fn new(store: S, tree: HashTree, s_chip: &SoftSChip, p_chip: Arc<P>) -> Result<Self> {
        Self::with_metrics(store, tree, s_chip, p_chip, Arc::new(NoMetrics))
    }

    /// Like `new`, reporting node cache events to `metrics`.
    pub fn with_metrics(
        store: S,
        tree: HashTree,
        s_chip: &SoftSChip,
        p_chip: Arc<P>,
        metrics: Arc<dyn CacheMetrics>,
    ) -> Result<Self> {
        if tree.capacity() < store.block_count() {
            return_errno_with_msg!(InvalidArgs, "hash tree does not cover the store");
        }
        Self::boot_sp_pair(s_chip, p_chip.as_ref())?;

        let Some(root_hash) = p_chip.boot_logic().root_hash() else {
            return_errno_with_msg!(BootFailed, "P chip did not boot");
        };
        let allocator = SessionAllocator::new(p_chip.session_cache());
        let hash_tree_controller =
            HashTreeController::with_metrics(p_chip.node_cache(), tree, root_hash, metrics)?;
        info!(
            "[Controller] serving {} blocks of {} bytes",
            store.block_count(),
            store.block_size()
        );
        Ok(Self {
            store,
            p_chip,
            endorsement_certificate: s_chip.endorsement_certificate().clone(),
            inner: Mutex::new(ControllerInner {
                allocator,
                hash_tree_controller,
            }),
        })
    }

    /// Boots the S-P chip pair that forms the system's TCB.
    fn boot_sp_pair(s_chip: &SoftSChip, p_chip: &P) -> Result<()> {
        let (encrypted_nonce, nonce_hmac) =
            p_chip.boot_start(s_chip.puf_syndrome(), s_chip.endorsement_certificate())?;
        let (root_hash, state_hmac, encrypted_endorsement_key) =
            s_chip.boot(&encrypted_nonce, &nonce_hmac)?;
        p_chip.boot_finish(&root_hash, &state_hmac, &encrypted_endorsement_key)
    }

    /// The certificate of the P chip's endorsement key. Clients encrypt
    /// their session keys under the key it certifies.
    pub fn endorsement_certificate(&self) -> &Certificate {
        &self.endorsement_certificate
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn p_chip(&self) -> &Arc<P> {
        &self.p_chip
    }

    pub fn block_size(&self) -> usize {
        self.store.block_size()
    }

    pub fn block_count(&self) -> usize {
        self.store.block_count()
    }

    /// The root hash of the store's current contents.
    pub fn root_hash(&self) -> Digest {
        self.inner.lock().hash_tree_controller.tree().root_hash()
    }

    /// Opens a session for a session key encrypted under the endorsement
    /// key.
    pub fn session(&self, encrypted_session_key: &[u8]) -> Result<Session<'_, P, S>> {
        let id = self
            .inner
            .lock()
            .allocator
            .new_id(encrypted_session_key)?;
        Ok(Session {
            id,
            controller: self,
        })
    }

    fn close_session(&self, session_id: SessionId) -> Result<()> {
        self.inner.lock().allocator.release_id(session_id)
    }

    /// Reads a block; returns its data and the HMAC certifying it.
    fn read_block(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        nonce: &Nonce,
    ) -> Result<(Vec<u8>, Mac)> {
        self.check_block_id(block_id)?;
        let mut inner = self.inner.lock();
        let session = inner.allocator.session_cache_entry(session_id)?;
        let data = self.store.read_block(block_id)?;
        match inner
            .hash_tree_controller
            .sign_read_block(block_id, session, nonce)
        {
            Ok(hmac) => Ok((data, hmac)),
            Err(e) => {
                warn!(
                    "[Controller] signing read of block {} failed: {:?}",
                    block_id, e
                );
                inner.hash_tree_controller.reset_cache()?;
                Err(e)
            }
        }
    }

    /// Writes a block; returns the HMAC certifying the new data.
    ///
    /// On failure the block keeps its old contents.
    fn write_block(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        data: &[u8],
        nonce: &Nonce,
    ) -> Result<Mac> {
        self.check_block_id(block_id)?;
        if data.len() != self.store.block_size() {
            return_errno_with_msg!(SizeMismatch, "data is not one block");
        }
        let mut inner = self.inner.lock();
        let session = inner.allocator.session_cache_entry(session_id)?;
        let old_data = self.store.read_block(block_id)?;
        self.store.write_block(block_id, data)?;
        let data_hash = self.p_chip.hash_block(data);
        match inner
            .hash_tree_controller
            .sign_write_block(block_id, &data_hash, session, nonce)
        {
            Ok(hmac) => Ok(hmac),
            Err(e) => {
                warn!(
                    "[Controller] signing write of block {} failed: {:?}",
                    block_id, e
                );
                self.store.write_block(block_id, &old_data)?;
                inner.hash_tree_controller.reset_cache()?;
                Err(e)
            }
        }
    }

    fn check_block_id(&self, block_id: BlockId) -> Result<()> {
        if block_id >= self.store.block_count() {
            return_errno_with_msg!(OutOfRange, "block id exceeds store size");
        }
        Ok(())
    }
}

impl<P: PChip, S: Store> Debug for Controller<P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Controller")
            .field("block_size", &self.store.block_size())
            .field("block_count", &self.store.block_count())
            .field("allocator", &inner.allocator)
            .field("hash_tree_controller", &inner.hash_tree_controller)
            .finish()
    }
}

/// A client's session with a `Controller`.
///
/// All blocks served through a session are certified under its session
/// key. Dropping a session without `close` keeps its key cached until the
/// controller goes away.
pub struct Session<'a, P: PChip, S: Store> {
    id: SessionId,
    controller: &'a Controller<P, S>,
}

impl<'a, P: PChip, S: Store> Session<'a, P, S> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn block_size(&self) -> usize {
        self.controller.block_size()
    }

    pub fn block_count(&self) -> usize {
        self.controller.block_count()
    }

    /// Reads block `block_id`; the HMAC covers `nonce`, the block's tree
    /// position and the hash of the returned data.
    pub fn read_block(&self, block_id: BlockId, nonce: &Nonce) -> Result<(Vec<u8>, Mac)> {
        self.controller.read_block(self.id, block_id, nonce)
    }

    /// Writes block `block_id`; the HMAC certifies the new data.
    pub fn write_block(&self, block_id: BlockId, data: &[u8], nonce: &Nonce) -> Result<Mac> {
        self.controller.write_block(self.id, block_id, data, nonce)
    }

    pub fn close(self) -> Result<()> {
        self.controller.close_session(self.id)
    }
}

impl<'a, P: PChip, S: Store> Debug for Session<'a, P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::bio::MemStore;
    use crate::layers::crypto::{crypto_hash, hmac_for_block, HmacKey};
    use crate::layers::merkle::leaf_node_id;
    use crate::layers::pchip::{HardPChip, SoftPChip};
    use crate::layers::schip::FactoryKeys;

    const BLOCK_SIZE: usize = 64;
    const BLOCK_COUNT: usize = 100;

    /// A client holding a session key, checking every HMAC it gets back.
    struct Client {
        key: HmacKey,
        leaf_count: usize,
    }

    impl Client {
        fn open<'a, P: PChip, S: Store>(
            controller: &'a Controller<P, S>,
        ) -> Result<(Self, Session<'a, P, S>)> {
            let key = HmacKey::random();
            let encrypted = controller
                .endorsement_certificate()
                .public_key()?
                .encrypt(&key)?;
            let session = controller.session(&encrypted)?;
            let leaf_count = controller.inner.lock().hash_tree_controller.capacity();
            Ok((Self { key, leaf_count }, session))
        }

        fn check(&self, block_id: BlockId, data: &[u8], nonce: &Nonce, mac: &Mac) -> bool {
            let node_id = leaf_node_id(self.leaf_count, block_id);
            hmac_for_block(node_id, data, nonce, &self.key).unwrap() == *mac
        }
    }

    fn soft_controller(
        tree_of: impl FnOnce(&MemStore) -> Result<HashTree>,
    ) -> Result<Controller<SoftPChip, MemStore>> {
        let factory = FactoryKeys::generate()?;
        let store = MemStore::create(BLOCK_SIZE, BLOCK_COUNT)?;
        let tree = HashTree::for_store(&store)?;
        let (s_chip, p_key) = factory.provision(tree.root_hash())?;
        let p_chip = SoftPChip::new(p_key, factory.ca_public_key()?, 16, BLOCK_COUNT, 2)?;
        let served_tree = tree_of(&store)?;
        Controller::new(store, served_tree, &s_chip, Arc::new(p_chip))
    }

    fn read_write_cycle<P: PChip, S: Store>(controller: &Controller<P, S>) -> Result<()> {
        let (client, session) = Client::open(controller)?;
        assert_eq!(session.block_size(), BLOCK_SIZE);
        assert_eq!(session.block_count(), BLOCK_COUNT);

        let nonce = Nonce::random();
        let (data, mac) = session.read_block(7, &nonce)?;
        assert_eq!(data, vec![0u8; BLOCK_SIZE]);
        assert!(client.check(7, &data, &nonce, &mac));

        let new_data = vec![0xA5u8; BLOCK_SIZE];
        let nonce = Nonce::random();
        let mac = session.write_block(7, &new_data, &nonce)?;
        assert!(client.check(7, &new_data, &nonce, &mac));

        let nonce = Nonce::random();
        let (data, mac) = session.read_block(7, &nonce)?;
        assert_eq!(data, new_data);
        assert!(client.check(7, &data, &nonce, &mac));

        let mut reference = HashTree::new(BLOCK_COUNT, crypto_hash(&[0u8; BLOCK_SIZE]));
        reference.set_leaf(7, crypto_hash(&new_data))?;
        assert_eq!(controller.root_hash(), reference.root_hash());
        assert_eq!(
            controller.inner.lock().hash_tree_controller.trusted_root(),
            reference.root_hash()
        );
        session.close()
    }

    #[test]
    fn soft_controller_read_write() -> Result<()> {
        let controller = soft_controller(|store| HashTree::for_store(store))?;
        read_write_cycle(&controller)
    }

    #[test]
    fn loopback_controller_read_write() -> Result<()> {
        let factory = FactoryKeys::generate()?;
        let store = MemStore::create(BLOCK_SIZE, BLOCK_COUNT)?;
        let tree = HashTree::for_store(&store)?;
        let (s_chip, p_key) = factory.provision(tree.root_hash())?;
        let p_chip = HardPChip::loopback(p_key, factory.ca_public_key()?, 16, BLOCK_COUNT, 2)?;
        let controller = Controller::new(store, tree, &s_chip, Arc::new(p_chip))?;
        read_write_cycle(&controller)
    }

    #[test]
    fn tampered_store_fails_client_check() -> Result<()> {
        let controller = soft_controller(|store| HashTree::for_store(store))?;
        let (client, session) = Client::open(&controller)?;
        controller.store().write_block(3, &[0xFFu8; BLOCK_SIZE])?;

        let nonce = Nonce::random();
        let (data, mac) = session.read_block(3, &nonce)?;
        assert!(!client.check(3, &data, &nonce, &mac));
        Ok(())
    }

    #[test]
    fn sessions_outnumber_cache_slots() -> Result<()> {
        let controller = soft_controller(|store| HashTree::for_store(store))?;
        let clients = (0..5)
            .map(|_| Client::open(&controller))
            .collect::<Result<Vec<_>>>()?;
        for round in 0..3 {
            for (i, (client, session)) in clients.iter().enumerate() {
                let block_id = (i * 13 + round * 7) % BLOCK_COUNT;
                let nonce = Nonce::random();
                let (data, mac) = session.read_block(block_id, &nonce)?;
                assert!(client.check(block_id, &data, &nonce, &mac));
            }
        }
        Ok(())
    }

    #[test]
    fn rejects_bad_requests() -> Result<()> {
        let controller = soft_controller(|store| HashTree::for_store(store))?;
        let (_client, session) = Client::open(&controller)?;
        let nonce = Nonce::random();
        // The tree has 128 leaves but the store only 100 blocks.
        assert_eq!(
            session.read_block(BLOCK_COUNT, &nonce).unwrap_err().errno(),
            OutOfRange
        );
        assert_eq!(
            session.write_block(0, &[1u8; 3], &nonce).unwrap_err().errno(),
            SizeMismatch
        );
        assert!(controller.session(&[0u8; 16]).is_err());

        let id = session.id();
        session.close()?;
        assert_eq!(
            controller.read_block(id, 0, &nonce).unwrap_err().errno(),
            SessionNotFound
        );
        Ok(())
    }

    #[test]
    fn failed_write_restores_block() -> Result<()> {
        // A tree that disagrees with the S chip's root hash.
        let controller = soft_controller(|store| {
            let mut tree = HashTree::for_store(store)?;
            tree.set_leaf(50, crypto_hash(b"stale"))?;
            Ok(tree)
        })?;
        let (_client, session) = Client::open(&controller)?;
        let nonce = Nonce::random();
        let root = controller.root_hash();

        assert_eq!(
            session
                .write_block(9, &[7u8; BLOCK_SIZE], &nonce)
                .unwrap_err()
                .errno(),
            HashMismatch
        );
        assert_eq!(controller.store().read_block(9)?, vec![0u8; BLOCK_SIZE]);
        assert_eq!(controller.root_hash(), root);
        // The cache was reset to the booted root, not the served one.
        for _ in 0..2 {
            assert_eq!(
                session.read_block(9, &nonce).unwrap_err().errno(),
                HashMismatch
            );
        }
        Ok(())
    }
}
