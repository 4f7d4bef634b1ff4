//! The P chip: boot logic plus the caches it guards.
use super::boot_logic::BootLogic;
use super::command::{CommandLink, HardNodeCache, LoopbackLink};
use super::node_cache::{NodeCache, SoftNodeCache};
use super::session_cache::SoftSessionCache;
use crate::layers::crypto::{crypto_hash, Certificate, Digest, Mac, PublicKey, SkKey};
use crate::prelude::*;

/// The untrusted processor's trusted parts, as seen by the server.
///
/// Booting hands the root hash to the node cache and the endorsement key to
/// the session cache. Until then neither cache certifies anything.
pub trait PChip: Send + Sync {
    type NodeCache: NodeCache;

    fn boot_logic(&self) -> &BootLogic;

    /// A handle to the node cache; stays valid across resets.
    fn node_cache(&self) -> Arc<Self::NodeCache>;

    /// A handle to the session key cache; stays valid across resets.
    fn session_cache(&self) -> Arc<SoftSessionCache>;

    /// Hashes a data block the way the node cache expects leaf hashes.
    fn hash_block(&self, data: &[u8]) -> Digest {
        crypto_hash(data)
    }

    fn boot_start(
        &self,
        puf_syndrome: &Digest,
        endorsement_certificate: &Certificate,
    ) -> Result<(Vec<u8>, Mac)> {
        self.boot_logic()
            .boot_start(puf_syndrome, endorsement_certificate)
    }

    fn boot_finish(
        &self,
        root_hash: &Digest,
        state_hmac: &Mac,
        encrypted_endorsement_key: &[u8],
    ) -> Result<()> {
        let endorsement_key =
            self.boot_logic()
                .boot_finish(root_hash, state_hmac, encrypted_endorsement_key)?;
        self.node_cache().set_root_hash(root_hash)?;
        self.session_cache().set_endorsement_key(endorsement_key);
        Ok(())
    }

    /// Drops all boot state and cached keys.
    ///
    /// The node cache is anchored to an all-zero root, which no real tree
    /// hashes to, so nothing verifies until the next boot.
    fn reset(&self) -> Result<()> {
        self.boot_logic().reset();
        self.session_cache().reset();
        self.node_cache().set_root_hash(&Digest::default())
    }
}

/// A P chip simulated entirely in software.
pub struct SoftPChip {
    boot_logic: BootLogic,
    session_cache: Arc<SoftSessionCache>,
    node_cache: Arc<SoftNodeCache>,
}

impl SoftPChip {
    /// Creates a chip holding the P key shared with its S chip and the
    /// manufacturer CA's public key.
    pub fn new(
        p_key: SkKey,
        ca_public_key: PublicKey,
        node_cache_size: usize,
        block_count: usize,
        session_cache_size: usize,
    ) -> Result<Self> {
        let session_cache = Arc::new(SoftSessionCache::new(session_cache_size)?);
        let node_cache = Arc::new(SoftNodeCache::new(
            node_cache_size,
            block_count,
            session_cache.clone(),
        )?);
        Ok(Self {
            boot_logic: BootLogic::new(p_key, ca_public_key),
            session_cache,
            node_cache,
        })
    }
}

impl PChip for SoftPChip {
    type NodeCache = SoftNodeCache;

    fn boot_logic(&self) -> &BootLogic {
        &self.boot_logic
    }

    fn node_cache(&self) -> Arc<SoftNodeCache> {
        self.node_cache.clone()
    }

    fn session_cache(&self) -> Arc<SoftSessionCache> {
        self.session_cache.clone()
    }
}

/// A P chip whose node cache is reached over a `CommandLink`.
///
/// Session keys stay in a software session cache that the far end of the
/// link shares.
pub struct HardPChip<L> {
    boot_logic: BootLogic,
    session_cache: Arc<SoftSessionCache>,
    node_cache: Arc<HardNodeCache<L>>,
}

impl<L: CommandLink> HardPChip<L> {
    pub fn new(
        p_key: SkKey,
        ca_public_key: PublicKey,
        link: L,
        node_cache_size: usize,
        block_count: usize,
        session_cache: Arc<SoftSessionCache>,
    ) -> Result<Self> {
        let node_cache = Arc::new(HardNodeCache::new(node_cache_size, block_count, link)?);
        Ok(Self {
            boot_logic: BootLogic::new(p_key, ca_public_key),
            session_cache,
            node_cache,
        })
    }
}

impl HardPChip<LoopbackLink> {
    /// A chip whose "hardware" is a `SoftNodeCache` behind a `LoopbackLink`,
    /// so every node cache call goes through the command codec.
    pub fn loopback(
        p_key: SkKey,
        ca_public_key: PublicKey,
        node_cache_size: usize,
        block_count: usize,
        session_cache_size: usize,
    ) -> Result<Self> {
        let session_cache = Arc::new(SoftSessionCache::new(session_cache_size)?);
        let soft_cache = Arc::new(SoftNodeCache::new(
            node_cache_size,
            block_count,
            session_cache.clone(),
        )?);
        Self::new(
            p_key,
            ca_public_key,
            LoopbackLink::new(soft_cache),
            node_cache_size,
            block_count,
            session_cache,
        )
    }
}

impl<L: CommandLink> PChip for HardPChip<L> {
    type NodeCache = HardNodeCache<L>;

    fn boot_logic(&self) -> &BootLogic {
        &self.boot_logic
    }

    fn node_cache(&self) -> Arc<HardNodeCache<L>> {
        self.node_cache.clone()
    }

    fn session_cache(&self) -> Arc<SoftSessionCache> {
        self.session_cache.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::crypto::{
        hmac, hmac_for_block_hash, sk_decrypt, sk_encrypt, HmacKey, KeyPair, Nonce,
    };
    use crate::layers::merkle::HashTree;
    use crate::layers::pchip::BootState;

    /// Boots `p_chip` by playing the S chip's part by hand.
    fn boot(
        p_chip: &impl PChip,
        p_key: &SkKey,
        endorsement_key: &KeyPair,
        certificate: &Certificate,
        root_hash: &Digest,
    ) -> Result<()> {
        let (encrypted_nonce, _) = p_chip.boot_start(&crypto_hash(p_key), certificate)?;
        let boot_nonce = sk_decrypt(p_key, &encrypted_nonce)?;
        let state_hmac = hmac(p_key, &[&root_hash[..], &boot_nonce[..]].concat())?;
        let encrypted_key = sk_encrypt(p_key, &endorsement_key.to_der()?)?;
        p_chip.boot_finish(root_hash, &state_hmac, &encrypted_key)
    }

    fn boot_and_certify(p_chip: &impl PChip, p_key: SkKey, ca_keys: &KeyPair) -> Result<()> {
        let endorsement_key = KeyPair::generate()?;
        let certificate = Certificate::issue(
            "Test P Chip",
            1,
            2,
            ca_keys,
            None,
            &endorsement_key.public_key()?,
        )?;
        let tree = HashTree::new(16, crypto_hash(&[0u8; 64]));
        let nonce = Nonce::random();
        assert_eq!(
            p_chip
                .node_cache()
                .certify(0, &nonce, 0)
                .unwrap_err()
                .errno(),
            NotVerified
        );

        boot(p_chip, &p_key, &endorsement_key, &certificate, &tree.root_hash())?;
        assert!(matches!(
            p_chip.boot_logic().state(),
            BootState::Booted { .. }
        ));

        let session_key = HmacKey::random();
        let session_cache = p_chip.session_cache();
        let processed =
            session_cache.process_key(&endorsement_key.public_key()?.encrypt(&session_key)?)?;
        session_cache.load(0, &processed)?;
        assert_eq!(
            p_chip.node_cache().certify(0, &nonce, 0)?,
            hmac_for_block_hash(1, &tree.root_hash(), &nonce, &session_key)?
        );

        p_chip.reset()?;
        assert!(matches!(p_chip.boot_logic().state(), BootState::Reset));
        assert_eq!(
            p_chip
                .node_cache()
                .certify(0, &nonce, 0)
                .unwrap_err()
                .errno(),
            SessionNotLoaded
        );
        assert_eq!(
            session_cache.process_key(&[0u8; 256]).unwrap_err().errno(),
            InvalidBootState
        );
        Ok(())
    }

    #[test]
    fn soft_p_chip_lifecycle() -> Result<()> {
        let p_key = SkKey::random();
        let ca_keys = KeyPair::generate()?;
        let p_chip = SoftPChip::new(p_key, ca_keys.public_key()?, 8, 16, 2)?;
        boot_and_certify(&p_chip, p_key, &ca_keys)
    }

    #[test]
    fn hard_p_chip_lifecycle() -> Result<()> {
        let p_key = SkKey::random();
        let ca_keys = KeyPair::generate()?;
        let p_chip = HardPChip::loopback(p_key, ca_keys.public_key()?, 8, 16, 2)?;
        boot_and_certify(&p_chip, p_key, &ca_keys)
    }

    #[test]
    fn hash_block_matches_leaf_hash() -> Result<()> {
        let ca_keys = KeyPair::generate()?;
        let p_chip = SoftPChip::new(SkKey::random(), ca_keys.public_key()?, 8, 16, 2)?;
        assert_eq!(p_chip.hash_block(b"data"), crypto_hash(b"data"));
        Ok(())
    }
}
