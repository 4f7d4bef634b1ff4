use super::config::StoreConfig;
use super::controller::Controller;
use crate::layers::bio::{MemStore, Store};
use crate::layers::crypto::{PublicKey, SkKey};
use crate::layers::merkle::HashTree;
use crate::layers::pchip::{HardPChip, LoopbackLink, PChip, SoftPChip};
use crate::layers::schip::FactoryKeys;
use crate::prelude::*;
use crate::util::{CacheMetrics, NoMetrics};

/// Builds complete S-P stores: factory keys, a store, a provisioned S chip,
/// a P chip and the controller tying them together.
///
/// # Usage Example
///
/// ```
/// let setup = StoreSetup::new(StoreConfig::new().block_count(4096))?;
/// let controller = setup.soft_controller()?;
/// let session = controller.session(&encrypted_session_key)?;
/// let (data, hmac) = session.read_block(0, &nonce)?;
/// ```
pub struct StoreSetup {
    config: StoreConfig,
    factory: FactoryKeys,
    metrics: Arc<dyn CacheMetrics>,
}

impl StoreSetup {
    /// Validates `config` and creates a fresh development CA.
    pub fn new(config: StoreConfig) -> Result<Self> {
        Self::with_factory(config, FactoryKeys::generate()?)
    }

    /// Like `new`, with an existing CA.
    pub fn with_factory(config: StoreConfig, factory: FactoryKeys) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            factory,
            metrics: Arc::new(NoMetrics),
        })
    }

    /// Reports the node cache events of every controller built afterwards
    /// to `metrics`.
    pub fn metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn factory(&self) -> &FactoryKeys {
        &self.factory
    }

    /// A controller over a zero-filled in-memory store and a software P
    /// chip.
    pub fn soft_controller(&self) -> Result<Controller<SoftPChip, MemStore>> {
        let config = self.config;
        self.controller(self.empty_store()?, |p_key, ca_public_key| {
            SoftPChip::new(
                p_key,
                ca_public_key,
                config.node_cache_size,
                config.block_count,
                config.session_cache_size,
            )
        })
    }

    /// A controller whose P chip drives its node cache through the hardware
    /// command codec over a loopback link.
    pub fn loopback_controller(&self) -> Result<Controller<HardPChip<LoopbackLink>, MemStore>> {
        let config = self.config;
        self.controller(self.empty_store()?, |p_key, ca_public_key| {
            HardPChip::loopback(
                p_key,
                ca_public_key,
                config.node_cache_size,
                config.block_count,
                config.session_cache_size,
            )
        })
    }

    /// A controller over an existing `store` and a P chip built by
    /// `new_p_chip` from the P key and the CA's public key.
    ///
    /// The S chip is provisioned with the store's current root hash.
    pub fn controller<P, S, F>(&self, store: S, new_p_chip: F) -> Result<Controller<P, S>>
    where
        P: PChip,
        S: Store,
        F: FnOnce(SkKey, PublicKey) -> Result<P>,
    {
        if store.block_size() != self.config.block_size
            || store.block_count() != self.config.block_count
        {
            return_errno_with_msg!(InvalidArgs, "store does not match the configuration");
        }
        let tree = HashTree::for_store(&store)?;
        let (s_chip, p_key) = self.factory.provision(tree.root_hash())?;
        let p_chip = new_p_chip(p_key, self.factory.ca_public_key()?)?;
        Controller::with_metrics(store, tree, &s_chip, Arc::new(p_chip), self.metrics.clone())
    }

    fn empty_store(&self) -> Result<MemStore> {
        MemStore::create(self.config.block_size, self.config.block_count)
    }
}

impl Debug for StoreSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSetup")
            .field("config", &self.config)
            .field("factory", &self.factory)
            .finish()
    }
}
