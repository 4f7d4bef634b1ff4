use super::hash_tree_controller::min_node_cache_size;
use crate::layers::merkle::full_tree_leaf_count;
use crate::layers::pchip::MAX_NODE_ID;
use crate::prelude::*;

use serde::{Deserialize, Serialize};

/// Sizes of an S-P store.
///
/// # Usage Example
///
/// ```
/// let config = StoreConfig::new()
///     .block_size(4096)
///     .block_count(1 << 16)
///     .node_cache_size(128);
/// config.validate()?;
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub block_size: usize,
    pub block_count: usize,
    pub node_cache_size: usize,
    pub session_cache_size: usize,
}

impl StoreConfig {
    pub fn new() -> Self {
        Self {
            block_size: 1024,
            block_count: 1024,
            node_cache_size: 64,
            session_cache_size: 64,
        }
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn block_count(mut self, block_count: usize) -> Self {
        self.block_count = block_count;
        self
    }

    pub fn node_cache_size(mut self, node_cache_size: usize) -> Self {
        self.node_cache_size = node_cache_size;
        self
    }

    pub fn session_cache_size(mut self, session_cache_size: usize) -> Self {
        self.session_cache_size = session_cache_size;
        self
    }

    /// Number of leaves of the hash tree covering `block_count` blocks.
    pub fn leaf_count(&self) -> usize {
        full_tree_leaf_count(self.block_count)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return_errno_with_msg!(InvalidArgs, "block_size must be greater than 0");
        }
        if self.block_count == 0 {
            return_errno_with_msg!(InvalidArgs, "block_count must be greater than 0");
        }
        if self.session_cache_size == 0 {
            return_errno_with_msg!(InvalidArgs, "session_cache_size must be greater than 0");
        }
        if self.block_count > (MAX_NODE_ID + 1) / 2 {
            return_errno_with_msg!(InvalidArgs, "block_count too large for 24-bit node ids");
        }
        if self.node_cache_size < min_node_cache_size(self.leaf_count()) {
            return_errno_with_msg!(
                InvalidArgs,
                "node_cache_size must hold a leaf-to-root path with siblings"
            );
        }
        if self.node_cache_size > u16::MAX as usize + 1 {
            return_errno_with_msg!(InvalidArgs, "node_cache_size must fit 16-bit slots");
        }
        if self.session_cache_size > u16::MAX as usize + 1 {
            return_errno_with_msg!(InvalidArgs, "session_cache_size must fit 16-bit slots");
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self)
            .map_err(|_| Error::with_msg(IoFailed, "serialize StoreConfig failed"))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes)
            .map_err(|_| Error::with_msg(InvalidArgs, "deserialize StoreConfig failed"))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() -> Result<()> {
        let config = StoreConfig::default();
        assert_eq!(config.block_size, 1024);
        assert_eq!(config.block_count, 1024);
        assert_eq!(config.node_cache_size, 64);
        assert_eq!(config.session_cache_size, 64);
        config.validate()
    }

    #[test]
    fn validate_rejects_bad_sizes() {
        let bad = [
            StoreConfig::new().block_size(0),
            StoreConfig::new().block_count(0),
            StoreConfig::new().session_cache_size(0),
            StoreConfig::new().node_cache_size(20),
            StoreConfig::new().node_cache_size(1 << 17),
            StoreConfig::new().block_count(1 << 24).node_cache_size(1024),
        ];
        for config in bad {
            assert_eq!(config.validate().unwrap_err().errno(), InvalidArgs);
        }
        // 1000 blocks round up to 1024 leaves: 10 levels.
        assert!(StoreConfig::new()
            .block_count(1000)
            .node_cache_size(21)
            .validate()
            .is_ok());
    }

    #[test]
    fn persist() -> Result<()> {
        let config = StoreConfig::new().block_size(4096).session_cache_size(4);
        assert_eq!(StoreConfig::from_bytes(&config.to_bytes()?)?, config);
        assert!(StoreConfig::from_bytes(&[1]).is_err());
        Ok(())
    }
}
