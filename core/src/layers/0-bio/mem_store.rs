use super::Store;
use crate::os::Mutex;
use crate::prelude::*;

/// A memory-backed store.
pub struct MemStore {
    blocks: Mutex<Vec<Vec<u8>>>,
    block_size: usize,
}

impl MemStore {
    /// Creates a store of `block_count` zero-filled blocks.
    pub fn create(block_size: usize, block_count: usize) -> Result<Self> {
        if block_size == 0 || block_count == 0 {
            return_errno_with_msg!(InvalidArgs, "store must hold at least one non-empty block");
        }
        Ok(Self {
            blocks: Mutex::new(vec![vec![0u8; block_size]; block_count]),
            block_size,
        })
    }

    fn check_block_id(&self, block_id: BlockId) -> Result<()> {
        if block_id >= self.block_count() {
            return_errno_with_msg!(OutOfRange, "block id exceeds store size");
        }
        Ok(())
    }
}

impl Store for MemStore {
    fn read_block(&self, block_id: BlockId) -> Result<Vec<u8>> {
        self.check_block_id(block_id)?;
        Ok(self.blocks.lock()[block_id].clone())
    }

    fn write_block(&self, block_id: BlockId, data: &[u8]) -> Result<()> {
        self.check_block_id(block_id)?;
        if data.len() != self.block_size {
            return_errno_with_msg!(SizeMismatch, "wrong data buffer size");
        }
        self.blocks.lock()[block_id].copy_from_slice(data);
        Ok(())
    }

    fn block_count(&self) -> usize {
        self.blocks.lock().len()
    }

    fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Debug for MemStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemStore")
            .field("block_size", &self.block_size)
            .field("block_count", &self.block_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_store_fns() -> Result<()> {
        let store = Arc::new(MemStore::create(16, 8)?);
        assert_eq!(store.block_count(), 8);
        assert_eq!(store.block_size(), 16);
        assert_eq!(store.read_block(3)?, vec![0u8; 16]);

        store.write_block(3, &[7u8; 16])?;
        assert_eq!(store.read_block(3)?, vec![7u8; 16]);
        // Through the pointer impl.
        let shared: Arc<MemStore> = store.clone();
        assert_eq!(Store::read_block(&shared, 3)?, vec![7u8; 16]);
        Ok(())
    }

    #[test]
    fn mem_store_errors() -> Result<()> {
        let store = MemStore::create(16, 8)?;
        assert_eq!(store.read_block(8).unwrap_err().errno(), OutOfRange);
        assert_eq!(
            store.write_block(8, &[0u8; 16]).unwrap_err().errno(),
            OutOfRange
        );
        assert_eq!(
            store.write_block(0, &[0u8; 15]).unwrap_err().errno(),
            SizeMismatch
        );
        assert_eq!(MemStore::create(0, 8).unwrap_err().errno(), InvalidArgs);
        Ok(())
    }
}
