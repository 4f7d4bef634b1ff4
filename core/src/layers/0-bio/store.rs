use crate::prelude::*;

use inherit_methods_macro::inherit_methods;

/// A fixed set of equally-sized data blocks supporting random reads and writes.
///
/// # Thread safety
///
/// `Store` is a data structure of interior mutability.
/// It is ok to perform I/O on a `Store` concurrently in multiple threads.
/// `Store` promises the atomicity of reading and writing individual blocks.
pub trait Store: Sync + Send {
    /// Reads the block at `block_id`.
    ///
    /// Fails with `OutOfRange` if `block_id >= block_count()`.
    fn read_block(&self, block_id: BlockId) -> Result<Vec<u8>>;

    /// Overwrites the block at `block_id`.
    ///
    /// Fails with `OutOfRange` on a bad id and `SizeMismatch` if `data` is
    /// not exactly `block_size()` bytes.
    fn write_block(&self, block_id: BlockId, data: &[u8]) -> Result<()>;

    /// Returns the number of blocks.
    fn block_count(&self) -> usize;

    /// Returns the size of each block in bytes.
    fn block_size(&self) -> usize;
}

macro_rules! impl_store_pointer {
    ($typ:ty,$from:tt) => {
        #[inherit_methods(from = $from)]
        impl<T: Store> Store for $typ {
            fn read_block(&self, block_id: BlockId) -> Result<Vec<u8>>;
            fn write_block(&self, block_id: BlockId, data: &[u8]) -> Result<()>;
            fn block_count(&self) -> usize;
            fn block_size(&self) -> usize;
        }
    };
}

impl_store_pointer!(&T, "(**self)");
impl_store_pointer!(Box<T>, "(**self)");
impl_store_pointer!(Arc<T>, "(**self)");
