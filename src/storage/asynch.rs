use zarrs::storage::{
    AsyncListableStorageTraits, AsyncMaybeBytesIterator, AsyncReadableStorageTraits,
    ListableStorageTraits, MaybeBytes, ReadableStorageTraits, StorageError, StoreKey, StoreKeys,
    StoreKeysPrefixes, StorePrefix,
    byte_range::{ByteRange, ByteRangeIterator},
};

use super::VirtualChunkStore;

// Chunk reads are single positioned reads and the metadata store is
// synchronous, so the async traits answer inline.

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
impl<R> AsyncReadableStorageTraits for VirtualChunkStore<R>
where
    R: ReadableStorageTraits + ListableStorageTraits + ?Sized,
{
    async fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        ReadableStorageTraits::get(self, key)
    }

    async fn get_partial(
        &self,
        _key: &StoreKey,
        _byte_range: ByteRange,
    ) -> Result<MaybeBytes, StorageError> {
        Err(StorageError::Unsupported(
            "get_partial not supported".into(),
        ))
    }

    async fn get_partial_many<'a>(
        &'a self,
        _key: &StoreKey,
        _byte_ranges: ByteRangeIterator<'a>,
    ) -> Result<AsyncMaybeBytesIterator<'a>, StorageError> {
        Err(StorageError::Unsupported(
            "get_partial_many not supported".into(),
        ))
    }

    async fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        ReadableStorageTraits::size_key(self, key)
    }

    fn supports_get_partial(&self) -> bool {
        false
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
impl<R> AsyncListableStorageTraits for VirtualChunkStore<R>
where
    R: ReadableStorageTraits + ListableStorageTraits + ?Sized,
{
    async fn list(&self) -> Result<StoreKeys, StorageError> {
        ListableStorageTraits::list(self)
    }

    async fn list_prefix(&self, prefix: &StorePrefix) -> Result<StoreKeys, StorageError> {
        ListableStorageTraits::list_prefix(self, prefix)
    }

    async fn list_dir(&self, prefix: &StorePrefix) -> Result<StoreKeysPrefixes, StorageError> {
        ListableStorageTraits::list_dir(self, prefix)
    }

    async fn size_prefix(&self, prefix: &StorePrefix) -> Result<u64, StorageError> {
        ListableStorageTraits::size_prefix(self, prefix)
    }

    async fn size(&self) -> Result<u64, StorageError> {
        ListableStorageTraits::size(self)
    }
}
