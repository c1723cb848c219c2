//! Image data storage.
//!
//! A [`StorageBackend`] moves image bytes in and out of some medium and
//! hands back a location URL. The store proxies in [`proxy`] attach that
//! behaviour to images and repositories so the layers above see
//! `set_data` / `get_data` as ordinary image operations.

mod memory;
mod proxy;

pub use memory::MemoryBackend;
pub use proxy::{StoreImage, StoreImageFactory, StoreImageRepo};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use stowage_common::{ImageId, Result};

/// Image data in flight.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Outcome of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredData {
    /// Where the data can be read back from.
    pub url: String,
    /// Bytes actually written.
    pub size: u64,
    /// Hex SHA-256 of the written data.
    pub checksum: String,
}

/// A medium that holds image data.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short identifier used in logs (e.g. `"memory"`).
    fn name(&self) -> &'static str;

    /// Write `data` for `image_id`. `size` is the caller's declared size, if any.
    async fn add(&self, image_id: ImageId, data: ByteStream, size: Option<u64>)
        -> Result<StoredData>;

    /// Read back the data at `url`.
    async fn get(&self, url: &str) -> Result<ByteStream>;

    /// Remove the data at `url`.
    async fn delete(&self, url: &str) -> Result<()>;
}

/// Delete data from the backend, logging instead of failing.
///
/// Used on cleanup paths where the original error must reach the caller
/// unchanged.
pub async fn safe_delete_from_backend(backend: &dyn StorageBackend, url: &str, image_id: ImageId) {
    match backend.delete(url).await {
        Ok(()) => tracing::debug!(%image_id, url, "Deleted image data"),
        Err(e) => tracing::error!(
            %image_id,
            url,
            backend = backend.name(),
            "Failed to delete image data: {}",
            e
        ),
    }
}

/// Wrap an in-memory buffer as a single-chunk stream.
pub fn stream_from_bytes(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Drain a stream into one buffer.
pub async fn collect_stream(mut stream: ByteStream) -> std::io::Result<Bytes> {
    use futures::StreamExt;

    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(buf))
}
