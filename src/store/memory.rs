//! Process-local storage backend.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use stowage_common::{Error, ImageId, Result};

use super::{stream_from_bytes, ByteStream, StorageBackend, StoredData};

/// Holds image data in a map keyed by `memory://{image_id}` URLs.
///
/// An optional byte capacity and a read-only switch let callers reproduce
/// the backend failures a real medium reports.
#[derive(Default)]
pub struct MemoryBackend {
    objects: Mutex<HashMap<String, Bytes>>,
    capacity: Option<u64>,
    read_only: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse writes that would take the total past `bytes`.
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Refuse every write.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// URL an image's data is written under.
    pub fn url_for(image_id: ImageId) -> String {
        format!("memory://{}", image_id)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.objects.lock().contains_key(url)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn used_bytes(&self) -> u64 {
        self.objects.lock().values().map(|b| b.len() as u64).sum()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn add(
        &self,
        image_id: ImageId,
        mut data: ByteStream,
        _size: Option<u64>,
    ) -> Result<StoredData> {
        if self.read_only {
            return Err(Error::StorageWriteDenied(
                "memory store is read-only".to_string(),
            ));
        }

        let url = Self::url_for(image_id);
        if self.contains(&url) {
            return Err(Error::Duplicate(format!("Data for {} already exists", url)));
        }

        let mut hasher = Sha256::new();
        let mut buf = Vec::new();
        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            buf.extend_from_slice(&chunk);
        }
        let size = buf.len() as u64;

        let mut objects = self.objects.lock();
        if let Some(capacity) = self.capacity {
            let used: u64 = objects.values().map(|b| b.len() as u64).sum();
            if used + size > capacity {
                return Err(Error::StorageFull(format!(
                    "{} bytes requested, {} of {} bytes free",
                    size,
                    capacity.saturating_sub(used),
                    capacity
                )));
            }
        }
        if objects.contains_key(&url) {
            return Err(Error::Duplicate(format!("Data for {} already exists", url)));
        }
        objects.insert(url.clone(), Bytes::from(buf));

        tracing::debug!(%image_id, size, "Stored image data in memory");

        Ok(StoredData {
            url,
            size,
            checksum: hex::encode(hasher.finalize()),
        })
    }

    async fn get(&self, url: &str) -> Result<ByteStream> {
        let data = self
            .objects
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("No image data at {}", url)))?;
        Ok(stream_from_bytes(data))
    }

    async fn delete(&self, url: &str) -> Result<()> {
        self.objects
            .lock()
            .remove(url)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("No image data at {}", url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::collect_stream;

    #[tokio::test]
    async fn test_add_get_delete() {
        let backend = MemoryBackend::new();
        let id = ImageId::new();

        let stored = backend
            .add(id, stream_from_bytes(&b"hello"[..]), None)
            .await
            .unwrap();
        assert_eq!(stored.size, 5);
        assert_eq!(stored.url, MemoryBackend::url_for(id));
        assert_eq!(
            stored.checksum,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );

        let data = collect_stream(backend.get(&stored.url).await.unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"hello");

        backend.delete(&stored.url).await.unwrap();
        assert_eq!(backend.object_count(), 0);
        assert!(matches!(
            backend.delete(&stored.url).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_write() {
        let backend = MemoryBackend::new();
        let id = ImageId::new();
        backend.add(id, stream_from_bytes(&b"a"[..]), None).await.unwrap();

        let err = backend
            .add(id, stream_from_bytes(&b"b"[..]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_capacity_and_read_only() {
        let backend = MemoryBackend::new().with_capacity(4);
        let err = backend
            .add(ImageId::new(), stream_from_bytes(&b"too long"[..]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StorageFull(_)));
        assert_eq!(backend.used_bytes(), 0);

        let backend = MemoryBackend::new().read_only();
        let err = backend
            .add(ImageId::new(), stream_from_bytes(&b"x"[..]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StorageWriteDenied(_)));
    }
}
