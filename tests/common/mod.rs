//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which wires an in-memory DB, an in-memory
//! storage backend and a bus notifier into a full [`Gateway`]. The backend
//! is wrapped in [`CountingBackend`] so tests can assert how often data was
//! written and cleaned up.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use stowage::config::{Config, QuotaConfig, StorageQuota};
use stowage::domain::{ImageData, ImageFactory, ImageHandle, ImageRepo, NewImage};
use stowage::gateway::{Gateway, GatewayImage};
use stowage::notifier::{BusSink, Notification, Notifier};
use stowage::store::{stream_from_bytes, ByteStream, MemoryBackend, StorageBackend, StoredData};
use stowage_common::{Error, ImageId, RequestContext, Result};
use stowage_db::pool::{init_memory_pool, DbPool};

/// Storage backend that counts writes and deletes on top of [`MemoryBackend`].
pub struct CountingBackend {
    pub inner: MemoryBackend,
    adds: AtomicUsize,
    deletes: AtomicUsize,
}

impl CountingBackend {
    pub fn new(inner: MemoryBackend) -> Self {
        Self {
            inner,
            adds: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn adds(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn add(
        &self,
        image_id: ImageId,
        data: ByteStream,
        size: Option<u64>,
    ) -> Result<StoredData> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        self.inner.add(image_id, data, size).await
    }

    async fn get(&self, url: &str) -> Result<ByteStream> {
        self.inner.get(url).await
    }

    async fn delete(&self, url: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(url).await
    }
}

/// Test harness wrapping a fully-constructed [`Gateway`].
pub struct TestHarness {
    pub gateway: Gateway,
    pub db: DbPool,
    pub backend: Arc<CountingBackend>,
    pub bus: Arc<BusSink>,
    pub ctx: RequestContext,
}

impl TestHarness {
    /// Harness with default (unlimited storage) configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Harness whose owner may store at most `bytes`.
    pub fn with_storage_limit(bytes: i64) -> Self {
        Self::with_quota(QuotaConfig {
            user_storage_quota: StorageQuota::bytes(bytes),
            ..Default::default()
        })
    }

    pub fn with_quota(quota: QuotaConfig) -> Self {
        Self::with_config(Config {
            quota,
            ..Default::default()
        })
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_backend(config, MemoryBackend::new())
    }

    pub fn with_backend(config: Config, backend: MemoryBackend) -> Self {
        let db = init_memory_pool().expect("failed to create in-memory pool");
        let backend = Arc::new(CountingBackend::new(backend));
        let bus = Arc::new(BusSink::new(64));
        let notifier = Notifier::new(bus.clone(), config.notifier.publisher_id.clone());

        let gateway = Gateway::new(
            Arc::new(config),
            db.clone(),
            backend.clone() as Arc<dyn StorageBackend>,
            notifier,
        );

        Self {
            gateway,
            db,
            backend,
            bus,
            ctx: RequestContext::new("tenant-a", "user-a"),
        }
    }

    /// Create and persist a fresh queued image for the harness owner.
    pub async fn create_image(&self) -> GatewayImage {
        self.create_image_with(NewImage::default()).await
    }

    pub async fn create_image_with(&self, params: NewImage) -> GatewayImage {
        let mut image = self
            .gateway
            .image_factory(&self.ctx)
            .new_image(params)
            .expect("new image");
        self.gateway
            .image_repo(&self.ctx)
            .add(&mut image)
            .await
            .expect("add image");
        image
    }

    /// Create an image, upload `data` to it and persist the result.
    pub async fn upload(&self, data: &'static [u8], declared: Option<u64>) -> Result<GatewayImage> {
        let mut image = self.create_image().await;
        image.set_data(stream_from_bytes(data), declared).await?;
        self.gateway.image_repo(&self.ctx).save(&mut image).await?;
        Ok(image)
    }

    /// Like [`upload`](Self::upload) but expects the upload to fail.
    pub async fn upload_err(&self, data: &'static [u8], declared: Option<u64>) -> Error {
        match self.upload(data, declared).await {
            Ok(image) => panic!("upload of {} unexpectedly succeeded", image.image_id()),
            Err(e) => e,
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.bus.event_types()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.bus.recent(usize::MAX)
    }

    /// Last notification of `event_type`, if any.
    pub fn last(&self, event_type: &str) -> Option<Notification> {
        self.notifications()
            .into_iter()
            .rev()
            .find(|n| n.event_type == event_type)
    }

    pub fn consumed(&self) -> u64 {
        self.gateway
            .enforcer()
            .consumed(&self.ctx, None)
            .expect("storage usage")
    }
}
