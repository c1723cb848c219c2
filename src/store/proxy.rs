//! Store layer: gives images a data path through a [`StorageBackend`].

use async_trait::async_trait;
use std::sync::Arc;
use stowage_common::{Error, Image, ImageId, ImageStatus, Location, NewImage, Result};

use super::{safe_delete_from_backend, ByteStream, StorageBackend};
use crate::domain::{
    ImageAttributesMut, ImageData, ImageFactory, ImageFilter, ImageHandle, ImageRepo,
};
use crate::guard::{GuardedLocations, GuardedTags};

/// An image whose data lives in `backend`.
pub struct StoreImage<I> {
    inner: I,
    backend: Arc<dyn StorageBackend>,
}

impl<I: ImageHandle> StoreImage<I> {
    pub fn new(inner: I, backend: Arc<dyn StorageBackend>) -> Self {
        Self { inner, backend }
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut I {
        &mut self.inner
    }

    pub fn into_inner(self) -> I {
        self.inner
    }
}

impl<I: ImageHandle> ImageHandle for StoreImage<I> {
    fn image(&self) -> &Image {
        self.inner.image()
    }

    fn attributes_mut(&mut self) -> ImageAttributesMut<'_> {
        self.inner.attributes_mut()
    }

    fn tags(&mut self) -> GuardedTags<'_> {
        self.inner.tags()
    }

    fn locations(&mut self) -> GuardedLocations<'_> {
        self.inner.locations()
    }

    fn delete(&mut self) -> Result<()> {
        self.inner.delete()
    }
}

#[async_trait]
impl<I: ImageHandle> ImageData for StoreImage<I> {
    async fn set_data(&mut self, data: ByteStream, size: Option<u64>) -> Result<()> {
        let image_id = self.image_id();
        let stored = self.backend.add(image_id, data, size).await?;

        // Written below any quota guard: the layers above already accounted for it.
        let replaced = self
            .inner
            .locations()
            .replace(vec![Location::new(stored.url.clone())]);
        if let Err(e) = replaced {
            safe_delete_from_backend(self.backend.as_ref(), &stored.url, image_id).await;
            return Err(e);
        }

        let attrs = self.inner.attributes_mut();
        *attrs.size = Some(stored.size);
        *attrs.checksum = Some(stored.checksum);
        *attrs.status = ImageStatus::Active;

        tracing::info!(%image_id, size = stored.size, url = %stored.url, "Image data stored");
        Ok(())
    }

    async fn get_data(&self) -> Result<ByteStream> {
        let image_id = self.image_id();
        let urls: Vec<String> = self
            .image()
            .locations
            .iter()
            .map(|loc| loc.url.clone())
            .collect();

        for url in &urls {
            match self.backend.get(url).await {
                Ok(stream) => return Ok(stream),
                Err(e) => tracing::warn!(%image_id, %url, "Failed to read image data: {}", e),
            }
        }

        Err(Error::not_found(format!(
            "No readable data found for image {}",
            image_id
        )))
    }
}

/// Repository whose images carry the store layer; removing an image also
/// drops its data.
pub struct StoreImageRepo<R> {
    inner: R,
    backend: Arc<dyn StorageBackend>,
}

impl<R: ImageRepo> StoreImageRepo<R> {
    pub fn new(inner: R, backend: Arc<dyn StorageBackend>) -> Self {
        Self { inner, backend }
    }

    fn wrap(&self, image: R::Image) -> StoreImage<R::Image> {
        StoreImage::new(image, Arc::clone(&self.backend))
    }
}

#[async_trait]
impl<R: ImageRepo> ImageRepo for StoreImageRepo<R> {
    type Image = StoreImage<R::Image>;

    async fn get(&self, image_id: ImageId) -> Result<Self::Image> {
        Ok(self.wrap(self.inner.get(image_id).await?))
    }

    async fn list(&self, filter: &ImageFilter) -> Result<Vec<Self::Image>> {
        let images = self.inner.list(filter).await?;
        Ok(images.into_iter().map(|image| self.wrap(image)).collect())
    }

    async fn add(&self, image: &mut Self::Image) -> Result<()> {
        self.inner.add(image.inner_mut()).await
    }

    async fn save(&self, image: &mut Self::Image) -> Result<()> {
        self.inner.save(image.inner_mut()).await
    }

    async fn remove(&self, image: &mut Self::Image) -> Result<()> {
        self.inner.remove(image.inner_mut()).await?;

        let image_id = image.image_id();
        let urls: Vec<String> = image
            .image()
            .locations
            .iter()
            .map(|loc| loc.url.clone())
            .collect();
        for url in urls {
            safe_delete_from_backend(self.backend.as_ref(), &url, image_id).await;
        }
        Ok(())
    }
}

pub struct StoreImageFactory<F> {
    inner: F,
    backend: Arc<dyn StorageBackend>,
}

impl<F: ImageFactory> StoreImageFactory<F> {
    pub fn new(inner: F, backend: Arc<dyn StorageBackend>) -> Self {
        Self { inner, backend }
    }
}

impl<F: ImageFactory> ImageFactory for StoreImageFactory<F> {
    type Image = StoreImage<F::Image>;

    fn new_image(&self, params: NewImage) -> Result<Self::Image> {
        let image = self.inner.new_image(params)?;
        Ok(StoreImage::new(image, Arc::clone(&self.backend)))
    }
}
