//! Quota layer: checks limits before mutations reach the layers below.

use async_trait::async_trait;
use std::sync::Arc;
use stowage_common::{
    Image, ImageId, ImageMember, ImageStatus, Location, NewImage, RequestContext, Result,
};

use super::QuotaEnforcer;
use crate::domain::{
    ImageAttributesMut, ImageData, ImageFactory, ImageFilter, ImageHandle, ImageRepo,
    MemberFactory,
};
use crate::guard::{Growth, GuardedLocations, GuardedTags};
use crate::store::{safe_delete_from_backend, ByteStream, StorageBackend};

/// An image whose tags, locations and data writes are quota-checked.
pub struct QuotaImage<I> {
    inner: I,
    ctx: RequestContext,
    enforcer: Arc<QuotaEnforcer>,
    backend: Arc<dyn StorageBackend>,
}

impl<I: ImageHandle> QuotaImage<I> {
    pub fn new(
        inner: I,
        ctx: RequestContext,
        enforcer: Arc<QuotaEnforcer>,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            inner,
            ctx,
            enforcer,
            backend,
        }
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

impl<I: ImageHandle> ImageHandle for QuotaImage<I> {
    fn image(&self) -> &Image {
        self.inner.image()
    }

    fn attributes_mut(&mut self) -> ImageAttributesMut<'_> {
        self.inner.attributes_mut()
    }

    fn tags(&mut self) -> GuardedTags<'_> {
        let enforcer = &self.enforcer;
        GuardedTags::guarded(self.inner.tags(), move |growth: &Growth| {
            enforcer.check_tags(growth.after)
        })
    }

    /// Every location costs one full copy of the image size, and the
    /// resulting list is charged in place of what this image holds now.
    /// Images of unknown size only need some storage left.
    fn locations(&mut self) -> GuardedLocations<'_> {
        let image = self.inner.image();
        let (image_id, size) = (image.image_id, image.size);
        let ctx = &self.ctx;
        let enforcer = &self.enforcer;

        GuardedLocations::guarded(self.inner.locations(), move |growth: &Growth| {
            let requested = size.map(|size| size.saturating_mul(growth.after as u64));
            enforcer.check_storage(ctx, requested, Some(image_id))
        })
    }

    fn delete(&mut self) -> Result<()> {
        self.inner.delete()
    }
}

#[async_trait]
impl<I: ImageData> ImageData for QuotaImage<I> {
    /// Checks the declared size up front, then the real size once the
    /// stream is drained. A late rejection deletes what was written and
    /// puts the image back the way it was before the upload.
    ///
    /// A declared size smaller than the real one passes the first check,
    /// so the write happens before the second check catches it.
    async fn set_data(&mut self, data: ByteStream, size: Option<u64>) -> Result<()> {
        let image_id = self.image_id();
        self.enforcer.check_storage(&self.ctx, size, Some(image_id))?;

        let before = DataState::capture(self.inner.image());
        self.inner.set_data(data, size).await?;

        let written = self.image().size;
        if let Err(e) = self.enforcer.check_storage(&self.ctx, written, Some(image_id)) {
            let url = self.image().locations.first().map(|loc| loc.url.clone());
            before.restore(&mut self.inner);
            if let Some(url) = url {
                tracing::info!(
                    %image_id,
                    ?written,
                    "Removing image data rejected by storage quota"
                );
                safe_delete_from_backend(self.backend.as_ref(), &url, image_id).await;
            }
            return Err(e);
        }
        Ok(())
    }

    async fn get_data(&self) -> Result<ByteStream> {
        self.inner.get_data().await
    }
}

/// The attributes an upload writes.
struct DataState {
    size: Option<u64>,
    checksum: Option<String>,
    status: ImageStatus,
    locations: Vec<Location>,
}

impl DataState {
    fn capture(image: &Image) -> Self {
        Self {
            size: image.size,
            checksum: image.checksum.clone(),
            status: image.status,
            locations: image.locations.clone(),
        }
    }

    fn restore<I: ImageHandle>(self, image: &mut I) {
        let attrs = image.attributes_mut();
        *attrs.size = self.size;
        *attrs.checksum = self.checksum;
        *attrs.status = self.status;

        let restored = image.locations().replace(self.locations);
        if let Err(e) = restored {
            tracing::warn!(
                image_id = %image.image_id(),
                "Failed to restore image locations: {}",
                e
            );
        }
    }
}

/// Repository that refuses to persist images over the property limit.
pub struct QuotaImageRepo<R> {
    inner: R,
    ctx: RequestContext,
    enforcer: Arc<QuotaEnforcer>,
    backend: Arc<dyn StorageBackend>,
}

impl<R: ImageRepo> QuotaImageRepo<R> {
    pub fn new(
        inner: R,
        ctx: RequestContext,
        enforcer: Arc<QuotaEnforcer>,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            inner,
            ctx,
            enforcer,
            backend,
        }
    }

    fn wrap(&self, image: R::Image) -> QuotaImage<R::Image> {
        QuotaImage::new(
            image,
            self.ctx.clone(),
            Arc::clone(&self.enforcer),
            Arc::clone(&self.backend),
        )
    }
}

#[async_trait]
impl<R: ImageRepo> ImageRepo for QuotaImageRepo<R> {
    type Image = QuotaImage<R::Image>;

    async fn get(&self, image_id: ImageId) -> Result<Self::Image> {
        Ok(self.wrap(self.inner.get(image_id).await?))
    }

    async fn list(&self, filter: &ImageFilter) -> Result<Vec<Self::Image>> {
        let images = self.inner.list(filter).await?;
        Ok(images.into_iter().map(|image| self.wrap(image)).collect())
    }

    async fn add(&self, image: &mut Self::Image) -> Result<()> {
        self.enforcer
            .check_properties(image.image().extra_properties.len())?;
        self.inner.add(image.inner_mut()).await
    }

    async fn save(&self, image: &mut Self::Image) -> Result<()> {
        self.enforcer
            .check_properties(image.image().extra_properties.len())?;
        self.inner.save(image.inner_mut()).await
    }

    async fn remove(&self, image: &mut Self::Image) -> Result<()> {
        self.inner.remove(image.inner_mut()).await
    }
}

pub struct QuotaImageFactory<F> {
    inner: F,
    ctx: RequestContext,
    enforcer: Arc<QuotaEnforcer>,
    backend: Arc<dyn StorageBackend>,
}

impl<F: ImageFactory> QuotaImageFactory<F> {
    pub fn new(
        inner: F,
        ctx: RequestContext,
        enforcer: Arc<QuotaEnforcer>,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            inner,
            ctx,
            enforcer,
            backend,
        }
    }
}

impl<F: ImageFactory> ImageFactory for QuotaImageFactory<F> {
    type Image = QuotaImage<F::Image>;

    fn new_image(&self, params: NewImage) -> Result<Self::Image> {
        self.enforcer.check_tags(params.tags.len())?;
        self.enforcer.check_properties(params.extra_properties.len())?;

        let image = self.inner.new_image(params)?;
        Ok(QuotaImage::new(
            image,
            self.ctx.clone(),
            Arc::clone(&self.enforcer),
            Arc::clone(&self.backend),
        ))
    }
}

/// Member factory that refuses to grow an image past the member limit.
pub struct QuotaMemberFactory<F> {
    inner: F,
    enforcer: Arc<QuotaEnforcer>,
}

impl<F: MemberFactory> QuotaMemberFactory<F> {
    pub fn new(inner: F, enforcer: Arc<QuotaEnforcer>) -> Self {
        Self { inner, enforcer }
    }
}

impl<F: MemberFactory> MemberFactory for QuotaMemberFactory<F> {
    fn new_image_member(&self, image: &Image, member_id: &str) -> Result<ImageMember> {
        self.enforcer.check_members(image.image_id)?;
        self.inner.new_image_member(image, member_id)
    }
}
