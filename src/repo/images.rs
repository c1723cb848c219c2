use async_trait::async_trait;
use stowage_common::{
    check_reserved_properties, Error, Image, ImageId, ImageStatus, NewImage, RequestContext,
    Result,
};
use stowage_db::pool::{get_conn, DbPool};
use stowage_db::queries::images;

use crate::domain::{ImageFactory, ImageFilter, ImageRepo};

/// Images persisted in SQLite.
#[derive(Clone)]
pub struct DbImageRepo {
    pool: DbPool,
}

impl DbImageRepo {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImageRepo for DbImageRepo {
    type Image = Image;

    async fn get(&self, image_id: ImageId) -> Result<Image> {
        let conn = get_conn(&self.pool)?;
        images::get_image(&conn, image_id)?
            .ok_or_else(|| Error::not_found(format!("No image found with ID {}", image_id)))
    }

    async fn list(&self, filter: &ImageFilter) -> Result<Vec<Image>> {
        let conn = get_conn(&self.pool)?;
        images::list_images(&conn, filter)
    }

    async fn add(&self, image: &mut Image) -> Result<()> {
        check_reserved_properties(&image.extra_properties)?;
        image.touch();

        let conn = get_conn(&self.pool)?;
        images::insert_image(&conn, image)?;
        tracing::debug!(image_id = %image.image_id, "Image added");
        Ok(())
    }

    async fn save(&self, image: &mut Image) -> Result<()> {
        check_reserved_properties(&image.extra_properties)?;
        image.touch();

        let conn = get_conn(&self.pool)?;
        images::update_image(&conn, image)
    }

    async fn remove(&self, image: &mut Image) -> Result<()> {
        if image.status != ImageStatus::Deleted {
            image.delete()?;
        }

        let conn = get_conn(&self.pool)?;
        if !images::delete_image(&conn, image.image_id)? {
            return Err(Error::not_found(format!(
                "No image found with ID {}",
                image.image_id
            )));
        }
        tracing::debug!(image_id = %image.image_id, "Image removed");
        Ok(())
    }
}

/// Builds queued images owned by the caller unless an owner is given.
pub struct BaseImageFactory {
    ctx: RequestContext,
}

impl BaseImageFactory {
    pub fn new(ctx: RequestContext) -> Self {
        Self { ctx }
    }
}

impl ImageFactory for BaseImageFactory {
    type Image = Image;

    fn new_image(&self, mut params: NewImage) -> Result<Image> {
        if params.owner.is_none() {
            params.owner = self.ctx.owner().map(str::to_string);
        }
        Image::new(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use stowage_common::Location;
    use stowage_db::pool::init_memory_pool;

    fn repo() -> DbImageRepo {
        DbImageRepo::new(init_memory_pool().unwrap())
    }

    fn factory() -> BaseImageFactory {
        BaseImageFactory::new(RequestContext::new("tenant-a", "alice"))
    }

    #[tokio::test]
    async fn test_add_get_save() {
        let repo = repo();
        let mut image = factory()
            .new_image(NewImage {
                name: Some("cirros".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(image.owner.as_deref(), Some("tenant-a"));

        repo.add(&mut image).await.unwrap();

        image.locations.push(Location::new("memory://x"));
        image.tags.insert("beta".into());
        repo.save(&mut image).await.unwrap();

        let loaded = repo.get(image.image_id).await.unwrap();
        assert_eq!(loaded.name.as_deref(), Some("cirros"));
        assert_eq!(loaded.locations, image.locations);
        assert!(loaded.tags.contains("beta"));
    }

    #[tokio::test]
    async fn test_reserved_property_refused_on_save() {
        let repo = repo();
        let mut image = factory().new_image(NewImage::default()).unwrap();
        repo.add(&mut image).await.unwrap();

        let mut props = BTreeMap::new();
        props.insert("owner".to_string(), "someone-else".to_string());
        image.extra_properties = props;
        assert!(matches!(repo.save(&mut image).await, Err(Error::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_remove() {
        let repo = repo();
        let mut image = factory().new_image(NewImage::default()).unwrap();
        repo.add(&mut image).await.unwrap();

        repo.remove(&mut image).await.unwrap();
        assert_eq!(image.status, ImageStatus::Deleted);
        assert!(matches!(repo.get(image.image_id).await, Err(Error::NotFound(_))));
        assert!(matches!(repo.remove(&mut image).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_protected() {
        let repo = repo();
        let mut image = factory()
            .new_image(NewImage {
                protected: true,
                ..Default::default()
            })
            .unwrap();
        repo.add(&mut image).await.unwrap();

        assert!(matches!(repo.remove(&mut image).await, Err(Error::Forbidden(_))));
        assert!(repo.get(image.image_id).await.is_ok());
    }
}
