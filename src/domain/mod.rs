//! Capability traits shared by the raw entities and every proxy layer.
//!
//! Each layer (store, quota, notify) wraps the layer beneath it and
//! implements the same trait, so a chain such as
//! `NotifyImage<QuotaImage<StoreImage<Image>>>` is used exactly like a bare
//! [`Image`]. Layers intercept only the operations they care about and
//! delegate the rest.

mod image;
mod task;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use stowage_common::{
    check_reserved_properties, Image, ImageId, ImageMember, ImageStatus, Result, Task, TaskId,
    Visibility,
};

use crate::guard::{GuardedLocations, GuardedTags};
use crate::store::ByteStream;

pub use stowage_common::NewImage;
pub use stowage_db::queries::images::ImageFilter;
pub use stowage_db::queries::tasks::TaskFilter;

/// Mutable view of an image's plain attributes.
///
/// Tags and locations are not here: they are only reachable through the
/// guarded views so that quota checks cannot be bypassed.
pub struct ImageAttributesMut<'a> {
    pub name: &'a mut Option<String>,
    pub status: &'a mut ImageStatus,
    pub visibility: &'a mut Visibility,
    pub protected: &'a mut bool,
    pub size: &'a mut Option<u64>,
    pub checksum: &'a mut Option<String>,
    pub disk_format: &'a mut Option<String>,
    pub container_format: &'a mut Option<String>,
    pub min_disk: &'a mut u32,
    pub min_ram: &'a mut u32,
    pub extra_properties: &'a mut BTreeMap<String, String>,
}

/// Attribute access and collection mutation for an image.
pub trait ImageHandle: Send + Sync {
    /// Read view of every attribute.
    fn image(&self) -> &Image;

    fn attributes_mut(&mut self) -> ImageAttributesMut<'_>;

    fn tags(&mut self) -> GuardedTags<'_>;

    fn locations(&mut self) -> GuardedLocations<'_>;

    fn delete(&mut self) -> Result<()>;

    fn image_id(&self) -> ImageId {
        self.image().image_id
    }

    /// Set one extra property. Reserved attribute names are refused.
    fn set_property(&mut self, key: &str, value: &str) -> Result<()> {
        let mut candidate = BTreeMap::new();
        candidate.insert(key.to_string(), value.to_string());
        check_reserved_properties(&candidate)?;

        self.attributes_mut()
            .extra_properties
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_property(&mut self, key: &str) -> Option<String> {
        self.attributes_mut().extra_properties.remove(key)
    }

    /// Replace all extra properties.
    fn set_extra_properties(&mut self, properties: BTreeMap<String, String>) -> Result<()> {
        check_reserved_properties(&properties)?;
        *self.attributes_mut().extra_properties = properties;
        Ok(())
    }
}

/// Image data transfer. Only chains with a storage layer provide it.
#[async_trait]
pub trait ImageData: ImageHandle {
    /// Stream `data` into storage. `size` is what the caller declared, if anything.
    async fn set_data(&mut self, data: ByteStream, size: Option<u64>) -> Result<()>;

    async fn get_data(&self) -> Result<ByteStream>;
}

#[async_trait]
pub trait ImageRepo: Send + Sync {
    type Image: ImageHandle;

    async fn get(&self, image_id: ImageId) -> Result<Self::Image>;

    async fn list(&self, filter: &ImageFilter) -> Result<Vec<Self::Image>>;

    async fn add(&self, image: &mut Self::Image) -> Result<()>;

    async fn save(&self, image: &mut Self::Image) -> Result<()>;

    async fn remove(&self, image: &mut Self::Image) -> Result<()>;
}

pub trait ImageFactory: Send + Sync {
    type Image: ImageHandle;

    fn new_image(&self, params: NewImage) -> Result<Self::Image>;
}

/// Hands a task off for asynchronous execution.
pub trait TaskExecutor: Send + Sync {
    fn begin_processing(&self, task_id: TaskId) -> Result<()>;
}

/// Lifecycle operations on a task.
pub trait TaskHandle: Send + Sync {
    fn task(&self) -> &Task;

    /// Hand the task to `executor`.
    fn run(&mut self, executor: &dyn TaskExecutor) -> Result<()>;

    fn begin_processing(&mut self) -> Result<()>;

    fn succeed(&mut self, result: Value) -> Result<()>;

    fn fail(&mut self, message: &str) -> Result<()>;
}

pub trait TaskRepo: Send + Sync {
    type Task: TaskHandle;

    fn get(&self, task_id: TaskId) -> Result<Self::Task>;

    fn list(&self, filter: &TaskFilter) -> Result<Vec<Self::Task>>;

    fn add(&self, task: &mut Self::Task) -> Result<()>;

    fn save(&self, task: &mut Self::Task) -> Result<()>;

    fn remove(&self, task: &mut Self::Task) -> Result<()>;
}

pub trait TaskFactory: Send + Sync {
    type Task: TaskHandle;

    fn new_task(&self, task_type: &str, owner: Option<String>, input: Value) -> Result<Self::Task>;
}

pub trait MemberFactory: Send + Sync {
    fn new_image_member(&self, image: &Image, member_id: &str) -> Result<ImageMember>;
}

/// Members of one image.
pub trait MemberRepo: Send + Sync {
    fn get(&self, member_id: &str) -> Result<ImageMember>;

    fn list(&self) -> Result<Vec<ImageMember>>;

    fn add(&self, member: &ImageMember) -> Result<()>;

    fn save(&self, member: &mut ImageMember) -> Result<()>;

    fn remove(&self, member: &ImageMember) -> Result<()>;
}
