//! Domain entities: images, their locations, tasks and image members.
//!
//! These are the raw entities the proxy layers wrap. They carry only the
//! behaviour intrinsic to the entity itself (lifecycle transitions, reserved
//! attribute checks); quota and notification concerns live elsewhere.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::ids::{ImageId, TaskId};
use crate::types::{ImageStatus, MemberStatus, TaskStatus, Visibility};

/// Attribute names that may not be used as extra property keys.
pub const RESERVED_PROPERTIES: &[&str] = &[
    "id",
    "name",
    "status",
    "created_at",
    "updated_at",
    "visibility",
    "protected",
    "checksum",
    "owner",
    "disk_format",
    "container_format",
    "size",
    "min_disk",
    "min_ram",
    "locations",
    "tags",
    "deleted",
    "deleted_at",
];

/// Default lifetime of a finished task before it expires.
pub const DEFAULT_TASK_TIME_TO_LIVE_HOURS: i64 = 48;

/// One physical copy of an image's data in a storage backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub url: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Location {
    /// A location with empty metadata.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            metadata: Map::new(),
        }
    }
}

/// Parameters accepted by the image factory.
#[derive(Debug, Clone, Default)]
pub struct NewImage {
    pub image_id: Option<ImageId>,
    pub name: Option<String>,
    pub visibility: Visibility,
    pub min_disk: u32,
    pub min_ram: u32,
    pub protected: bool,
    pub owner: Option<String>,
    pub disk_format: Option<String>,
    pub container_format: Option<String>,
    pub extra_properties: BTreeMap<String, String>,
    pub tags: BTreeSet<String>,
}

/// Image entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub image_id: ImageId,
    pub name: Option<String>,
    pub status: ImageStatus,
    pub visibility: Visibility,
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub owner: Option<String>,
    pub disk_format: Option<String>,
    pub container_format: Option<String>,
    pub min_disk: u32,
    pub min_ram: u32,
    pub protected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub locations: Vec<Location>,
    pub extra_properties: BTreeMap<String, String>,
    pub tags: BTreeSet<String>,
}

impl Image {
    /// Build a queued image from factory parameters.
    ///
    /// Fails with [`Error::Forbidden`] when an extra property shadows a
    /// reserved attribute.
    pub fn new(params: NewImage) -> Result<Self> {
        check_reserved_properties(&params.extra_properties)?;

        let now = Utc::now();
        Ok(Self {
            image_id: params.image_id.unwrap_or_default(),
            name: params.name,
            status: ImageStatus::Queued,
            visibility: params.visibility,
            size: None,
            checksum: None,
            owner: params.owner,
            disk_format: params.disk_format,
            container_format: params.container_format,
            min_disk: params.min_disk,
            min_ram: params.min_ram,
            protected: params.protected,
            created_at: now,
            updated_at: now,
            locations: Vec::new(),
            extra_properties: params.extra_properties,
            tags: params.tags,
        })
    }

    /// Mark the image deleted. Protected images refuse.
    pub fn delete(&mut self) -> Result<()> {
        if self.protected {
            return Err(Error::forbidden(format!(
                "Image {} is protected and cannot be deleted",
                self.image_id
            )));
        }
        self.status = ImageStatus::Deleted;
        self.touch();
        Ok(())
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Reject extra properties whose key is a reserved attribute name.
pub fn check_reserved_properties(properties: &BTreeMap<String, String>) -> Result<()> {
    match properties
        .keys()
        .find(|key| RESERVED_PROPERTIES.contains(&key.as_str()))
    {
        Some(key) => Err(Error::forbidden(format!(
            "Attribute '{}' is reserved.",
            key
        ))),
        None => Ok(()),
    }
}

/// Asynchronous task entity (image import and similar).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub task_type: String,
    pub status: TaskStatus,
    pub owner: Option<String>,
    pub input: Value,
    pub result: Option<Value>,
    pub message: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip, default = "default_time_to_live")]
    pub time_to_live: Duration,
}

fn default_time_to_live() -> Duration {
    Duration::hours(DEFAULT_TASK_TIME_TO_LIVE_HOURS)
}

impl Task {
    /// Build a pending task.
    pub fn new(
        task_type: impl Into<String>,
        owner: Option<String>,
        input: Value,
        time_to_live: Duration,
    ) -> Result<Self> {
        let task_type = task_type.into();
        if task_type.trim().is_empty() {
            return Err(Error::invalid_value("Task type must not be empty"));
        }

        let now = Utc::now();
        Ok(Self {
            task_id: TaskId::new(),
            task_type,
            status: TaskStatus::Pending,
            owner,
            input,
            result: None,
            message: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
            time_to_live,
        })
    }

    /// pending -> processing
    pub fn begin_processing(&mut self) -> Result<()> {
        self.transition(TaskStatus::Processing)
    }

    /// processing -> success, recording the result.
    pub fn succeed(&mut self, result: Value) -> Result<()> {
        self.transition(TaskStatus::Success)?;
        self.result = Some(result);
        self.expires_at = Some(self.updated_at + self.time_to_live);
        Ok(())
    }

    /// processing -> failure, recording the reason.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(TaskStatus::Failure)?;
        self.message = Some(message.into());
        self.expires_at = Some(self.updated_at + self.time_to_live);
        Ok(())
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::transition(self.status, next));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Grant of access to an image for another tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMember {
    pub image_id: ImageId,
    pub member_id: String,
    pub status: MemberStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageMember {
    /// A pending membership.
    pub fn new(image_id: ImageId, member_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            image_id,
            member_id: member_id.into(),
            status: MemberStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_image_is_queued() {
        let image = Image::new(NewImage {
            name: Some("cirros".into()),
            owner: Some("tenant-a".into()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(image.status, ImageStatus::Queued);
        assert_eq!(image.visibility, Visibility::Private);
        assert!(image.locations.is_empty());
        assert!(image.size.is_none());
    }

    #[test]
    fn test_reserved_property_rejected() {
        let mut props = BTreeMap::new();
        props.insert("status".to_string(), "active".to_string());

        let err = Image::new(NewImage {
            extra_properties: props,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[test]
    fn test_protected_image_cannot_be_deleted() {
        let mut image = Image::new(NewImage {
            protected: true,
            ..Default::default()
        })
        .unwrap();

        assert!(matches!(image.delete(), Err(Error::Forbidden(_))));
        assert_eq!(image.status, ImageStatus::Queued);

        image.protected = false;
        image.delete().unwrap();
        assert_eq!(image.status, ImageStatus::Deleted);
    }

    #[test]
    fn test_task_lifecycle() {
        let input = json!({"from": "http://x"});
        let mut task = Task::new("import", None, input, Duration::hours(1)).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        assert!(task.succeed(json!({})).is_err());

        task.begin_processing().unwrap();
        task.succeed(json!({"image_id": "abc"})).unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.expires_at, Some(task.updated_at + Duration::hours(1)));

        assert!(matches!(
            task.fail("late"),
            Err(Error::InvalidStatusTransition { .. })
        ));
    }

    #[test]
    fn test_task_type_required() {
        assert!(Task::new(" ", None, Value::Null, Duration::hours(1)).is_err());
    }

    #[test]
    fn test_location_metadata_defaults() {
        let loc: Location = serde_json::from_str(r#"{"url": "file:///a"}"#).unwrap();
        assert_eq!(loc, Location::new("file:///a"));
    }
}
