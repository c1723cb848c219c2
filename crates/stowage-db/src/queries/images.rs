//! Image database queries.
//!
//! An image is stored as one `images` row plus its child collections
//! (`image_locations`, `image_properties`, `image_tags`). Writes replace the
//! child collections wholesale inside a transaction; deletes are soft.

use chrono::Utc;
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};
use stowage_common::{Error, Image, ImageId, ImageStatus, Location, Result, Visibility};

use super::{parse_column, parse_json, parse_timestamp};

/// Filter options for listing images.
#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
    pub owner: Option<String>,
    pub status: Option<ImageStatus>,
    pub visibility: Option<Visibility>,
    pub tag: Option<String>,
    pub limit: Option<u32>,
}

const IMAGE_COLUMNS: &str = "i.id, i.name, i.status, i.visibility, i.size, i.checksum, i.owner,
     i.disk_format, i.container_format, i.min_disk, i.min_ram, i.protected,
     i.created_at, i.updated_at";

/// Parse an image from a database row, without its child collections.
///
/// Expects columns in the order of `IMAGE_COLUMNS`.
fn parse_image_row(row: &rusqlite::Row) -> rusqlite::Result<Image> {
    Ok(Image {
        image_id: parse_column(row, 0)?,
        name: row.get(1)?,
        status: parse_column(row, 2)?,
        visibility: parse_column(row, 3)?,
        size: row.get::<_, Option<i64>>(4)?.map(|s| s as u64),
        checksum: row.get(5)?,
        owner: row.get(6)?,
        disk_format: row.get(7)?,
        container_format: row.get(8)?,
        min_disk: row.get(9)?,
        min_ram: row.get(10)?,
        protected: row.get(11)?,
        created_at: parse_timestamp(row, 12)?,
        updated_at: parse_timestamp(row, 13)?,
        locations: Vec::new(),
        extra_properties: BTreeMap::new(),
        tags: BTreeSet::new(),
    })
}

fn load_children(conn: &Connection, image: &mut Image) -> Result<()> {
    let id = image.image_id.to_string();

    let mut stmt = conn
        .prepare(
            "SELECT url, metadata FROM image_locations
             WHERE image_id = :id AND deleted = 0
             ORDER BY position",
        )
        .map_err(|e| Error::database(e.to_string()))?;
    image.locations = stmt
        .query_map(rusqlite::named_params! { ":id": &id }, |row| {
            Ok(Location {
                url: row.get(0)?,
                metadata: parse_json(row, 1)?,
            })
        })
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    let mut stmt = conn
        .prepare("SELECT name, value FROM image_properties WHERE image_id = :id")
        .map_err(|e| Error::database(e.to_string()))?;
    image.extra_properties = stmt
        .query_map(rusqlite::named_params! { ":id": &id }, |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<BTreeMap<_, _>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    let mut stmt = conn
        .prepare("SELECT value FROM image_tags WHERE image_id = :id")
        .map_err(|e| Error::database(e.to_string()))?;
    image.tags = stmt
        .query_map(rusqlite::named_params! { ":id": &id }, |row| {
            row.get::<_, String>(0)
        })
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<BTreeSet<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(())
}

fn replace_children(conn: &Connection, image: &Image) -> Result<()> {
    let id = image.image_id.to_string();

    for table in ["image_locations", "image_properties", "image_tags"] {
        conn.execute(
            &format!("DELETE FROM {} WHERE image_id = :id", table),
            rusqlite::named_params! { ":id": &id },
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }

    for (position, location) in image.locations.iter().enumerate() {
        let metadata = serde_json::to_string(&location.metadata)
            .map_err(|e| Error::database(e.to_string()))?;
        conn.execute(
            "INSERT INTO image_locations (image_id, position, url, metadata)
             VALUES (:image_id, :position, :url, :metadata)",
            rusqlite::named_params! {
                ":image_id": &id,
                ":position": position as i64,
                ":url": &location.url,
                ":metadata": metadata,
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }

    for (name, value) in &image.extra_properties {
        conn.execute(
            "INSERT INTO image_properties (image_id, name, value)
             VALUES (:image_id, :name, :value)",
            rusqlite::named_params! { ":image_id": &id, ":name": name, ":value": value },
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }

    for tag in &image.tags {
        conn.execute(
            "INSERT INTO image_tags (image_id, value) VALUES (:image_id, :value)",
            rusqlite::named_params! { ":image_id": &id, ":value": tag },
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }

    Ok(())
}

/// Insert a new image with its locations, properties and tags.
///
/// # Arguments
///
/// * `conn` - Database connection
/// * `image` - Image to insert
///
/// # Returns
///
/// * `Ok(ImageId)` - The ID of the inserted image
/// * `Err(Error::Duplicate)` - If an image with this ID already exists
/// * `Err(Error)` - If a database error occurs
pub fn insert_image(conn: &Connection, image: &Image) -> Result<ImageId> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;

    tx.execute(
        "INSERT INTO images (id, name, status, visibility, size, checksum, owner, disk_format,
                             container_format, min_disk, min_ram, protected, created_at, updated_at)
         VALUES (:id, :name, :status, :visibility, :size, :checksum, :owner, :disk_format,
                 :container_format, :min_disk, :min_ram, :protected, :created_at, :updated_at)",
        rusqlite::named_params! {
            ":id": image.image_id.to_string(),
            ":name": &image.name,
            ":status": image.status.to_string(),
            ":visibility": image.visibility.to_string(),
            ":size": image.size.map(|s| s as i64),
            ":checksum": &image.checksum,
            ":owner": &image.owner,
            ":disk_format": &image.disk_format,
            ":container_format": &image.container_format,
            ":min_disk": image.min_disk,
            ":min_ram": image.min_ram,
            ":protected": image.protected,
            ":created_at": image.created_at.to_rfc3339(),
            ":updated_at": image.updated_at.to_rfc3339(),
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Duplicate(format!("Image with identifier {} already exists", image.image_id))
        }
        e => Error::database(e.to_string()),
    })?;

    replace_children(&tx, image)?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;

    Ok(image.image_id)
}

/// Update an existing image and replace its child collections.
///
/// # Returns
///
/// * `Ok(())` - If the image was updated
/// * `Err(Error::NotFound)` - If no live image has this ID
/// * `Err(Error)` - If a database error occurs
pub fn update_image(conn: &Connection, image: &Image) -> Result<()> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;

    let rows = tx
        .execute(
            "UPDATE images SET name = :name, status = :status, visibility = :visibility,
                    size = :size, checksum = :checksum, owner = :owner, disk_format = :disk_format,
                    container_format = :container_format, min_disk = :min_disk,
                    min_ram = :min_ram, protected = :protected, updated_at = :updated_at
             WHERE id = :id AND deleted = 0",
            rusqlite::named_params! {
                ":id": image.image_id.to_string(),
                ":name": &image.name,
                ":status": image.status.to_string(),
                ":visibility": image.visibility.to_string(),
                ":size": image.size.map(|s| s as i64),
                ":checksum": &image.checksum,
                ":owner": &image.owner,
                ":disk_format": &image.disk_format,
                ":container_format": &image.container_format,
                ":min_disk": image.min_disk,
                ":min_ram": image.min_ram,
                ":protected": image.protected,
                ":updated_at": image.updated_at.to_rfc3339(),
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if rows == 0 {
        return Err(Error::not_found(format!(
            "No image found with ID {}",
            image.image_id
        )));
    }

    replace_children(&tx, image)?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;

    Ok(())
}

/// Get a live image by ID.
///
/// # Returns
///
/// * `Ok(Some(Image))` - The image if found
/// * `Ok(None)` - If the image does not exist or was deleted
/// * `Err(Error)` - If a database error occurs
pub fn get_image(conn: &Connection, id: ImageId) -> Result<Option<Image>> {
    let result = conn.query_row(
        &format!(
            "SELECT {} FROM images i WHERE i.id = :id AND i.deleted = 0",
            IMAGE_COLUMNS
        ),
        rusqlite::named_params! { ":id": id.to_string() },
        parse_image_row,
    );

    match result {
        Ok(mut image) => {
            load_children(conn, &mut image)?;
            Ok(Some(image))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List live images matching a filter, oldest first.
///
/// # Arguments
///
/// * `conn` - Database connection
/// * `filter` - Filter options
///
/// # Returns
///
/// * `Ok(Vec<Image>)` - Matching images with their child collections
/// * `Err(Error)` - If a database error occurs
pub fn list_images(conn: &Connection, filter: &ImageFilter) -> Result<Vec<Image>> {
    let mut query = format!(
        "SELECT {} FROM images i WHERE i.deleted = 0",
        IMAGE_COLUMNS
    );

    if filter.owner.is_some() {
        query.push_str(" AND i.owner = :owner");
    }
    if filter.status.is_some() {
        query.push_str(" AND i.status = :status");
    }
    if filter.visibility.is_some() {
        query.push_str(" AND i.visibility = :visibility");
    }
    if filter.tag.is_some() {
        query.push_str(
            " AND EXISTS (SELECT 1 FROM image_tags t WHERE t.image_id = i.id AND t.value = :tag)",
        );
    }

    query.push_str(" ORDER BY i.created_at, i.id LIMIT :limit");

    let limit = filter.limit.map(i64::from).unwrap_or(-1);
    let status = filter.status.map(|s| s.to_string());
    let visibility = filter.visibility.map(|v| v.to_string());

    let mut params: Vec<(&str, &dyn rusqlite::ToSql)> = vec![(":limit", &limit)];
    if let Some(ref owner) = filter.owner {
        params.push((":owner", owner));
    }
    if let Some(ref status) = status {
        params.push((":status", status));
    }
    if let Some(ref visibility) = visibility {
        params.push((":visibility", visibility));
    }
    if let Some(ref tag) = filter.tag {
        params.push((":tag", tag));
    }

    let mut stmt = conn
        .prepare(&query)
        .map_err(|e| Error::database(e.to_string()))?;

    let mut images = stmt
        .query_map(&*params, parse_image_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    for image in &mut images {
        load_children(conn, image)?;
    }

    Ok(images)
}

/// Soft-delete an image and its locations.
///
/// # Returns
///
/// * `Ok(true)` - If a live image was deleted
/// * `Ok(false)` - If no live image had this ID
/// * `Err(Error)` - If a database error occurs
pub fn delete_image(conn: &Connection, id: ImageId) -> Result<bool> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;

    let now = Utc::now().to_rfc3339();
    let rows = tx
        .execute(
            "UPDATE images SET deleted = 1, deleted_at = :now, status = :status, updated_at = :now
             WHERE id = :id AND deleted = 0",
            rusqlite::named_params! {
                ":id": id.to_string(),
                ":now": &now,
                ":status": ImageStatus::Deleted.to_string(),
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;

    tx.execute(
        "UPDATE image_locations SET deleted = 1 WHERE image_id = :id",
        rusqlite::named_params! { ":id": id.to_string() },
    )
    .map_err(|e| Error::database(e.to_string()))?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;

    Ok(rows > 0)
}
