//! Aggregate reads consumed by quota enforcement.
//!
//! Storage usage counts one full copy of an image's size for every live
//! location, across all of an owner's live images.

use rusqlite::Connection;
use stowage_common::{Error, ImageId, Result};

/// Total bytes stored by an owner.
///
/// # Arguments
///
/// * `conn` - Database connection
/// * `owner` - Owner whose images are summed
/// * `exclude` - Image to leave out of the sum (the one being rewritten)
///
/// # Returns
///
/// * `Ok(u64)` - Sum of `size` over every live location of every live image
/// * `Err(Error)` - If a database error occurs
pub fn storage_usage(conn: &Connection, owner: &str, exclude: Option<ImageId>) -> Result<u64> {
    let total: i64 = conn
        .query_row(
            "SELECT COALESCE(SUM(i.size), 0)
             FROM images i
             JOIN image_locations l ON l.image_id = i.id
             WHERE i.owner = :owner
               AND i.deleted = 0
               AND l.deleted = 0
               AND i.size IS NOT NULL
               AND (:exclude IS NULL OR i.id != :exclude)",
            rusqlite::named_params! {
                ":owner": owner,
                ":exclude": exclude.map(|id| id.to_string()),
            },
            |row| row.get(0),
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(total.max(0) as u64)
}

/// Number of live members of an image.
pub fn member_count(conn: &Connection, image_id: ImageId) -> Result<u64> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM image_members WHERE image_id = :image_id AND deleted = 0",
            rusqlite::named_params! { ":image_id": image_id.to_string() },
            |row| row.get(0),
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(count as u64)
}
