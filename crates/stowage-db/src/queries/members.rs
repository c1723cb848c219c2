//! Image member queries.

use chrono::Utc;
use rusqlite::Connection;
use stowage_common::{Error, ImageId, ImageMember, Result};

use super::{parse_column, parse_timestamp};

/// Parse a member from a database row.
///
/// Expects columns in order: image_id, member_id, status, created_at, updated_at.
fn parse_member_row(row: &rusqlite::Row) -> rusqlite::Result<ImageMember> {
    Ok(ImageMember {
        image_id: parse_column(row, 0)?,
        member_id: row.get(1)?,
        status: parse_column(row, 2)?,
        created_at: parse_timestamp(row, 3)?,
        updated_at: parse_timestamp(row, 4)?,
    })
}

/// Insert a membership, reviving a previously deleted one for the same pair.
///
/// # Returns
///
/// * `Ok(())` - If the member was stored
/// * `Err(Error::Duplicate)` - If a live membership already exists
/// * `Err(Error)` - If a database error occurs
pub fn insert_member(conn: &Connection, member: &ImageMember) -> Result<()> {
    let rows = conn
        .execute(
            "INSERT INTO image_members (image_id, member_id, status, created_at, updated_at)
             VALUES (:image_id, :member_id, :status, :created_at, :updated_at)
             ON CONFLICT (image_id, member_id) DO UPDATE SET
                status = excluded.status,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                deleted = 0
             WHERE image_members.deleted = 1",
            rusqlite::named_params! {
                ":image_id": member.image_id.to_string(),
                ":member_id": &member.member_id,
                ":status": member.status.to_string(),
                ":created_at": member.created_at.to_rfc3339(),
                ":updated_at": member.updated_at.to_rfc3339(),
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if rows == 0 {
        return Err(Error::Duplicate(format!(
            "Member {} already has access to image {}",
            member.member_id, member.image_id
        )));
    }

    Ok(())
}

/// Update a membership's status.
pub fn update_member(conn: &Connection, member: &ImageMember) -> Result<()> {
    let rows = conn
        .execute(
            "UPDATE image_members SET status = :status, updated_at = :updated_at
             WHERE image_id = :image_id AND member_id = :member_id AND deleted = 0",
            rusqlite::named_params! {
                ":image_id": member.image_id.to_string(),
                ":member_id": &member.member_id,
                ":status": member.status.to_string(),
                ":updated_at": Utc::now().to_rfc3339(),
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if rows == 0 {
        return Err(Error::not_found(format!(
            "Member {} not found for image {}",
            member.member_id, member.image_id
        )));
    }

    Ok(())
}

/// Get a live membership.
pub fn get_member(
    conn: &Connection,
    image_id: ImageId,
    member_id: &str,
) -> Result<Option<ImageMember>> {
    let result = conn.query_row(
        "SELECT image_id, member_id, status, created_at, updated_at
         FROM image_members
         WHERE image_id = :image_id AND member_id = :member_id AND deleted = 0",
        rusqlite::named_params! {
            ":image_id": image_id.to_string(),
            ":member_id": member_id,
        },
        parse_member_row,
    );

    match result {
        Ok(member) => Ok(Some(member)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List live memberships of an image.
pub fn list_members(conn: &Connection, image_id: ImageId) -> Result<Vec<ImageMember>> {
    let mut stmt = conn
        .prepare(
            "SELECT image_id, member_id, status, created_at, updated_at
             FROM image_members
             WHERE image_id = :image_id AND deleted = 0
             ORDER BY created_at, member_id",
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let members = stmt
        .query_map(
            rusqlite::named_params! { ":image_id": image_id.to_string() },
            parse_member_row,
        )
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(members)
}

/// Soft-delete a membership.
///
/// # Returns
///
/// * `Ok(true)` - If a live membership was removed
/// * `Ok(false)` - If there was nothing to remove
pub fn delete_member(conn: &Connection, image_id: ImageId, member_id: &str) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE image_members SET deleted = 1, updated_at = :now
             WHERE image_id = :image_id AND member_id = :member_id AND deleted = 0",
            rusqlite::named_params! {
                ":image_id": image_id.to_string(),
                ":member_id": member_id,
                ":now": Utc::now().to_rfc3339(),
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(rows > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use crate::queries::images::insert_image;
    use stowage_common::{Image, MemberStatus, NewImage};

    fn setup() -> (Connection, ImageId) {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let image = Image::new(NewImage::default()).unwrap();
        let id = insert_image(&conn, &image).unwrap();
        (conn, id)
    }

    #[test]
    fn test_member_crud() {
        let (conn, image_id) = setup();

        let mut member = ImageMember::new(image_id, "tenant-b");
        insert_member(&conn, &member).unwrap();
        assert!(matches!(
            insert_member(&conn, &member),
            Err(Error::Duplicate(_))
        ));

        member.status = MemberStatus::Accepted;
        update_member(&conn, &member).unwrap();
        let loaded = get_member(&conn, image_id, "tenant-b").unwrap().unwrap();
        assert_eq!(loaded.status, MemberStatus::Accepted);

        assert_eq!(list_members(&conn, image_id).unwrap().len(), 1);

        assert!(delete_member(&conn, image_id, "tenant-b").unwrap());
        assert!(get_member(&conn, image_id, "tenant-b").unwrap().is_none());
        assert!(list_members(&conn, image_id).unwrap().is_empty());
    }

    #[test]
    fn test_deleted_member_can_be_re_added() {
        let (conn, image_id) = setup();
        let member = ImageMember::new(image_id, "tenant-b");

        insert_member(&conn, &member).unwrap();
        delete_member(&conn, image_id, "tenant-b").unwrap();
        insert_member(&conn, &member).unwrap();

        assert!(get_member(&conn, image_id, "tenant-b").unwrap().is_some());
    }

    #[test]
    fn test_update_missing_member() {
        let (conn, image_id) = setup();
        let member = ImageMember::new(image_id, "nobody");
        assert!(matches!(
            update_member(&conn, &member),
            Err(Error::NotFound(_))
        ));
    }
}
