use chrono::Utc;
use stowage_common::{Error, Image, ImageId, ImageMember, Result, Visibility};
use stowage_db::pool::{get_conn, DbPool};
use stowage_db::queries::members;

use crate::domain::{MemberFactory, MemberRepo};

/// Members of one image, persisted in SQLite.
#[derive(Clone)]
pub struct DbMemberRepo {
    pool: DbPool,
    image_id: ImageId,
}

impl DbMemberRepo {
    pub fn new(pool: DbPool, image_id: ImageId) -> Self {
        Self { pool, image_id }
    }

    fn check_image(&self, member: &ImageMember) -> Result<()> {
        if member.image_id != self.image_id {
            return Err(Error::invalid_value(format!(
                "Member {} belongs to image {}, not {}",
                member.member_id, member.image_id, self.image_id
            )));
        }
        Ok(())
    }
}

impl MemberRepo for DbMemberRepo {
    fn get(&self, member_id: &str) -> Result<ImageMember> {
        let conn = get_conn(&self.pool)?;
        members::get_member(&conn, self.image_id, member_id)?.ok_or_else(|| {
            Error::not_found(format!(
                "Member {} not found for image {}",
                member_id, self.image_id
            ))
        })
    }

    fn list(&self) -> Result<Vec<ImageMember>> {
        let conn = get_conn(&self.pool)?;
        members::list_members(&conn, self.image_id)
    }

    fn add(&self, member: &ImageMember) -> Result<()> {
        self.check_image(member)?;
        let conn = get_conn(&self.pool)?;
        members::insert_member(&conn, member)
    }

    fn save(&self, member: &mut ImageMember) -> Result<()> {
        self.check_image(member)?;
        member.updated_at = Utc::now();
        let conn = get_conn(&self.pool)?;
        members::update_member(&conn, member)
    }

    fn remove(&self, member: &ImageMember) -> Result<()> {
        self.check_image(member)?;
        let conn = get_conn(&self.pool)?;
        if !members::delete_member(&conn, self.image_id, &member.member_id)? {
            return Err(Error::not_found(format!(
                "Member {} not found for image {}",
                member.member_id, self.image_id
            )));
        }
        Ok(())
    }
}

/// Builds pending memberships. Public images are visible to everyone and
/// take no members.
#[derive(Debug, Default, Clone, Copy)]
pub struct BaseMemberFactory;

impl MemberFactory for BaseMemberFactory {
    fn new_image_member(&self, image: &Image, member_id: &str) -> Result<ImageMember> {
        if image.visibility == Visibility::Public {
            return Err(Error::forbidden("Public images do not have members."));
        }
        Ok(ImageMember::new(image.image_id, member_id))
    }
}
