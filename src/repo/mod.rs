//! Base layer: repositories and factories backed by the SQLite store.
//!
//! These sit at the bottom of every proxy chain and know nothing about
//! quotas or notifications.

mod images;
mod members;
mod tasks;

pub use images::{BaseImageFactory, DbImageRepo};
pub use members::{BaseMemberFactory, DbMemberRepo};
pub use tasks::{BaseTaskFactory, ChannelExecutor, DbTaskRepo};

use stowage_common::{ImageId, Result};
use stowage_db::pool::{get_conn, DbPool};
use stowage_db::queries::usage;

use crate::quota::QuotaUsage;

/// Quota usage read from the database.
#[derive(Clone)]
pub struct DbUsage {
    pool: DbPool,
}

impl DbUsage {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl QuotaUsage for DbUsage {
    fn storage_usage(&self, owner: &str, exclude: Option<ImageId>) -> Result<u64> {
        let conn = get_conn(&self.pool)?;
        usage::storage_usage(&conn, owner, exclude)
    }

    fn member_count(&self, image_id: ImageId) -> Result<u64> {
        let conn = get_conn(&self.pool)?;
        usage::member_count(&conn, image_id)
    }
}
