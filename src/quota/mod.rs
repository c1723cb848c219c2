//! Quota policy engine.
//!
//! Four dimensions are enforced: storage bytes per owner, and the number of
//! extra properties, tags and members per image. The checks themselves are
//! pure functions ([`check_storage_quota`], [`check_count_quota`]);
//! [`QuotaEnforcer`] binds them to the configured limits and to a
//! [`QuotaUsage`] source for current consumption.
//!
//! Checks read usage and decide without any locking, so two concurrent
//! uploads for one owner can both pass and jointly exceed the ceiling.

mod proxy;

pub use proxy::{QuotaImage, QuotaImageFactory, QuotaImageRepo, QuotaMemberFactory};

use std::sync::Arc;
use stowage_common::{Error, ImageId, RequestContext, Result};

use crate::config::{QuotaConfig, StorageQuota};

/// Source of current consumption figures.
pub trait QuotaUsage: Send + Sync {
    /// Bytes stored by `owner`: for every live image, its size times its number
    /// of live locations. `exclude` leaves one image out of the sum.
    fn storage_usage(&self, owner: &str, exclude: Option<ImageId>) -> Result<u64>;

    /// Live members of one image.
    fn member_count(&self, image_id: ImageId) -> Result<u64>;
}

/// Per-image countable dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountKind {
    Properties,
    Tags,
    Members,
}

impl CountKind {
    fn exceeded(self, attempted: u64, maximum: u64) -> Error {
        match self {
            CountKind::Properties => Error::PropertyLimitExceeded { attempted, maximum },
            CountKind::Tags => Error::TagLimitExceeded { attempted, maximum },
            CountKind::Members => Error::MemberLimitExceeded { attempted, maximum },
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            CountKind::Properties => "image_property_quota",
            CountKind::Tags => "image_tag_quota",
            CountKind::Members => "image_member_quota",
        }
    }
}

/// Decide whether `requested` more bytes fit next to `consumed`.
///
/// An unknown request size only fails when nothing at all is left; the
/// caller re-checks once the real size is known.
pub fn check_storage_quota(
    ctx: &RequestContext,
    quota: StorageQuota,
    requested: Option<u64>,
    consumed: u64,
) -> Result<()> {
    if ctx.is_admin {
        return Ok(());
    }
    let Some(limit) = quota.limit() else {
        return Ok(());
    };

    let remaining = limit.saturating_sub(consumed);
    let exceeded = match requested {
        Some(size) => size > remaining,
        None => remaining == 0,
    };

    if exceeded {
        tracing::info!(
            owner = ctx.owner().unwrap_or("-"),
            ?requested,
            consumed,
            limit,
            "Storage quota exceeded"
        );
        return Err(Error::StorageQuotaFull {
            attempted: requested,
            consumed,
            limit,
        });
    }
    Ok(())
}

/// Decide whether a collection of `attempted` elements fits under `limit`.
/// Negative limits are unlimited.
pub fn check_count_quota(kind: CountKind, attempted: usize, limit: i64) -> Result<()> {
    if limit < 0 {
        return Ok(());
    }

    let attempted = attempted as u64;
    let maximum = limit as u64;
    if attempted > maximum {
        tracing::info!(quota = kind.as_str(), attempted, maximum, "Count quota exceeded");
        return Err(kind.exceeded(attempted, maximum));
    }
    Ok(())
}

/// Configured limits plus the usage source they are checked against.
#[derive(Clone)]
pub struct QuotaEnforcer {
    config: Arc<QuotaConfig>,
    usage: Arc<dyn QuotaUsage>,
}

impl QuotaEnforcer {
    pub fn new(config: Arc<QuotaConfig>, usage: Arc<dyn QuotaUsage>) -> Self {
        Self { config, usage }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Bytes the caller's owner has stored. Callers without an owner have none.
    pub fn consumed(&self, ctx: &RequestContext, exclude: Option<ImageId>) -> Result<u64> {
        match ctx.owner() {
            Some(owner) => self.usage.storage_usage(owner, exclude),
            None => Ok(0),
        }
    }

    /// Bytes left for the caller's owner, or `None` when unlimited.
    pub fn remaining(&self, ctx: &RequestContext, exclude: Option<ImageId>) -> Result<Option<u64>> {
        match self.config.user_storage_quota.limit() {
            Some(limit) => Ok(Some(limit.saturating_sub(self.consumed(ctx, exclude)?))),
            None => Ok(None),
        }
    }

    /// Check that `requested` more bytes fit. `exclude` leaves an image's own
    /// current usage out, for operations that replace its data wholesale.
    pub fn check_storage(
        &self,
        ctx: &RequestContext,
        requested: Option<u64>,
        exclude: Option<ImageId>,
    ) -> Result<()> {
        let quota = self.config.user_storage_quota;
        if ctx.is_admin || quota.is_unlimited() {
            return Ok(());
        }
        let consumed = self.consumed(ctx, exclude)?;
        check_storage_quota(ctx, quota, requested, consumed)
    }

    pub fn check_properties(&self, count: usize) -> Result<()> {
        check_count_quota(CountKind::Properties, count, self.config.image_property_quota)
    }

    pub fn check_tags(&self, count: usize) -> Result<()> {
        check_count_quota(CountKind::Tags, count, self.config.image_tag_quota)
    }

    /// Check that one more member fits on `image_id`.
    pub fn check_members(&self, image_id: ImageId) -> Result<()> {
        let limit = self.config.image_member_quota;
        if limit < 0 {
            return Ok(());
        }
        let current = self.usage.member_count(image_id)? as usize;
        check_count_quota(CountKind::Members, current + 1, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedUsage {
        bytes: HashMap<String, u64>,
        members: u64,
    }

    impl QuotaUsage for FixedUsage {
        fn storage_usage(&self, owner: &str, _exclude: Option<ImageId>) -> Result<u64> {
            Ok(self.bytes.get(owner).copied().unwrap_or(0))
        }

        fn member_count(&self, _image_id: ImageId) -> Result<u64> {
            Ok(self.members)
        }
    }

    fn enforcer(config: QuotaConfig, used: u64, members: u64) -> QuotaEnforcer {
        let mut bytes = HashMap::new();
        bytes.insert("tenant".to_string(), used);
        QuotaEnforcer::new(Arc::new(config), Arc::new(FixedUsage { bytes, members }))
    }

    fn ctx() -> RequestContext {
        RequestContext::new("tenant", "user")
    }

    #[test]
    fn test_storage_within_limit() {
        let quota = StorageQuota::bytes(10);
        check_storage_quota(&ctx(), quota, Some(10), 0).unwrap();
        check_storage_quota(&ctx(), quota, Some(4), 6).unwrap();
        check_storage_quota(&ctx(), quota, None, 9).unwrap();
    }

    #[test]
    fn test_storage_exceeded_reports_figures() {
        let err = check_storage_quota(&ctx(), StorageQuota::bytes(10), Some(11), 0).unwrap_err();
        assert!(matches!(
            err,
            Error::StorageQuotaFull {
                attempted: Some(11),
                consumed: 0,
                limit: 10
            }
        ));

        let err = check_storage_quota(&ctx(), StorageQuota::bytes(10), None, 10).unwrap_err();
        assert!(matches!(err, Error::StorageQuotaFull { attempted: None, .. }));
    }

    #[test]
    fn test_storage_unlimited_and_admin() {
        check_storage_quota(&ctx(), StorageQuota::UNLIMITED, Some(u64::MAX), u64::MAX).unwrap();

        let admin = RequestContext::admin("ops");
        check_storage_quota(&admin, StorageQuota::bytes(0), Some(1), 0).unwrap();
    }

    #[test]
    fn test_storage_zero_limit_rejects_everything() {
        assert!(check_storage_quota(&ctx(), StorageQuota::bytes(0), Some(1), 0).is_err());
        assert!(check_storage_quota(&ctx(), StorageQuota::bytes(0), None, 0).is_err());
    }

    #[test]
    fn test_count_quota() {
        check_count_quota(CountKind::Tags, 1, 1).unwrap();
        check_count_quota(CountKind::Tags, 1_000_000, -1).unwrap();
        check_count_quota(CountKind::Tags, 0, 0).unwrap();

        let err = check_count_quota(CountKind::Tags, 2, 1).unwrap_err();
        assert!(err.to_string().contains("Attempted: 2, Maximum: 1"));

        let err = check_count_quota(CountKind::Properties, 3, 0).unwrap_err();
        assert!(matches!(err, Error::PropertyLimitExceeded { attempted: 3, maximum: 0 }));
    }

    #[test]
    fn test_enforcer_uses_owner_usage() {
        let config = QuotaConfig {
            user_storage_quota: StorageQuota::bytes(100),
            ..Default::default()
        };
        let enforcer = enforcer(config, 95, 0);

        assert_eq!(enforcer.remaining(&ctx(), None).unwrap(), Some(5));
        enforcer.check_storage(&ctx(), Some(5), None).unwrap();
        assert!(enforcer.check_storage(&ctx(), Some(6), None).is_err());

        // No owner, nothing consumed.
        let anonymous = RequestContext::default();
        enforcer.check_storage(&anonymous, Some(100), None).unwrap();
    }

    #[test]
    fn test_enforcer_member_limit() {
        let config = QuotaConfig {
            image_member_quota: 2,
            ..Default::default()
        };
        enforcer(config.clone(), 0, 1).check_members(ImageId::new()).unwrap();

        let err = enforcer(config, 0, 2)
            .check_members(ImageId::new())
            .unwrap_err();
        assert!(err.to_string().contains("Attempted: 3, Maximum: 2"));
    }
}
