//! Builds the per-request proxy chains.
//!
//! The gateway owns the long-lived collaborators (configuration, database
//! pool, storage backend, notifier) and composes them into fresh chains for
//! each request context. Layer order is fixed: notification outermost,
//! quota next, storage beneath, the database-backed base at the bottom.

use std::sync::Arc;
use stowage_common::{Image, ImageId, RequestContext, Task};
use stowage_db::pool::DbPool;

use crate::config::Config;
use crate::notifier::{
    NotifyImage, NotifyImageFactory, NotifyImageRepo, NotifyTask, NotifyTaskFactory,
    NotifyTaskRepo, Notifier,
};
use crate::quota::{
    QuotaEnforcer, QuotaImage, QuotaImageFactory, QuotaImageRepo, QuotaMemberFactory,
};
use crate::repo::{
    BaseImageFactory, BaseMemberFactory, BaseTaskFactory, DbImageRepo, DbMemberRepo,
    DbTaskRepo, DbUsage,
};
use crate::store::{StorageBackend, StoreImage, StoreImageFactory, StoreImageRepo};

/// An image as handed to request handlers.
pub type GatewayImage = NotifyImage<QuotaImage<StoreImage<Image>>>;
pub type GatewayImageRepo = NotifyImageRepo<QuotaImageRepo<StoreImageRepo<DbImageRepo>>>;
pub type GatewayImageFactory =
    NotifyImageFactory<QuotaImageFactory<StoreImageFactory<BaseImageFactory>>>;
pub type GatewayTask = NotifyTask<Task>;
pub type GatewayTaskRepo = NotifyTaskRepo<DbTaskRepo>;
pub type GatewayTaskFactory = NotifyTaskFactory<BaseTaskFactory>;
pub type GatewayMemberFactory = QuotaMemberFactory<BaseMemberFactory>;

#[derive(Clone)]
pub struct Gateway {
    config: Arc<Config>,
    pool: DbPool,
    backend: Arc<dyn StorageBackend>,
    notifier: Notifier,
    enforcer: Arc<QuotaEnforcer>,
}

impl Gateway {
    pub fn new(
        config: Arc<Config>,
        pool: DbPool,
        backend: Arc<dyn StorageBackend>,
        notifier: Notifier,
    ) -> Self {
        let usage = Arc::new(DbUsage::new(pool.clone()));
        let enforcer = Arc::new(QuotaEnforcer::new(Arc::new(config.quota.clone()), usage));
        Self {
            config,
            pool,
            backend,
            notifier,
            enforcer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn enforcer(&self) -> &QuotaEnforcer {
        &self.enforcer
    }

    pub fn image_factory(&self, ctx: &RequestContext) -> GatewayImageFactory {
        let base = BaseImageFactory::new(ctx.clone());
        let store = StoreImageFactory::new(base, Arc::clone(&self.backend));
        let quota = QuotaImageFactory::new(
            store,
            ctx.clone(),
            Arc::clone(&self.enforcer),
            Arc::clone(&self.backend),
        );
        NotifyImageFactory::new(quota, ctx.clone(), self.notifier.clone())
    }

    pub fn image_repo(&self, ctx: &RequestContext) -> GatewayImageRepo {
        let base = DbImageRepo::new(self.pool.clone());
        let store = StoreImageRepo::new(base, Arc::clone(&self.backend));
        let quota = QuotaImageRepo::new(
            store,
            ctx.clone(),
            Arc::clone(&self.enforcer),
            Arc::clone(&self.backend),
        );
        NotifyImageRepo::new(quota, ctx.clone(), self.notifier.clone())
    }

    pub fn task_factory(&self, _ctx: &RequestContext) -> GatewayTaskFactory {
        let base = BaseTaskFactory::new(self.config.tasks.time_to_live());
        NotifyTaskFactory::new(base, self.notifier.clone())
    }

    pub fn task_repo(&self, _ctx: &RequestContext) -> GatewayTaskRepo {
        let base = DbTaskRepo::new(self.pool.clone(), self.config.tasks.time_to_live());
        NotifyTaskRepo::new(base, self.notifier.clone())
    }

    pub fn member_factory(&self, _ctx: &RequestContext) -> GatewayMemberFactory {
        QuotaMemberFactory::new(BaseMemberFactory, Arc::clone(&self.enforcer))
    }

    pub fn member_repo(&self, _ctx: &RequestContext, image_id: ImageId) -> DbMemberRepo {
        DbMemberRepo::new(self.pool.clone(), image_id)
    }
}
