//! Caller identity passed through every proxy layer.

use serde::{Deserialize, Serialize};

/// Opaque caller identity for one request.
///
/// The core reads it, never mutates it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Tenant the caller acts for.
    pub tenant: Option<String>,
    /// Individual user making the call.
    pub user: Option<String>,
    /// Admins bypass storage quota enforcement.
    pub is_admin: bool,
}

impl RequestContext {
    /// Context for a regular tenant user.
    pub fn new(tenant: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            tenant: Some(tenant.into()),
            user: Some(user.into()),
            is_admin: false,
        }
    }

    /// Context for an administrator acting in a tenant.
    pub fn admin(tenant: impl Into<String>) -> Self {
        Self {
            tenant: Some(tenant.into()),
            user: None,
            is_admin: true,
        }
    }

    /// The owner new resources are attributed to: the tenant, else the user.
    pub fn owner(&self) -> Option<&str> {
        self.tenant.as_deref().or(self.user.as_deref())
    }
}
