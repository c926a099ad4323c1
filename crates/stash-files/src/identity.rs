//! Identity context for resolving the acting principal
//!
//! The auth layer lives outside this crate; operations only need the
//! owner id of the caller. Each service method resolves it through
//! this trait at entry, so an unauthenticated request never reaches
//! either store.

use async_trait::async_trait;

use crate::error::FileError;

/// Resolves the owner id of the principal a request acts as
#[async_trait]
pub trait IdentityContext: Send + Sync {
    async fn current_owner_id(&self) -> Result<i32, FileError>;
}

/// Identity resolved ahead of time, e.g. from verified token claims
pub struct FixedIdentity(pub i32);

#[async_trait]
impl IdentityContext for FixedIdentity {
    async fn current_owner_id(&self) -> Result<i32, FileError> {
        Ok(self.0)
    }
}
