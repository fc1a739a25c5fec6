use tracing::warn;
use uuid::Uuid;

use crate::{auth::repo_types::PublicUser, error::AppError};

/// A record whose mutation is restricted to the identity that created it.
pub trait Owned {
    fn owner_id(&self) -> Uuid;
}

/// Call after loading `resource` and before touching it.
pub fn authorize_ownership<R: Owned>(user: &PublicUser, resource: &R) -> Result<(), AppError> {
    if resource.owner_id() != user.id {
        warn!(user_id = %user.id, "ownership check failed");
        return Err(AppError::Forbidden);
    }
    Ok(())
}
