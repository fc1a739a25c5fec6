use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::guard::Owned;

/// Book record in the database. `user_id` is the owner and never changes.
#[derive(Debug, Clone, FromRow)]
pub struct Book {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub caption: String,
    pub rating: i16,
    pub image_key: String, // object store key of the cover
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Owned for Book {
    fn owner_id(&self) -> Uuid {
        self.user_id
    }
}
