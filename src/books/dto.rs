use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Request body for creating a book. Fields are optional here so a missing
/// one is reported with our own message rather than a deserializer error.
#[derive(Deserialize)]
pub struct CreateBookRequest {
    pub title: Option<String>,
    pub caption: Option<String>,
    pub rating: Option<i64>,
    /// Base64 image, optionally as a `data:<mime>;base64,` URI.
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBookRequest {
    pub title: Option<String>,
    pub caption: Option<String>,
    pub rating: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: i64,
}
fn default_page() -> i64 {
    1
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub caption: String,
    pub rating: i16,
    pub image_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub username: String,
    pub profile_image: String,
}

#[derive(Debug, Serialize)]
pub struct FeedItem {
    #[serde(flatten)]
    pub book: BookResponse,
    pub author: Option<Author>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedResponse {
    pub books: Vec<FeedItem>,
    pub current_page: i64,
    pub total_books: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
