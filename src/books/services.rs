use std::collections::HashMap;

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{Author, BookResponse, CreateBookRequest, FeedItem, FeedResponse, UpdateBookRequest},
    repo_types::Book,
};
use crate::{
    auth::{guard::authorize_ownership, repo_types::PublicUser},
    error::AppError,
    state::AppState,
};

pub const PAGE_SIZE: i64 = 10;
const PRESIGN_TTL_SECS: u64 = 30 * 60;

pub struct DecodedImage {
    pub body: Bytes,
    pub content_type: String,
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

/// Accepts raw base64 or a `data:<mime>;base64,<payload>` URI.
pub fn decode_image(input: &str) -> Result<DecodedImage, AppError> {
    let input = input.trim();
    let (content_type, payload) = match input.strip_prefix("data:") {
        Some(rest) => {
            let (meta, payload) = rest
                .split_once(',')
                .ok_or_else(|| AppError::validation("image data URI is malformed"))?;
            let mime = meta
                .strip_suffix(";base64")
                .ok_or_else(|| AppError::validation("image data URI must be base64"))?;
            if ext_from_mime(mime).is_none() {
                return Err(AppError::validation("unsupported image type"));
            }
            (mime.to_string(), payload)
        }
        None => ("application/octet-stream".to_string(), input),
    };

    let bytes = STANDARD
        .decode(payload)
        .map_err(|_| AppError::validation("image is not valid base64"))?;
    if bytes.is_empty() {
        return Err(AppError::validation("image is empty"));
    }
    Ok(DecodedImage {
        body: Bytes::from(bytes),
        content_type,
    })
}

fn required(field: Option<String>) -> Option<String> {
    field.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn check_rating(rating: i64) -> Result<i16, AppError> {
    if !(1..=5).contains(&rating) {
        return Err(AppError::validation("rating must be between 1 and 5"));
    }
    Ok(rating as i16)
}

async fn to_response(st: &AppState, book: Book) -> anyhow::Result<BookResponse> {
    let image_url = st
        .storage
        .presign_get(&book.image_key, PRESIGN_TTL_SECS)
        .await
        .with_context(|| format!("presign cover {}", book.image_key))?;
    Ok(BookResponse {
        id: book.id,
        owner_id: book.user_id,
        title: book.title,
        caption: book.caption,
        rating: book.rating,
        image_url,
        created_at: book.created_at,
        updated_at: book.updated_at,
    })
}

pub async fn create_book(
    st: &AppState,
    owner: &PublicUser,
    req: CreateBookRequest,
) -> Result<BookResponse, AppError> {
    let (Some(title), Some(caption), Some(rating), Some(image)) = (
        required(req.title),
        required(req.caption),
        req.rating,
        required(req.image),
    ) else {
        return Err(AppError::validation("please fill all fields"));
    };
    let rating = check_rating(rating)?;
    let image = decode_image(&image)?;

    let id = Uuid::new_v4();
    let ext = ext_from_mime(&image.content_type).unwrap_or("bin");
    let image_key = format!("books/{}/{}.{}", owner.id, id, ext);
    st.storage
        .put_object(&image_key, image.body, &image.content_type)
        .await
        .with_context(|| format!("put_object {}", image_key))?;

    let now = st.clock.now();
    let book = Book {
        id,
        user_id: owner.id,
        title,
        caption,
        rating,
        image_key,
        created_at: now,
        updated_at: now,
    };
    if let Err(e) = st.books.insert(&book).await {
        if let Err(cleanup) = st.storage.delete_object(&book.image_key).await {
            warn!(error = ?cleanup, key = %book.image_key, "orphaned cover delete failed");
        }
        return Err(e.into());
    }

    info!(book_id = %book.id, user_id = %owner.id, "book created");
    Ok(to_response(st, book).await?)
}

pub async fn feed(st: &AppState, page: i64) -> Result<FeedResponse, AppError> {
    let page = page.max(1);
    let offset = (page - 1).saturating_mul(PAGE_SIZE);
    let books = st.books.list_page(PAGE_SIZE, offset).await?;
    let total_books = st.books.count().await?;

    let mut authors: HashMap<Uuid, Option<Author>> = HashMap::new();
    let mut items = Vec::with_capacity(books.len());
    for book in books {
        if !authors.contains_key(&book.user_id) {
            let author = match st.credentials.find_by_id(book.user_id).await {
                Ok(u) => Some(Author {
                    username: u.username,
                    profile_image: u.profile_image,
                }),
                Err(AppError::NotFound(_)) => None,
                Err(e) => return Err(e),
            };
            authors.insert(book.user_id, author);
        }
        let author = authors.get(&book.user_id).cloned().flatten();
        items.push(FeedItem {
            book: to_response(st, book).await?,
            author,
        });
    }

    Ok(FeedResponse {
        books: items,
        current_page: page,
        total_books,
        total_pages: (total_books + PAGE_SIZE - 1) / PAGE_SIZE,
    })
}

pub async fn list_for_owner(
    st: &AppState,
    owner: &PublicUser,
) -> Result<Vec<BookResponse>, AppError> {
    let books = st.books.list_by_owner(owner.id).await?;
    let mut out = Vec::with_capacity(books.len());
    for book in books {
        out.push(to_response(st, book).await?);
    }
    Ok(out)
}

pub async fn update_book(
    st: &AppState,
    user: &PublicUser,
    id: Uuid,
    req: UpdateBookRequest,
) -> Result<BookResponse, AppError> {
    let mut book = st
        .books
        .find_by_id(id)
        .await?
        .ok_or(AppError::NotFound("book"))?;
    authorize_ownership(user, &book)?;

    if req.title.is_none() && req.caption.is_none() && req.rating.is_none() {
        return Err(AppError::validation("nothing to update"));
    }
    if let Some(title) = req.title {
        book.title = required(Some(title)).ok_or_else(|| AppError::validation("title is empty"))?;
    }
    if let Some(caption) = req.caption {
        book.caption =
            required(Some(caption)).ok_or_else(|| AppError::validation("caption is empty"))?;
    }
    if let Some(rating) = req.rating {
        book.rating = check_rating(rating)?;
    }
    book.updated_at = st.clock.now();
    st.books.update(&book).await?;

    info!(book_id = %book.id, "book updated");
    Ok(to_response(st, book).await?)
}

pub async fn delete_book(st: &AppState, user: &PublicUser, id: Uuid) -> Result<(), AppError> {
    let book = st
        .books
        .find_by_id(id)
        .await?
        .ok_or(AppError::NotFound("book"))?;
    authorize_ownership(user, &book)?;

    if !st.books.delete(book.id).await? {
        return Err(AppError::NotFound("book"));
    }

    // The row is gone either way; a stray cover is only logged.
    if let Err(e) = st.storage.delete_object(&book.image_key).await {
        warn!(error = ?e, key = %book.image_key, "cover delete failed");
    }

    info!(book_id = %book.id, user_id = %user.id, "book deleted");
    Ok(())
}
