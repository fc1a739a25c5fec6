use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        DefaultBodyLimit, Path, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{BookResponse, CreateBookRequest, FeedResponse, MessageResponse, Pagination, UpdateBookRequest},
    services,
};
use crate::{auth::middleware::CurrentUser, error::AppError, state::AppState};

pub fn book_routes() -> Router<AppState> {
    Router::new()
        .route("/books", post(create_book).get(list_books))
        .route("/books/user", get(list_user_books))
        .route("/books/:id", patch(update_book).delete(delete_book))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024)) // 10MB, covers arrive inline as base64
}

#[instrument(skip(state, user, body), fields(user_id = %user.id))]
pub async fn create_book(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<CreateBookRequest>, JsonRejection>,
) -> Result<(StatusCode, HeaderMap, Json<BookResponse>), AppError> {
    let Json(body) = body?;
    let book = services::create_book(&state, &user, body).await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&format!("/api/v1/books/{}", book.id)) {
        headers.insert(header::LOCATION, location);
    }
    Ok((StatusCode::CREATED, headers, Json(book)))
}

#[instrument(skip(state, user, pagination), fields(user_id = %user.id))]
pub async fn list_books(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    pagination: Result<Query<Pagination>, QueryRejection>,
) -> Result<Json<FeedResponse>, AppError> {
    let Query(p) = pagination?;
    Ok(Json(services::feed(&state, p.page).await?))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn list_user_books(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<BookResponse>>, AppError> {
    Ok(Json(services::list_for_owner(&state, &user).await?))
}

#[instrument(skip(state, user, body), fields(user_id = %user.id))]
pub async fn update_book(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<UpdateBookRequest>, JsonRejection>,
) -> Result<Json<BookResponse>, AppError> {
    let Path(id) = id?;
    let Json(body) = body?;
    Ok(Json(services::update_book(&state, &user, id, body).await?))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn delete_book(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Path(id) = id?;
    services::delete_book(&state, &user, id).await?;
    Ok(Json(MessageResponse {
        message: "book removed successfully".into(),
    }))
}
