use axum::{middleware::from_fn_with_state, Router};

use crate::{auth::middleware::require_auth, state::AppState};

mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;

/// Every book route sits behind the identity resolver.
pub fn router(state: &AppState) -> Router<AppState> {
    handlers::book_routes().route_layer(from_fn_with_state(state.clone(), require_auth))
}
