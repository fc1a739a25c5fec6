use axum::{middleware::from_fn_with_state, Router};

use crate::state::AppState;

mod claims;
pub mod credentials;
mod dto;
pub mod guard;
pub mod handlers;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod repo;
pub mod repo_types;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new().merge(handlers::auth_routes()).merge(
        handlers::me_routes()
            .route_layer(from_fn_with_state(state.clone(), middleware::require_auth)),
    )
}
