mod dto;
pub mod handlers;
pub mod repo_types;
mod services;

use axum::Router;

use crate::{auth::handlers::auth_routes, state::AppState};

/// Everything under `/users`.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(auth_routes())
        .merge(handlers::me_routes())
        .merge(handlers::admin_routes())
}
