mod dto;
pub mod handlers;
pub mod repo_types;
mod services;
pub mod slug;

use axum::Router;

use crate::{comments, state::AppState};

/// Everything under `/memes`, comments included.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::routes())
        .nest("/:id/comments", comments::router())
}
