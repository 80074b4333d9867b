use axum::{
    extract::{Path, State},
    response::Redirect,
    routing::get,
    Router,
};
use tracing::instrument;

use super::services::{presign, Folder};
use crate::{error::AppError, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/img/memes/:file", get(meme_image))
        .route("/img/users/:file", get(user_image))
}

fn check_name(file: &str) -> Result<(), AppError> {
    if file.is_empty() || file.contains("..") || file.contains('/') {
        return Err(AppError::not_found(format!("Can't find {file} on this server")));
    }
    Ok(())
}

/// Redirects to a presigned URL of the stored object.
#[instrument(skip(state))]
pub async fn meme_image(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Redirect, AppError> {
    check_name(&file)?;
    let url = presign(&state, Folder::Memes, &file).await?;
    Ok(Redirect::temporary(&url))
}

#[instrument(skip(state))]
pub async fn user_image(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Redirect, AppError> {
    check_name(&file)?;
    let url = presign(&state, Folder::Users, &file).await?;
    Ok(Redirect::temporary(&url))
}
