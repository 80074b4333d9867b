use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch},
    Router,
};
use serde_json::{Map, Value};
use tracing::instrument;

use super::services;
use crate::{
    auth::{CurrentUser, Policy, Resource, ADMIN_ONLY},
    error::{AppError, JsonBody},
    query::QueryParams,
    response::{no_content, ApiResponse},
    state::AppState,
    store::{parse_id, Document},
};

const OWNER_OR_ADMIN: Policy = Policy::OwnerOrRoles {
    roles: ADMIN_ONLY,
    resource: Resource::Comment,
};

/// Mounted at `/memes/:id/comments`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_comments).post(create_comment))
        .route("/:comment_id", patch(update_comment).delete(delete_comment))
}

#[instrument(skip(state, params))]
pub async fn list_comments(
    State(state): State<AppState>,
    Path(meme_id): Path<String>,
    params: QueryParams,
) -> Result<ApiResponse<Vec<Document>>, AppError> {
    let docs = services::list(&state, parse_id(&meme_id)?, params).await?;
    Ok(ApiResponse::list(docs))
}

#[instrument(skip(state, user, body))]
pub async fn create_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(meme_id): Path<String>,
    JsonBody(body): JsonBody<Map<String, Value>>,
) -> Result<ApiResponse<Document>, AppError> {
    let doc = services::create(&state, parse_id(&meme_id)?, &user, &body).await?;
    Ok(ApiResponse::created(doc))
}

#[instrument(skip(state, user, body))]
pub async fn update_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((meme_id, comment_id)): Path<(String, String)>,
    JsonBody(body): JsonBody<Map<String, Value>>,
) -> Result<ApiResponse<Document>, AppError> {
    let (meme_id, id) = (parse_id(&meme_id)?, parse_id(&comment_id)?);
    OWNER_OR_ADMIN.authorize(&state.store, &user, Some(id)).await?;
    Ok(ApiResponse::ok(services::update(&state, meme_id, id, &body).await?))
}

#[instrument(skip(state, user))]
pub async fn delete_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((meme_id, comment_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let (meme_id, id) = (parse_id(&meme_id)?, parse_id(&comment_id)?);
    OWNER_OR_ADMIN.authorize(&state.store, &user, Some(id)).await?;
    services::delete(&state, meme_id, id).await?;
    Ok(no_content())
}
