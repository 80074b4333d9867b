use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::get,
    Router,
};
use serde_json::{Map, Value};
use tracing::instrument;

use super::services;
use crate::{
    auth::{CurrentUser, Policy, ADMIN_ONLY},
    error::{AppError, JsonBody},
    images::FormInput,
    query::QueryParams,
    response::{no_content, ApiResponse},
    state::AppState,
    store::{parse_id, Document},
    users::repo_types::User,
};

const AVATAR_BODY_LIMIT: usize = 10 * 1024 * 1024;

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me).patch(update_me).delete(delete_me))
        .layer(DefaultBodyLimit::max(AVATAR_BODY_LIMIT))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/:id", get(get_user).patch(update_user).delete(delete_user))
}

async fn require_admin(state: &AppState, user: &User) -> Result<(), AppError> {
    Policy::Roles(ADMIN_ONLY).authorize(&state.store, user, None).await
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<ApiResponse<Document>, AppError> {
    Ok(ApiResponse::ok(services::get_user(&state, user.id).await?))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    input: FormInput,
) -> Result<ApiResponse<Document>, AppError> {
    Ok(ApiResponse::ok(services::update_me(&state, &user, input).await?))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn delete_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, AppError> {
    services::deactivate(&state, user.id).await?;
    Ok(no_content())
}

#[instrument(skip(state, user, params))]
pub async fn list_users(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: QueryParams,
) -> Result<ApiResponse<Vec<Document>>, AppError> {
    require_admin(&state, &user).await?;
    Ok(ApiResponse::list(services::list_users(&state, params).await?))
}

#[instrument(skip(state, user, body))]
pub async fn create_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    JsonBody(body): JsonBody<Map<String, Value>>,
) -> Result<ApiResponse<Document>, AppError> {
    require_admin(&state, &user).await?;
    Ok(ApiResponse::created(services::create_user(&state, &body).await?))
}

#[instrument(skip(state, user))]
pub async fn get_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<Document>, AppError> {
    require_admin(&state, &user).await?;
    Ok(ApiResponse::ok(services::get_user(&state, parse_id(&id)?).await?))
}

#[instrument(skip(state, user, body))]
pub async fn update_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<Map<String, Value>>,
) -> Result<ApiResponse<Document>, AppError> {
    require_admin(&state, &user).await?;
    Ok(ApiResponse::ok(
        services::update_user(&state, parse_id(&id)?, &body).await?,
    ))
}

#[instrument(skip(state, user))]
pub async fn delete_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    require_admin(&state, &user).await?;
    services::deactivate(&state, parse_id(&id)?).await?;
    Ok(no_content())
}
