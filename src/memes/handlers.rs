use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::instrument;

use super::{
    dto::{LIST_LIMIT, LIST_SORT, TRENDING_FIELDS, TRENDING_LIMIT, TRENDING_SORT},
    services,
};
use crate::{
    auth::{CurrentUser, MaybeUser, Policy, Resource, ADMIN_ONLY},
    error::AppError,
    images::FormInput,
    query::QueryParams,
    response::{no_content, ApiResponse},
    state::AppState,
    store::{parse_id, Document, Filter},
};

const UPLOAD_BODY_LIMIT: usize = 20 * 1024 * 1024;

const OWNER_OR_ADMIN: Policy = Policy::OwnerOrRoles {
    roles: ADMIN_ONLY,
    resource: Resource::Meme,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_memes).post(create_meme))
        .route("/top-trending", get(top_trending))
        .route("/count", get(count_memes))
        .route("/me/likes", get(my_likes))
        .route("/:id", get(get_meme).patch(update_meme).delete(delete_meme))
        .route("/:id/like", post(like_meme))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
}

fn with_list_defaults(mut params: QueryParams) -> QueryParams {
    params.set_default("limit", LIST_LIMIT);
    params.set_default("sort", LIST_SORT);
    params
}

#[instrument(skip(state, params))]
pub async fn list_memes(
    State(state): State<AppState>,
    params: QueryParams,
) -> Result<ApiResponse<Vec<Document>>, AppError> {
    let docs = services::list(&state, Filter::new(), with_list_defaults(params)).await?;
    Ok(ApiResponse::list(docs))
}

#[instrument(skip(state, params))]
pub async fn top_trending(
    State(state): State<AppState>,
    mut params: QueryParams,
) -> Result<ApiResponse<Vec<Document>>, AppError> {
    params.set_default("limit", TRENDING_LIMIT);
    params.set("sort", TRENDING_SORT);
    params.set("fields", TRENDING_FIELDS);
    let docs = services::list(&state, Filter::new(), params).await?;
    Ok(ApiResponse::list(docs))
}

#[instrument(skip(state, params))]
pub async fn count_memes(
    State(state): State<AppState>,
    params: QueryParams,
) -> Result<Json<Value>, AppError> {
    let n = services::count(&state, params).await?;
    Ok(Json(json!({ "status": "success", "data": n })))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn my_likes(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: QueryParams,
) -> Result<ApiResponse<Vec<Document>>, AppError> {
    let docs = services::list(&state, services::liked_by(&user), with_list_defaults(params)).await?;
    Ok(ApiResponse::list(docs))
}

#[instrument(skip(state, viewer))]
pub async fn get_meme(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<Document>, AppError> {
    let doc = services::get_one(&state, parse_id(&id)?, viewer.as_ref()).await?;
    Ok(ApiResponse::ok(doc))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn create_meme(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    input: FormInput,
) -> Result<ApiResponse<Document>, AppError> {
    Ok(ApiResponse::created(services::create(&state, &user, input).await?))
}

#[instrument(skip(state, user, input))]
pub async fn update_meme(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    input: FormInput,
) -> Result<ApiResponse<Document>, AppError> {
    let id = parse_id(&id)?;
    OWNER_OR_ADMIN.authorize(&state.store, &user, Some(id)).await?;
    Ok(ApiResponse::ok(services::update(&state, id, input).await?))
}

#[instrument(skip(state, user))]
pub async fn delete_meme(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    OWNER_OR_ADMIN.authorize(&state.store, &user, Some(id)).await?;
    services::delete(&state, id).await?;
    Ok(no_content())
}

#[instrument(skip(state, user))]
pub async fn like_meme(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<Document>, AppError> {
    let doc = services::toggle_like(&state, parse_id(&id)?, &user).await?;
    Ok(ApiResponse::ok(doc))
}
