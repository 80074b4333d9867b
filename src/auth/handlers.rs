use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{patch, post},
    Json, Router,
};
use serde_json::{json, Map, Value};
use tracing::instrument;

use super::{
    dto::{
        allowed, ForgotPasswordRequest, LoginRequest, MessageResponse, ResetPasswordRequest,
        UpdatePasswordRequest, SIGNUP_FIELDS,
    },
    extractors::CurrentUser,
    services,
};
use crate::{
    error::{AppError, JsonBody},
    state::AppState,
};

/// Account lifecycle routes, mounted under `/users`.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/accountActivation/:token", patch(activate_account))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/forgotPassword", post(forgot_password))
        .route("/resetPassword/:token", patch(reset_password))
        .route("/me/updatePassword", patch(update_password))
}

#[instrument(skip(state, body))]
pub async fn signup(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Map<String, Value>>,
) -> Result<Json<MessageResponse>, AppError> {
    services::signup(&state, allowed(&body, SIGNUP_FIELDS)?).await?;
    Ok(Json(MessageResponse {
        status: "success",
        message: "Success! Activate your account via url in the email.",
    }))
}

#[instrument(skip(state, token))]
pub async fn activate_account(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response, AppError> {
    let user = services::activate(&state, &token).await?;
    services::issue_session(&state, &user, StatusCode::OK)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<Response, AppError> {
    let (Some(email), Some(password)) = (
        payload.email.filter(|e| !e.trim().is_empty()),
        payload.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::bad_request("Please provide email and password!"));
    };
    let user = services::login(&state, &email, &password).await?;
    services::issue_session(&state, &user, StatusCode::OK)
}

pub async fn logout() -> impl IntoResponse {
    (services::logout_cookie(), Json(json!({ "status": "success" })))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    services::forgot_password(&state, &payload.email).await?;
    Ok(Json(MessageResponse {
        status: "success",
        message: "Token sent to email!",
    }))
}

#[instrument(skip(state, token, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    JsonBody(payload): JsonBody<ResetPasswordRequest>,
) -> Result<Response, AppError> {
    let user =
        services::reset_password(&state, &token, &payload.password, &payload.password_confirm)
            .await?;
    services::issue_session(&state, &user, StatusCode::OK)
}

#[instrument(skip(state, user, payload))]
pub async fn update_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    JsonBody(payload): JsonBody<UpdatePasswordRequest>,
) -> Result<Response, AppError> {
    let user = services::update_password(
        &state,
        &user,
        &payload.password_current,
        &payload.password,
        &payload.password_confirm,
    )
    .await?;
    services::issue_session(&state, &user, StatusCode::OK)
}
