use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::CookieJar;
use tracing::{debug, warn};

use super::jwt::JwtKeys;
use crate::{error::AppError, state::AppState, users::repo_types::User};

pub const SESSION_COOKIE: &str = "jwt";

/// Bearer header first, then the session cookie.
fn session_token(parts: &Parts) -> Option<String> {
    let bearer = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }
    CookieJar::from_headers(&parts.headers)
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

async fn resolve(state: &AppState, token: &str) -> Result<User, AppError> {
    let claims = JwtKeys::from_ref(state).verify(token)?;
    let user = state
        .store
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| {
            warn!(user_id = %claims.sub, "token for missing account");
            AppError::unauthorized("The user belonging to this token does no longer exist.")
        })?;
    if user.changed_password_after(claims.iat as i64) {
        warn!(user_id = %user.id, "token issued before password change");
        return Err(AppError::unauthorized(
            "User recently changed password! Please log in again.",
        ));
    }
    Ok(user)
}

/// The authenticated account; rejects with 401.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(parts).ok_or_else(|| {
            AppError::unauthorized("You are not logged in! Please log in to get access.")
        })?;
        let user = resolve(state, &token).await?;
        debug!(user_id = %user.id, "request authenticated");
        Ok(CurrentUser(user))
    }
}

/// The authenticated account if there is one; never rejects.
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = session_token(parts) else {
            return Ok(MaybeUser(None));
        };
        Ok(MaybeUser(resolve(state, &token).await.ok()))
    }
}
