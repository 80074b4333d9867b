use axum::{
    extract::FromRef,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use time::{Duration, OffsetDateTime};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{AuthResponse, SignupRequest, UserEnvelope},
    extractors::SESSION_COOKIE,
    jwt::JwtKeys,
    password::{check_new_password, hash_password, verify_password},
    tokens::{hash_token, OneTimeToken, ACTIVATION_TTL, RESET_TTL},
};
use crate::{
    error::AppError,
    mail::Email,
    state::AppState,
    store::{timestamp, CmpOp, Filter, Update},
    users::repo_types::{Role, User, DEFAULT_AVATAR},
};

/// Signs a session token for `user` and answers with it as cookie and body.
pub fn issue_session(state: &AppState, user: &User, status: StatusCode) -> Result<Response, AppError> {
    let token = JwtKeys::from_ref(state).sign(user.id)?;
    let cookie = Cookie::build((SESSION_COOKIE, token.clone()))
        .http_only(true)
        .path("/")
        .same_site(SameSite::Lax)
        .secure(state.config.is_production())
        .max_age(Duration::days(state.config.jwt.cookie_expires_in_days));
    let body = AuthResponse {
        status: "success",
        token,
        data: UserEnvelope {
            user: state.store.users.public(user)?,
        },
    };
    Ok((status, CookieJar::new().add(cookie), Json(body)).into_response())
}

/// Replaces the session cookie with a short-lived placeholder.
pub fn logout_cookie() -> CookieJar {
    CookieJar::new().add(
        Cookie::build((SESSION_COOKIE, "loggedout"))
            .http_only(true)
            .path("/")
            .max_age(Duration::seconds(10)),
    )
}

fn now() -> String {
    timestamp::format(OffsetDateTime::now_utc())
}

/// Matches an unexpired one-time token by digest.
fn token_filter(field: &str, expires_field: &str, plain: &str) -> Filter {
    Filter::new()
        .eq(field, hash_token(plain))
        .cmp(expires_field, CmpOp::Gt, now())
}

/// Password fields for a changed (not initial) password.
pub fn password_update(plain: &str) -> anyhow::Result<Update> {
    let changed_at = OffsetDateTime::now_utc() - Duration::seconds(1);
    Ok(Update::new()
        .set("password", hash_password(plain)?)
        .set("passwordChangedAt", timestamp::format(changed_at)))
}

pub struct NewAccount {
    pub name: String,
    pub pseudo: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
    pub role: Role,
    pub avatar: Option<String>,
    pub activated: bool,
}

impl From<SignupRequest> for NewAccount {
    fn from(req: SignupRequest) -> Self {
        Self {
            name: req.name,
            pseudo: req.pseudo,
            email: req.email,
            password: req.password,
            password_confirm: req.password_confirm,
            role: Role::User,
            avatar: None,
            activated: false,
        }
    }
}

/// Validates, hashes and builds an account. Unactivated accounts get an activation token.
pub fn build_account(input: NewAccount) -> Result<(User, Option<OneTimeToken>), AppError> {
    check_new_password(&input.password, &input.password_confirm)?;
    let activation = (!input.activated).then(|| OneTimeToken::generate(ACTIVATION_TTL));
    let user = User {
        id: Uuid::new_v4(),
        name: input.name.trim().to_string(),
        pseudo: input.pseudo.trim().to_string(),
        email: input.email.trim().to_lowercase(),
        avatar: input.avatar.unwrap_or_else(|| DEFAULT_AVATAR.to_string()),
        role: input.role,
        password: hash_password(&input.password)?,
        password_changed_at: None,
        account_activation_token: activation.as_ref().map(|t| t.hashed.clone()),
        account_activation_expires: activation.as_ref().map(|t| t.expires_at),
        password_reset_token: None,
        password_reset_expires: None,
        active: true,
        activated: input.activated,
        liked_memes: Vec::new(),
    };
    Ok((user, activation))
}

#[instrument(skip(state, input))]
pub async fn signup(state: &AppState, input: SignupRequest) -> Result<(), AppError> {
    let (user, activation) = build_account(input.into())?;
    let user = state.store.users.create(&user).await?;
    let Some(activation) = activation else {
        return Ok(());
    };

    let url = format!(
        "{}/api/v1/users/accountActivation/{}",
        state.config.public_url, activation.plain
    );
    let sent = Email::new(&state.config.mail, &user.name, &user.email, &url)
        .send_welcome(state.mailer.as_ref())
        .await;
    if let Err(e) = sent {
        error!(error = %e, user_id = %user.id, "activation mail failed; removing account");
        state.store.users.find_by_id_and_delete(user.id).await?;
        return Err(AppError::mail_failed());
    }
    info!(user_id = %user.id, "account created, activation pending");
    Ok(())
}

#[instrument(skip(state, token))]
pub async fn activate(state: &AppState, token: &str) -> Result<User, AppError> {
    let update = Update::new()
        .unset("accountActivationToken")
        .unset("accountActivationExpires")
        .set("activated", true);
    let user = state
        .store
        .users
        .find_one_and_update(
            token_filter("accountActivationToken", "accountActivationExpires", token),
            update,
        )
        .await?
        .ok_or_else(|| AppError::bad_request("Token is invalid or has expired"))?;
    info!(user_id = %user.id, "account activated");
    Ok(user)
}

#[instrument(skip(state, password))]
pub async fn login(state: &AppState, email: &str, password: &str) -> Result<User, AppError> {
    let email = email.trim().to_lowercase();
    let user = state
        .store
        .users
        .find_one(Filter::new().eq("email", email.as_str()).eq("activated", true))
        .await?;
    let Some(user) = user else {
        warn!(email = %email, "login unknown or unactivated email");
        return Err(AppError::unauthorized("Incorrect email or password"));
    };
    if !verify_password(password, &user.password)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::unauthorized("Incorrect email or password"));
    }
    info!(user_id = %user.id, "user logged in");
    Ok(user)
}

#[instrument(skip(state))]
pub async fn forgot_password(state: &AppState, email: &str) -> Result<(), AppError> {
    let email = email.trim().to_lowercase();
    let user = state
        .store
        .users
        .find_one(Filter::new().eq("email", email.as_str()))
        .await?
        .ok_or_else(|| AppError::not_found("There is no user with email address."))?;

    let reset = OneTimeToken::generate(RESET_TTL);
    state
        .store
        .users
        .find_by_id_and_update(
            user.id,
            Update::new()
                .set("passwordResetToken", reset.hashed.as_str())
                .set("passwordResetExpires", timestamp::format(reset.expires_at)),
        )
        .await?;

    let url = format!(
        "{}/api/v1/users/resetPassword/{}",
        state.config.public_url, reset.plain
    );
    let sent = Email::new(&state.config.mail, &user.name, &user.email, &url)
        .send_password_reset(state.mailer.as_ref())
        .await;
    if let Err(e) = sent {
        error!(error = %e, user_id = %user.id, "reset mail failed; clearing token");
        state
            .store
            .users
            .find_by_id_and_update(
                user.id,
                Update::new()
                    .unset("passwordResetToken")
                    .unset("passwordResetExpires"),
            )
            .await?;
        return Err(AppError::mail_failed());
    }
    info!(user_id = %user.id, "password reset mailed");
    Ok(())
}

#[instrument(skip(state, token, password, confirm))]
pub async fn reset_password(
    state: &AppState,
    token: &str,
    password: &str,
    confirm: &str,
) -> Result<User, AppError> {
    check_new_password(password, confirm)?;
    let update = password_update(password)?
        .unset("passwordResetToken")
        .unset("passwordResetExpires");
    let user = state
        .store
        .users
        .find_one_and_update(
            token_filter("passwordResetToken", "passwordResetExpires", token),
            update,
        )
        .await?
        .ok_or_else(|| AppError::bad_request("Token is invalid or has expired"))?;
    info!(user_id = %user.id, "password reset");
    Ok(user)
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_password(
    state: &AppState,
    user: &User,
    current: &str,
    password: &str,
    confirm: &str,
) -> Result<User, AppError> {
    if !verify_password(current, &user.password)? {
        warn!("wrong current password");
        return Err(AppError::unauthorized("Your current password is wrong."));
    }
    check_new_password(password, confirm)?;
    let user = state
        .store
        .users
        .find_by_id_and_update(user.id, password_update(password)?)
        .await?
        .ok_or_else(AppError::document_not_found)?;
    info!("password changed");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::MemoryMailer;
    use crate::storage::FakeStorage;
    use std::sync::Arc;

    fn signup_request(email: &str, pseudo: &str) -> SignupRequest {
        SignupRequest {
            name: "Ada Lovelace".into(),
            pseudo: pseudo.into(),
            email: email.into(),
            password: "password123".into(),
            password_confirm: "password123".into(),
        }
    }

    fn token_from(mail: &crate::mail::Mail, marker: &str) -> String {
        let start = mail.text.find(marker).unwrap() + marker.len();
        mail.text[start..].split_whitespace().next().unwrap().to_string()
    }

    #[tokio::test]
    async fn activation_token_redeems_once() {
        let mailer = Arc::new(MemoryMailer::default());
        let state = AppState::fake_with(mailer.clone(), Arc::new(FakeStorage::default()));
        signup(&state, signup_request("Ada@Example.com", "ada")).await.unwrap();

        assert!(login(&state, "ada@example.com", "password123").await.is_err());

        let token = token_from(&mailer.last().unwrap(), "accountActivation/");
        let user = activate(&state, &token).await.unwrap();
        assert!(user.activated);
        assert!(user.account_activation_token.is_none());
        assert!(activate(&state, &token).await.is_err());

        let logged = login(&state, "ada@example.com", "password123").await.unwrap();
        assert_eq!(logged.id, user.id);
    }

    #[tokio::test]
    async fn signup_rolls_back_when_mail_fails() {
        let state = AppState::fake_with(
            Arc::new(MemoryMailer::failing()),
            Arc::new(FakeStorage::default()),
        );
        let err = signup(&state, signup_request("bo@example.com", "bo")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            state.store.users.count(Filter::new()).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn reset_token_works_once_and_changes_password() {
        let mailer = Arc::new(MemoryMailer::default());
        let state = AppState::fake_with(mailer.clone(), Arc::new(FakeStorage::default()));
        signup(&state, signup_request("cy@example.com", "cy")).await.unwrap();
        let token = token_from(&mailer.last().unwrap(), "accountActivation/");
        activate(&state, &token).await.unwrap();

        forgot_password(&state, "cy@example.com").await.unwrap();
        let reset = token_from(&mailer.last().unwrap(), "resetPassword/");
        let user = reset_password(&state, &reset, "newpassword1", "newpassword1")
            .await
            .unwrap();
        assert!(user.password_changed_at.is_some());
        assert!(user.password_reset_token.is_none());
        assert!(reset_password(&state, &reset, "again12345", "again12345").await.is_err());

        assert!(login(&state, "cy@example.com", "password123").await.is_err());
        assert!(login(&state, "cy@example.com", "newpassword1").await.is_ok());
    }

    #[tokio::test]
    async fn expired_reset_token_is_rejected() {
        let mailer = Arc::new(MemoryMailer::default());
        let state = AppState::fake_with(mailer.clone(), Arc::new(FakeStorage::default()));
        signup(&state, signup_request("di@example.com", "di")).await.unwrap();
        let user = state
            .store
            .users
            .find_one(Filter::new().eq("email", "di@example.com"))
            .await
            .unwrap()
            .unwrap();
        let stale = OneTimeToken::generate(-Duration::minutes(1));
        state
            .store
            .users
            .find_by_id_and_update(
                user.id,
                Update::new()
                    .set("passwordResetToken", stale.hashed.as_str())
                    .set("passwordResetExpires", timestamp::format(stale.expires_at)),
            )
            .await
            .unwrap();
        let err = reset_password(&state, &stale.plain, "newpassword1", "newpassword1")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Token is invalid or has expired");
    }

    #[tokio::test]
    async fn forgot_password_for_unknown_email_is_404() {
        let state = AppState::fake();
        let err = forgot_password(&state, "nobody@example.com").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
