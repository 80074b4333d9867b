use serde_json::{Map, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{normalize, CreateUserRequest, ADMIN_CREATE_FIELDS, ADMIN_UPDATE_FIELDS, ME_FIELDS, PASSWORD_FIELDS},
    repo_types::User,
};
use crate::{
    auth::{dto::allowed, services::build_account},
    error::AppError,
    images::{
        services::{process_avatar, remove_later, store_all, Folder},
        FormInput,
    },
    query::{filter_fields, QueryFeatures, QueryParams},
    state::AppState,
    store::{Document, ReadQuery, Update},
};

pub async fn get_user(state: &AppState, id: Uuid) -> Result<Document, AppError> {
    let user = state
        .store
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(AppError::document_not_found)?;
    Ok(state.store.users.public(&user)?)
}

#[instrument(skip(state, params))]
pub async fn list_users(state: &AppState, params: QueryParams) -> Result<Vec<Document>, AppError> {
    let query = QueryFeatures::for_entity::<User>(ReadQuery::default(), params)?
        .apply_all()
        .into_query();
    Ok(state.store.users.find(query).await?)
}

#[instrument(skip(state, body))]
pub async fn create_user(state: &AppState, body: &Map<String, Value>) -> Result<Document, AppError> {
    let req: CreateUserRequest = allowed(body, ADMIN_CREATE_FIELDS)?;
    let (user, _) = build_account(req.into())?;
    let user = state.store.users.create(&user).await?;
    info!(user_id = %user.id, role = ?user.role, "account created by admin");
    Ok(state.store.users.public(&user)?)
}

async fn apply_update(state: &AppState, id: Uuid, fields: Map<String, Value>) -> Result<User, AppError> {
    state
        .store
        .users
        .find_by_id_and_update(id, Update::new().set_all(normalize(fields)))
        .await?
        .ok_or_else(AppError::document_not_found)
}

/// Profile update of the caller. An uploaded `avatar` replaces the stored one.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_me(state: &AppState, user: &User, input: FormInput) -> Result<Document, AppError> {
    if PASSWORD_FIELDS.iter().any(|f| input.fields.contains_key(*f)) {
        return Err(AppError::bad_request(
            "This route is not for password updates. Please use /me/updatePassword.",
        ));
    }
    input.expect_files("avatar", 1)?;

    let mut fields = filter_fields(&input.fields, ME_FIELDS);
    let avatar = match input.files_named("avatar").next() {
        Some(file) => Some(process_avatar(user.id, file).await?),
        None => None,
    };
    if let Some(img) = &avatar {
        fields.insert("avatar".into(), Value::String(img.filename.clone()));
    }

    let updated = apply_update(state, user.id, fields).await?;
    if let Some(img) = avatar {
        store_all(state, std::slice::from_ref(&img)).await?;
    }
    if updated.avatar != user.avatar {
        remove_later(state, Folder::Users, user.id, vec![user.avatar.clone()]);
    }
    info!("profile updated");
    Ok(state.store.users.public(&updated)?)
}

#[instrument(skip(state, body))]
pub async fn update_user(
    state: &AppState,
    id: Uuid,
    body: &Map<String, Value>,
) -> Result<Document, AppError> {
    let user = apply_update(state, id, filter_fields(body, ADMIN_UPDATE_FIELDS)).await?;
    info!(user_id = %user.id, "account updated by admin");
    Ok(state.store.users.public(&user)?)
}

/// Soft delete: the account drops out of every scoped query.
#[instrument(skip(state))]
pub async fn deactivate(state: &AppState, id: Uuid) -> Result<(), AppError> {
    state
        .store
        .users
        .find_by_id_and_update(id, Update::new().set("active", false))
        .await?
        .ok_or_else(|| {
            warn!(user_id = %id, "deactivate missing account");
            AppError::document_not_found()
        })?;
    info!(user_id = %id, "account deactivated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::services::NewAccount,
        users::repo_types::{Role, DEFAULT_AVATAR},
    };
    use axum::http::StatusCode;
    use serde_json::json;

    async fn seed(state: &AppState, pseudo: &str) -> User {
        let (user, _) = build_account(NewAccount {
            name: "Test".into(),
            pseudo: pseudo.into(),
            email: format!("{pseudo}@example.com"),
            password: "password123".into(),
            password_confirm: "password123".into(),
            role: Role::User,
            avatar: None,
            activated: true,
        })
        .unwrap();
        state.store.users.create(&user).await.unwrap()
    }

    fn form(fields: Value) -> FormInput {
        FormInput {
            fields: fields.as_object().unwrap().clone(),
            files: Vec::new(),
        }
    }

    #[tokio::test]
    async fn update_me_rejects_password_fields() {
        let state = AppState::fake();
        let user = seed(&state, "ann").await;
        let err = update_me(&state, &user, form(json!({"password": "x"})))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_me_ignores_role() {
        let state = AppState::fake();
        let user = seed(&state, "ben").await;
        let doc = update_me(&state, &user, form(json!({"name": "Benny", "role": "admin"})))
            .await
            .unwrap();
        assert_eq!(doc["name"], "Benny");
        assert_eq!(doc["role"], "user");
        assert!(doc.get("password").is_none());
    }

    #[tokio::test]
    async fn deactivated_accounts_disappear() {
        let state = AppState::fake();
        let user = seed(&state, "cat").await;
        deactivate(&state, user.id).await.unwrap();
        let err = get_user(&state, user.id).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(deactivate(&state, user.id).await.is_err());
    }

    #[tokio::test]
    async fn admin_update_rejects_unknown_role() {
        let state = AppState::fake();
        let user = seed(&state, "dan").await;
        let err = update_user(&state, user.id, json!({"role": "root"}).as_object().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().starts_with("Invalid input data."));
    }

    #[tokio::test]
    async fn duplicate_pseudo_is_reported() {
        let state = AppState::fake();
        seed(&state, "eve").await;
        let other = seed(&state, "fay").await;
        let err = update_user(&state, other.id, json!({"pseudo": "eve"}).as_object().unwrap())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Duplicate field value (eve). Please use another value."
        );
    }

    #[tokio::test]
    async fn avatar_upload_is_stored_and_renamed() {
        use crate::{images::UploadedFile, mail::MemoryMailer, storage::FakeStorage};
        use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
        use std::{io::Cursor, sync::Arc};

        let storage = Arc::new(FakeStorage::default());
        let state = AppState::fake_with(Arc::new(MemoryMailer::default()), storage.clone());
        let user = seed(&state, "gil").await;

        let mut png = Vec::new();
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(40, 30, Rgb([1u8, 2, 3])))
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        let input = FormInput {
            fields: Map::new(),
            files: vec![UploadedFile {
                field: "avatar".into(),
                content_type: "image/png".into(),
                bytes: png.into(),
            }],
        };
        let doc = update_me(&state, &user, input).await.unwrap();
        let avatar = doc["avatar"].as_str().unwrap();
        assert!(avatar.starts_with(&format!("user-{}-", user.id)));
        assert_eq!(storage.stored(), vec![format!("users/{avatar}")]);
        tokio::task::yield_now().await;
        assert!(storage.deleted().is_empty());

        let user = state.store.users.find_by_id(user.id).await.unwrap().unwrap();
        let doc = update_me(&state, &user, form(json!({"avatar": "other.jpeg"})))
            .await
            .unwrap();
        assert_eq!(doc["avatar"], "other.jpeg");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(storage.deleted(), vec![format!("users/{avatar}")]);
    }

    #[tokio::test]
    async fn avatar_changes_never_remove_foreign_or_default_files() {
        use crate::{mail::MemoryMailer, storage::FakeStorage};
        use std::sync::Arc;

        let storage = Arc::new(FakeStorage::default());
        let state = AppState::fake_with(Arc::new(MemoryMailer::default()), storage.clone());
        let victim = seed(&state, "hal").await;
        let user = seed(&state, "ivy").await;
        assert_eq!(user.avatar, DEFAULT_AVATAR);

        let theirs = format!("user-{}-1.jpeg", victim.id);
        update_me(&state, &user, form(json!({"avatar": theirs})))
            .await
            .unwrap();
        let user = state.store.users.find_by_id(user.id).await.unwrap().unwrap();
        update_me(&state, &user, form(json!({"avatar": "x.jpeg"})))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(storage.deleted().is_empty());
    }
}
