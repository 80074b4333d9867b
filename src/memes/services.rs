use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{
        listify, CreateMemeRequest, CREATE_FIELDS, MAX_IMAGES, OWNER_FIELDS, PROFILE_FIELDS,
        UPDATE_FIELDS,
    },
    repo_types::{Category, Meme},
    slug::slugify,
};
use crate::{
    auth::dto::allowed,
    error::AppError,
    images::{
        services::{process_meme_images, remove_later, store_all, Folder, ProcessedImage},
        FormInput,
    },
    query::{filter_fields, QueryFeatures, QueryParams},
    state::AppState,
    store::{Direction, Document, Filter, ReadQuery, SortKey, Update},
    users::repo_types::User,
};

const IMAGE_FIELD: &str = "images";

/// Runs the query builder over memes and populates owners.
#[instrument(skip(state, params))]
pub async fn list(state: &AppState, base: Filter, params: QueryParams) -> Result<Vec<Document>, AppError> {
    let query = QueryFeatures::for_entity::<Meme>(ReadQuery::new(base), params)?
        .apply_all()
        .into_query();
    let mut docs = state.store.memes.find(query).await?;
    state.store.users.populate(&mut docs, "user", OWNER_FIELDS).await?;
    Ok(docs)
}

/// Number of memes matching the filter parameters.
pub async fn count(state: &AppState, params: QueryParams) -> Result<u64, AppError> {
    let filter = QueryFeatures::for_entity::<Meme>(ReadQuery::default(), params)?
        .filter()
        .into_query()
        .filter;
    Ok(state.store.memes.count(filter).await?)
}

pub fn liked_by(user: &User) -> Filter {
    let ids = user
        .liked_memes
        .iter()
        .map(|id| Value::String(id.to_string()))
        .collect();
    Filter::new().is_in("id", ids)
}

async fn upload(user_id: Uuid, input: &FormInput) -> Result<Vec<ProcessedImage>, AppError> {
    input.expect_files(IMAGE_FIELD, MAX_IMAGES)?;
    process_meme_images(user_id, input.files_named(IMAGE_FIELD)).await
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn create(state: &AppState, user: &User, mut input: FormInput) -> Result<Document, AppError> {
    let processed = upload(user.id, &input).await?;
    listify(&mut input.fields, &["tags", IMAGE_FIELD]);
    let req: CreateMemeRequest = allowed(&input.fields, CREATE_FIELDS)?;

    let category = match req.category.as_deref() {
        Some(raw) => raw.parse::<Category>()?,
        None => Category::default(),
    };
    let images = if processed.is_empty() {
        req.images
    } else {
        processed.iter().map(|img| img.filename.clone()).collect()
    };
    let name = req.name.trim().to_string();
    let id = Uuid::new_v4();
    let meme = Meme {
        id,
        slug: slugify(&name, id),
        name,
        description: req.description,
        category,
        tags: req.tags,
        origin: req.origin,
        image_cover: images.first().cloned().unwrap_or_default(),
        images,
        created_at: OffsetDateTime::now_utc(),
        views: 0,
        likes_count: 0,
        likes: Vec::new(),
        comments_count: 0,
        user: user.id,
    };
    let meme = state.store.memes.create(&meme).await?;
    store_all(state, &processed).await?;
    info!(meme_id = %meme.id, images = meme.images.len(), "meme created");
    Ok(state.store.memes.public(&meme)?)
}

/// Derived fields that follow `name` and `images`.
fn derive(id: Uuid, fields: &mut Map<String, Value>) {
    if let Some(Value::String(name)) = fields.get("name") {
        let name = name.trim().to_string();
        fields.insert("slug".into(), Value::String(slugify(&name, id)));
        fields.insert("name".into(), Value::String(name));
    }
    if let Some(Value::Array(images)) = fields.get(IMAGE_FIELD) {
        let cover = images.first().cloned().unwrap_or(Value::Null);
        fields.insert("imageCover".into(), cover);
    }
}

#[instrument(skip(state, input))]
pub async fn update(state: &AppState, id: Uuid, mut input: FormInput) -> Result<Document, AppError> {
    let current = state
        .store
        .memes
        .find_by_id(id)
        .await?
        .ok_or_else(AppError::document_not_found)?;
    let processed = upload(current.user, &input).await?;
    listify(&mut input.fields, &["tags", IMAGE_FIELD]);

    let mut fields = filter_fields(&input.fields, UPDATE_FIELDS);
    if !processed.is_empty() {
        let names = processed
            .iter()
            .map(|img| Value::String(img.filename.clone()))
            .collect();
        fields.insert(IMAGE_FIELD.into(), Value::Array(names));
    }
    derive(id, &mut fields);

    let meme = state
        .store
        .memes
        .find_by_id_and_update(id, Update::new().set_all(fields))
        .await?
        .ok_or_else(AppError::document_not_found)?;
    store_all(state, &processed).await?;

    let replaced: Vec<String> = current
        .images
        .into_iter()
        .filter(|old| !meme.images.contains(old))
        .collect();
    remove_later(state, Folder::Memes, meme.user, replaced);
    info!(meme_id = %meme.id, "meme updated");
    Ok(state.store.memes.public(&meme)?)
}

/// Removes the meme, its comments, and every reference to it.
#[instrument(skip(state))]
pub async fn delete(state: &AppState, id: Uuid) -> Result<(), AppError> {
    let meme = state
        .store
        .memes
        .find_by_id_and_delete(id)
        .await?
        .ok_or_else(AppError::document_not_found)?;
    let comments = state
        .store
        .comments
        .delete_many(Filter::new().eq("meme", id.to_string()))
        .await?;
    state
        .store
        .users
        .update_many(
            Filter::new().eq("likedMemes", id.to_string()),
            Update::new().pull("likedMemes", id.to_string()),
        )
        .await?;
    remove_later(state, Folder::Memes, meme.user, meme.images);
    info!(meme_id = %id, comments, "meme deleted");
    Ok(())
}

/// Single read: bumps `views`, populates owner, likers and comments.
#[instrument(skip(state, viewer))]
pub async fn get_one(state: &AppState, id: Uuid, viewer: Option<&User>) -> Result<Document, AppError> {
    let meme = state
        .store
        .memes
        .find_by_id_and_update(id, Update::new().inc("views", 1))
        .await?
        .ok_or_else(AppError::document_not_found)?;

    let mut docs = vec![state.store.memes.public(&meme)?];
    state.store.users.populate(&mut docs, "user", OWNER_FIELDS).await?;
    state.store.users.populate(&mut docs, "likes", PROFILE_FIELDS).await?;

    let mut comments = state
        .store
        .comments
        .find(ReadQuery {
            sort: vec![
                SortKey { field: "createdAt".into(), direction: Direction::Desc },
                SortKey { field: "id".into(), direction: Direction::Asc },
            ],
            ..ReadQuery::new(Filter::new().eq("meme", id.to_string()))
        })
        .await?;
    state.store.users.populate(&mut comments, "user", PROFILE_FIELDS).await?;

    let mut doc = docs.remove(0);
    doc.insert("mark".into(), Value::from(meme.mark()));
    doc.insert(
        "likedByMe".into(),
        Value::Bool(viewer.map(|u| meme.likes.contains(&u.id)).unwrap_or(false)),
    );
    doc.insert(
        "comments".into(),
        Value::Array(comments.into_iter().map(Value::Object).collect()),
    );
    Ok(doc)
}

/// Likes the meme, or unlikes it when the caller already did.
#[instrument(skip_all, fields(meme_id = %id, user_id = %user.id))]
pub async fn toggle_like(state: &AppState, id: Uuid, user: &User) -> Result<Document, AppError> {
    let me = user.id.to_string();
    let memes = &state.store.memes;

    let liked = memes
        .find_one_and_update(
            Filter::by_id(id).ne("likes", me.as_str()),
            Update::new().inc("likesCount", 1).push("likes", me.as_str()),
        )
        .await?;
    let (meme, account_update) = match liked {
        Some(meme) => (meme, Some(Update::new().push("likedMemes", id.to_string()))),
        None => {
            let unliked = memes
                .find_one_and_update(
                    Filter::by_id(id).eq("likes", me.as_str()),
                    Update::new().inc("likesCount", -1).pull("likes", me.as_str()),
                )
                .await?;
            match unliked {
                Some(meme) => (meme, Some(Update::new().pull("likedMemes", id.to_string()))),
                None => {
                    // Changed between the two attempts; answer with what is stored now.
                    let meme = memes
                        .find_by_id(id)
                        .await?
                        .ok_or_else(AppError::document_not_found)?;
                    (meme, None)
                }
            }
        }
    };

    if let Some(update) = account_update {
        if let Err(e) = state.store.users.find_by_id_and_update(user.id, update).await {
            warn!(error = %e, "likedMemes out of sync with likes");
            return Err(e.into());
        }
    }
    info!(liked = meme.likes.contains(&user.id), "like toggled");
    Ok(memes.public(&meme)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::services::{build_account, NewAccount},
        comments::repo_types::Comment,
        users::repo_types::Role,
    };
    use axum::http::StatusCode;
    use serde_json::json;

    async fn seed_user(state: &AppState, pseudo: &str) -> User {
        let (user, _) = build_account(NewAccount {
            name: pseudo.to_uppercase(),
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

    async fn seed_meme(state: &AppState, owner: &User, name: &str) -> Uuid {
        let doc = create(state, owner, form(json!({"name": name, "images": ["a.jpeg", "b.jpeg"]})))
            .await
            .unwrap();
        doc["id"].as_str().unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn create_derives_slug_cover_and_owner() {
        let state = AppState::fake();
        let owner = seed_user(&state, "ann").await;
        let doc = create(
            &state,
            &owner,
            form(json!({"name": " Doge Wow ", "images": "x.jpeg", "user": Uuid::nil().to_string(), "views": 99})),
        )
        .await
        .unwrap();
        assert_eq!(doc["slug"], "doge-wow");
        assert_eq!(doc["imageCover"], "x.jpeg");
        assert_eq!(doc["user"], owner.id.to_string());
        assert_eq!(doc["views"], 0);
        assert_eq!(doc["category"], "Meme");
    }

    #[tokio::test]
    async fn create_rejects_bad_category() {
        let state = AppState::fake();
        let owner = seed_user(&state, "bob").await;
        let err = create(&state, &owner, form(json!({"name": "x", "images": ["a"], "category": "Cats"})))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn like_twice_toggles() {
        let state = AppState::fake();
        let owner = seed_user(&state, "cy").await;
        let fan = seed_user(&state, "di").await;
        let id = seed_meme(&state, &owner, "Doge").await;

        let doc = toggle_like(&state, id, &fan).await.unwrap();
        assert_eq!(doc["likesCount"], 1);
        let fan_now = state.store.users.find_by_id(fan.id).await.unwrap().unwrap();
        assert_eq!(fan_now.liked_memes, vec![id]);

        let doc = toggle_like(&state, id, &fan).await.unwrap();
        assert_eq!(doc["likesCount"], 0);
        assert_eq!(doc["likes"], json!([]));
        let fan_now = state.store.users.find_by_id(fan.id).await.unwrap().unwrap();
        assert!(fan_now.liked_memes.is_empty());
    }

    #[tokio::test]
    async fn like_on_missing_meme_is_404() {
        let state = AppState::fake();
        let fan = seed_user(&state, "ed").await;
        let err = toggle_like(&state, Uuid::new_v4(), &fan).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_one_counts_views_and_populates() {
        let state = AppState::fake();
        let owner = seed_user(&state, "fay").await;
        let id = seed_meme(&state, &owner, "Nyan").await;
        toggle_like(&state, id, &owner).await.unwrap();

        let doc = get_one(&state, id, Some(&owner)).await.unwrap();
        assert_eq!(doc["views"], 1);
        assert_eq!(doc["mark"], 100);
        assert_eq!(doc["likedByMe"], true);
        assert_eq!(doc["user"]["pseudo"], "fay");
        assert!(doc["user"].get("email").is_none());
        assert_eq!(doc["likes"][0]["name"], "FAY");

        let anon = get_one(&state, id, None).await.unwrap();
        assert_eq!(anon["views"], 2);
        assert_eq!(anon["likedByMe"], false);
    }

    #[tokio::test]
    async fn update_rederives_slug_and_cover() {
        let state = AppState::fake();
        let owner = seed_user(&state, "gus").await;
        let id = seed_meme(&state, &owner, "Old Name").await;
        let doc = update(
            &state,
            id,
            form(json!({"name": "New Name", "images": ["b.jpeg"], "likesCount": 7})),
        )
        .await
        .unwrap();
        assert_eq!(doc["slug"], "new-name");
        assert_eq!(doc["imageCover"], "b.jpeg");
        assert_eq!(doc["likesCount"], 0);
    }

    #[tokio::test]
    async fn delete_cascades_to_comments_and_likes() {
        let state = AppState::fake();
        let owner = seed_user(&state, "hal").await;
        let id = seed_meme(&state, &owner, "Grumpy").await;
        toggle_like(&state, id, &owner).await.unwrap();
        state
            .store
            .comments
            .create(&Comment {
                id: Uuid::new_v4(),
                content: "lol".into(),
                user: owner.id,
                meme: id,
                created_at: OffsetDateTime::now_utc(),
                changed_at: None,
            })
            .await
            .unwrap();

        delete(&state, id).await.unwrap();
        assert_eq!(state.store.comments.count(Filter::new()).await.unwrap(), 0);
        let owner_now = state.store.users.find_by_id(owner.id).await.unwrap().unwrap();
        assert!(owner_now.liked_memes.is_empty());
        assert_eq!(delete(&state, id).await.unwrap_err().status(), StatusCode::NOT_FOUND);
    }

    fn with_storage() -> (AppState, std::sync::Arc<crate::storage::FakeStorage>) {
        use crate::{mail::MemoryMailer, storage::FakeStorage};
        use std::sync::Arc;

        let storage = Arc::new(FakeStorage::default());
        let state = AppState::fake_with(Arc::new(MemoryMailer::default()), storage.clone());
        (state, storage)
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn replaced_images_of_the_owner_are_removed() {
        let (state, storage) = with_storage();
        let owner = seed_user(&state, "ida").await;
        let own_a = format!("meme-{}-1-0.jpeg", owner.id);
        let own_b = format!("meme-{}-1-1.jpeg", owner.id);
        let foreign = format!("meme-{}-1-0.jpeg", Uuid::new_v4());
        let doc = create(&state, &owner, form(json!({"name": "Pepe", "images": [&own_a, &own_b, &foreign]})))
            .await
            .unwrap();
        let id: Uuid = doc["id"].as_str().unwrap().parse().unwrap();

        update(&state, id, form(json!({"images": [&own_b]})))
            .await
            .unwrap();
        settle().await;
        assert_eq!(storage.deleted(), vec![format!("memes/{own_a}")]);
    }

    #[tokio::test]
    async fn delete_removes_only_owned_files() {
        let (state, storage) = with_storage();
        let owner = seed_user(&state, "jo").await;
        let own = format!("meme-{}-1-0.jpeg", owner.id);
        let foreign = format!("meme-{}-1-0.jpeg", Uuid::new_v4());
        let doc = create(&state, &owner, form(json!({"name": "Keyboard Cat", "images": [&foreign, &own]})))
            .await
            .unwrap();
        let id: Uuid = doc["id"].as_str().unwrap().parse().unwrap();

        delete(&state, id).await.unwrap();
        settle().await;
        assert_eq!(storage.deleted(), vec![format!("memes/{own}")]);
    }

    #[tokio::test]
    async fn rejected_writes_leave_storage_alone() {
        use crate::images::UploadedFile;
        use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
        use std::io::Cursor;

        let (state, storage) = with_storage();
        let owner = seed_user(&state, "kim").await;

        let mut png = Vec::new();
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(8, 8, Rgb([9u8, 9, 9])))
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        let mut input = form(json!({"name": "Bad", "category": "Cats"}));
        input.files.push(UploadedFile {
            field: "images".into(),
            content_type: "image/png".into(),
            bytes: png.into(),
        });
        let err = create(&state, &owner, input).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let own = format!("meme-{}-1-0.jpeg", owner.id);
        let doc = create(&state, &owner, form(json!({"name": "Good", "images": [&own]})))
            .await
            .unwrap();
        let id: Uuid = doc["id"].as_str().unwrap().parse().unwrap();
        let err = update(&state, id, form(json!({"images": ["z.jpeg"], "category": "Cats"})))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        settle().await;
        assert!(storage.stored().is_empty());
        assert!(storage.deleted().is_empty());
    }
}
