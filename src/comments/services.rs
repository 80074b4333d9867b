use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::repo_types::Comment;
use crate::{
    error::AppError,
    query::{filter_fields, QueryFeatures, QueryParams},
    state::AppState,
    store::{timestamp, Document, Filter, ReadQuery, Update},
    users::repo_types::User,
};

pub const CONTENT_FIELDS: &[&str] = &["content"];
pub const DEFAULT_SORT: &str = "-createdAt,id";

fn of_meme(meme_id: Uuid) -> Filter {
    Filter::new().eq("meme", meme_id.to_string())
}

fn content_of(body: &Map<String, Value>) -> Result<String, AppError> {
    match filter_fields(body, CONTENT_FIELDS).remove("content") {
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(other) => Err(AppError::bad_request(format!("Invalid content: {other}."))),
        None => Ok(String::new()),
    }
}

/// Stores the current number of comments on the meme.
pub async fn recount(state: &AppState, meme_id: Uuid) -> Result<u64, AppError> {
    let n = state.store.comments.count(of_meme(meme_id)).await?;
    state
        .store
        .memes
        .find_by_id_and_update(meme_id, Update::new().set("commentsCount", n))
        .await?;
    debug!(%meme_id, comments = n, "comments recounted");
    Ok(n)
}

#[instrument(skip(state, params))]
pub async fn list(state: &AppState, meme_id: Uuid, mut params: QueryParams) -> Result<Vec<Document>, AppError> {
    params.set_default("sort", DEFAULT_SORT);
    let query = QueryFeatures::for_entity::<Comment>(ReadQuery::new(of_meme(meme_id)), params)?
        .apply_all()
        .into_query();
    Ok(state.store.comments.find(query).await?)
}

#[instrument(skip_all, fields(meme_id = %meme_id, user_id = %user.id))]
pub async fn create(
    state: &AppState,
    meme_id: Uuid,
    user: &User,
    body: &Map<String, Value>,
) -> Result<Document, AppError> {
    if state.store.memes.find_by_id(meme_id).await?.is_none() {
        return Err(AppError::document_not_found());
    }
    let comment = Comment {
        id: Uuid::new_v4(),
        content: content_of(body)?,
        user: user.id,
        meme: meme_id,
        created_at: OffsetDateTime::now_utc(),
        changed_at: None,
    };
    let comment = state.store.comments.create(&comment).await?;
    recount(state, meme_id).await?;
    info!(comment_id = %comment.id, "comment posted");
    Ok(state.store.comments.public(&comment)?)
}

#[instrument(skip(state, body))]
pub async fn update(
    state: &AppState,
    meme_id: Uuid,
    id: Uuid,
    body: &Map<String, Value>,
) -> Result<Document, AppError> {
    let mut update = Update::new().set(
        "changedAt",
        timestamp::format(OffsetDateTime::now_utc()),
    );
    if body.contains_key("content") {
        update = update.set("content", content_of(body)?);
    }
    let comment = state
        .store
        .comments
        .find_one_and_update(Filter::by_id(id).and(of_meme(meme_id)), update)
        .await?
        .ok_or_else(AppError::document_not_found)?;
    recount(state, meme_id).await?;
    Ok(state.store.comments.public(&comment)?)
}

#[instrument(skip(state))]
pub async fn delete(state: &AppState, meme_id: Uuid, id: Uuid) -> Result<(), AppError> {
    state
        .store
        .comments
        .find_one_and_delete(Filter::by_id(id).and(of_meme(meme_id)))
        .await?
        .ok_or_else(AppError::document_not_found)?;
    recount(state, meme_id).await?;
    info!(comment_id = %id, "comment deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::services::{build_account, NewAccount},
        memes::repo_types::{Category, Meme},
        users::repo_types::Role,
    };
    use axum::http::StatusCode;
    use serde_json::json;

    async fn fixtures(state: &AppState) -> (User, Uuid) {
        let (user, _) = build_account(NewAccount {
            name: "Cora".into(),
            pseudo: "cora".into(),
            email: "cora@example.com".into(),
            password: "password123".into(),
            password_confirm: "password123".into(),
            role: Role::User,
            avatar: None,
            activated: true,
        })
        .unwrap();
        let user = state.store.users.create(&user).await.unwrap();
        let meme = Meme {
            id: Uuid::new_v4(),
            name: "Doge".into(),
            description: None,
            category: Category::Meme,
            tags: vec![],
            origin: None,
            slug: "doge".into(),
            image_cover: "a.jpeg".into(),
            images: vec!["a.jpeg".into()],
            created_at: OffsetDateTime::now_utc(),
            views: 0,
            likes_count: 0,
            likes: vec![],
            comments_count: 0,
            user: user.id,
        };
        let meme = state.store.memes.create(&meme).await.unwrap();
        (user, meme.id)
    }

    fn body(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    async fn comments_count(state: &AppState, meme_id: Uuid) -> i64 {
        state
            .store
            .memes
            .find_by_id(meme_id)
            .await
            .unwrap()
            .unwrap()
            .comments_count
    }

    #[tokio::test]
    async fn writes_keep_comments_count_in_step() {
        let state = AppState::fake();
        let (user, meme_id) = fixtures(&state).await;

        let first = create(&state, meme_id, &user, &body(json!({"content": "first"})))
            .await
            .unwrap();
        create(&state, meme_id, &user, &body(json!({"content": "second"})))
            .await
            .unwrap();
        assert_eq!(comments_count(&state, meme_id).await, 2);

        let id: Uuid = first["id"].as_str().unwrap().parse().unwrap();
        let edited = update(&state, meme_id, id, &body(json!({"content": "edited", "user": "x"})))
            .await
            .unwrap();
        assert_eq!(edited["content"], "edited");
        assert!(edited.get("changedAt").is_some());

        delete(&state, meme_id, id).await.unwrap();
        assert_eq!(comments_count(&state, meme_id).await, 1);
    }

    #[tokio::test]
    async fn empty_or_orphan_comments_are_rejected() {
        let state = AppState::fake();
        let (user, meme_id) = fixtures(&state).await;
        let err = create(&state, meme_id, &user, &body(json!({"content": "  "})))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = create(&state, Uuid::new_v4(), &user, &body(json!({"content": "hi"})))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_is_scoped_to_the_meme() {
        let state = AppState::fake();
        let (user, meme_id) = fixtures(&state).await;
        create(&state, meme_id, &user, &body(json!({"content": "a"})))
            .await
            .unwrap();
        let docs = list(&state, meme_id, QueryParams::default()).await.unwrap();
        assert_eq!(docs.len(), 1);
        let docs = list(&state, Uuid::new_v4(), QueryParams::default()).await.unwrap();
        assert!(docs.is_empty());
    }
}
