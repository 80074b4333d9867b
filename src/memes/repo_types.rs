use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::store::{
    model::validate_document, timestamp, Document, Entity, Field, FieldKind, Schema, StoreError,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    #[default]
    Meme,
    People,
    Event,
    Site,
    Subculture,
}

impl Category {
    pub const ALL: [&'static str; 5] = ["Meme", "People", "Event", "Site", "Subculture"];

    fn invalid() -> StoreError {
        StoreError::Validation(vec![format!(
            "Please, choose category among this enum: {}.",
            Self::ALL.join(", ")
        )])
    }
}

impl FromStr for Category {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Meme" => Ok(Self::Meme),
            "People" => Ok(Self::People),
            "Event" => Ok(Self::Event),
            "Site" => Ok(Self::Site),
            "Subculture" => Ok(Self::Subculture),
            _ => Err(Self::invalid()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meme {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub slug: String,
    pub image_cover: String,
    pub images: Vec<String>,
    #[serde(with = "timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub likes: Vec<Uuid>,
    #[serde(default)]
    pub comments_count: i64,
    pub user: Uuid,
}

impl Meme {
    /// Likes per hundred views, rounded.
    pub fn mark(&self) -> i64 {
        if self.views == 0 {
            return 0;
        }
        (self.likes_count as f64 / self.views as f64 * 100.0).round() as i64
    }
}

static FIELDS: &[Field] = &[
    Field::new("id", FieldKind::Uuid),
    Field::new("name", FieldKind::String),
    Field::new("description", FieldKind::String),
    Field::new("category", FieldKind::String),
    Field::new("tags", FieldKind::Array(&FieldKind::String)),
    Field::new("origin", FieldKind::String),
    Field::new("slug", FieldKind::String).unique(),
    Field::new("imageCover", FieldKind::String),
    Field::new("images", FieldKind::Array(&FieldKind::String)),
    Field::new("createdAt", FieldKind::Timestamp),
    Field::new("views", FieldKind::Number),
    Field::new("likesCount", FieldKind::Number),
    Field::new("likes", FieldKind::Array(&FieldKind::Uuid)),
    Field::new("commentsCount", FieldKind::Number),
    Field::new("user", FieldKind::Uuid),
];

fn validate(doc: &Document) -> Result<(), StoreError> {
    if let Some(category) = doc.get("category").and_then(Value::as_str) {
        category.parse::<Category>()?;
    }
    validate_document::<Meme>(doc)
}

pub static MEMES: Schema = Schema {
    collection: "memes",
    fields: FIELDS,
    validate,
};

impl Entity for Meme {
    const SCHEMA: &'static Schema = &MEMES;

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        match self.name.chars().count() {
            0 => errors.push("Please, specify a meme name.".to_string()),
            n if n > 128 => errors.push("A meme name has to be at most 128 character long.".into()),
            _ => {}
        }
        if self.images.is_empty() {
            errors.push("Meme has to have at least one image".into());
        }
        if self.likes_count != self.likes.len() as i64 {
            errors.push("likesCount has to match the number of likes".into());
        }
        if self.views < 0 || self.comments_count < 0 {
            errors.push("Counters cannot be negative".into());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::to_document;
    use serde_json::json;

    fn meme() -> Meme {
        Meme {
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
            user: Uuid::new_v4(),
        }
    }

    #[test]
    fn mark_is_zero_without_views() {
        let mut m = meme();
        assert_eq!(m.mark(), 0);
        m.views = 3;
        m.likes = vec![Uuid::new_v4()];
        m.likes_count = 1;
        assert_eq!(m.mark(), 33);
    }

    #[test]
    fn needs_an_image_and_consistent_likes() {
        let mut m = meme();
        m.images.clear();
        m.likes_count = 2;
        assert_eq!(m.validate().unwrap_err().len(), 2);
    }

    #[test]
    fn category_outside_enum_is_rejected() {
        let mut doc = to_document(&meme()).unwrap();
        doc.insert("category".into(), json!("Cats"));
        let err = validate(&doc).unwrap_err();
        assert!(err.to_string().contains("Meme, People, Event, Site, Subculture"));
    }
}
