use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::store::{
    model::validate_document, timestamp, Entity, Field, FieldKind, Schema,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub content: String,
    pub user: Uuid,
    pub meme: Uuid,
    #[serde(with = "timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub changed_at: Option<OffsetDateTime>,
}

static FIELDS: &[Field] = &[
    Field::new("id", FieldKind::Uuid),
    Field::new("content", FieldKind::String),
    Field::new("user", FieldKind::Uuid),
    Field::new("meme", FieldKind::Uuid),
    Field::new("createdAt", FieldKind::Timestamp),
    Field::new("changedAt", FieldKind::Timestamp),
];

pub static COMMENTS: Schema = Schema {
    collection: "comments",
    fields: FIELDS,
    validate: validate_document::<Comment>,
};

impl Entity for Comment {
    const SCHEMA: &'static Schema = &COMMENTS;

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate(&self) -> Result<(), Vec<String>> {
        match self.content.chars().count() {
            0 => Err(vec!["A comment cannot be empty".into()]),
            n if n > 1000 => Err(vec!["A comment has to be at most 1000 character long".into()]),
            _ => Ok(()),
        }
    }
}
