use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::store::{
    model::validate_document, timestamp, Document, Entity, Field, FieldKind, Filter, Schema,
    StoreError,
};

pub const DEFAULT_AVATAR: &str = "default.jpg";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub const ALL: [&'static str; 2] = ["user", "admin"];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub pseudo: String,
    pub email: String,
    #[serde(default = "default_avatar")]
    pub avatar: String,
    #[serde(default)]
    pub role: Role,
    /// argon2 PHC string.
    pub password: String,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub password_changed_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_activation_token: Option<String>,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub account_activation_expires: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_reset_token: Option<String>,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub password_reset_expires: Option<OffsetDateTime>,
    #[serde(default = "active_default")]
    pub active: bool,
    #[serde(default)]
    pub activated: bool,
    #[serde(default)]
    pub liked_memes: Vec<Uuid>,
}

fn default_avatar() -> String {
    DEFAULT_AVATAR.to_string()
}

fn active_default() -> bool {
    true
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn is_valid_pseudo(pseudo: &str) -> bool {
    !pseudo.contains(['/', '?', '=', '-'])
}

impl User {
    /// True when the password changed after a token issued at `iat` (unix seconds).
    pub fn changed_password_after(&self, iat: i64) -> bool {
        self.password_changed_at
            .map(|changed| iat < changed.unix_timestamp())
            .unwrap_or(false)
    }
}

static FIELDS: &[Field] = &[
    Field::new("id", FieldKind::Uuid),
    Field::new("name", FieldKind::String),
    Field::new("pseudo", FieldKind::String).unique(),
    Field::new("email", FieldKind::String).unique(),
    Field::new("avatar", FieldKind::String),
    Field::new("role", FieldKind::String),
    Field::new("password", FieldKind::String).hidden(),
    Field::new("passwordChangedAt", FieldKind::Timestamp).hidden(),
    Field::new("accountActivationToken", FieldKind::String).hidden(),
    Field::new("accountActivationExpires", FieldKind::Timestamp).hidden(),
    Field::new("passwordResetToken", FieldKind::String).hidden(),
    Field::new("passwordResetExpires", FieldKind::Timestamp).hidden(),
    Field::new("active", FieldKind::Bool).hidden(),
    Field::new("activated", FieldKind::Bool).hidden(),
    Field::new("likedMemes", FieldKind::Array(&FieldKind::Uuid)),
];

fn validate(doc: &Document) -> Result<(), StoreError> {
    if let Some(role) = doc.get("role").and_then(Value::as_str) {
        if !Role::ALL.contains(&role) {
            return Err(StoreError::Validation(vec![format!(
                "Role has to be either: {}",
                Role::ALL.join(", ")
            )]));
        }
    }
    validate_document::<User>(doc)
}

pub static USERS: Schema = Schema {
    collection: "users",
    fields: FIELDS,
    validate,
};

impl Entity for User {
    const SCHEMA: &'static Schema = &USERS;

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        match self.name.chars().count() {
            0 => errors.push("Please, specify your name.".to_string()),
            n if n > 20 => errors.push("A username has to be at most 20 character long.".into()),
            _ => {}
        }
        match self.pseudo.chars().count() {
            0 => errors.push("Please, specify your pseudonim.".to_string()),
            n if n > 20 => errors.push("Pseudonim has to be at most 20 character long.".into()),
            _ => {}
        }
        if !is_valid_pseudo(&self.pseudo) {
            errors.push("Pseudo cannot contain symbols [/, ?, =, -]".into());
        }
        if self.email.is_empty() {
            errors.push("Please, specify your email address.".into());
        } else if !is_valid_email(&self.email) {
            errors.push("Please, specify a valid email address.".into());
        }
        if self.password.is_empty() {
            errors.push("Please, specify your password.".into());
        }
        if self.account_activation_token.is_some() != self.account_activation_expires.is_some()
            || self.password_reset_token.is_some() != self.password_reset_expires.is_some()
        {
            errors.push("A one-time token needs an expiry".into());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Soft-deleted accounts are invisible to every account query.
pub fn active_scope() -> Filter {
    Filter::new().ne("active", false)
}
