use serde::Deserialize;
use serde_json::{Map, Value};

use super::repo_types::Role;
use crate::auth::services::NewAccount;

/// Fields an account may change on itself.
pub const ME_FIELDS: &[&str] = &["pseudo", "name", "email", "avatar"];

pub const ADMIN_CREATE_FIELDS: &[&str] = &[
    "name",
    "pseudo",
    "email",
    "password",
    "passwordConfirm",
    "role",
    "avatar",
];

pub const ADMIN_UPDATE_FIELDS: &[&str] = &["name", "role", "pseudo", "avatar", "email"];

/// Body keys that belong to `/me/updatePassword`.
pub const PASSWORD_FIELDS: &[&str] = &["password", "passwordConfirm"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pseudo: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirm: String,
    pub role: Option<Role>,
    pub avatar: Option<String>,
}

impl From<CreateUserRequest> for NewAccount {
    fn from(req: CreateUserRequest) -> Self {
        Self {
            name: req.name,
            pseudo: req.pseudo,
            email: req.email,
            password: req.password,
            password_confirm: req.password_confirm,
            role: req.role.unwrap_or_default(),
            avatar: req.avatar,
            activated: true,
        }
    }
}

/// Trims names and lower-cases the email the same way signup does.
pub fn normalize(mut fields: Map<String, Value>) -> Map<String, Value> {
    for key in ["name", "pseudo", "email"] {
        if let Some(Value::String(s)) = fields.get_mut(key) {
            let trimmed = s.trim();
            *s = if key == "email" {
                trimmed.to_lowercase()
            } else {
                trimmed.to_string()
            };
        }
    }
    fields
}
