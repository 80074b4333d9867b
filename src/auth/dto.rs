use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{error::AppError, query::filter_fields, store::Document};

pub const SIGNUP_FIELDS: &[&str] = &["name", "pseudo", "email", "password", "passwordConfirm"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
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
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirm: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    #[serde(default)]
    pub password_current: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirm: String,
}

#[derive(Debug, Serialize)]
pub struct UserEnvelope {
    pub user: Document,
}

/// `{status, token, data: {user}}`
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub status: &'static str,
    pub token: String,
    pub data: UserEnvelope,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub status: &'static str,
    pub message: &'static str,
}

/// Allowlists a JSON body and reads it into a typed request.
pub fn allowed<T: DeserializeOwned>(body: &Map<String, Value>, fields: &[&str]) -> Result<T, AppError> {
    serde_json::from_value(Value::Object(filter_fields(body, fields)))
        .map_err(|e| AppError::bad_request(format!("Invalid input data. {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signup_ignores_fields_outside_allowlist() {
        let body = json!({
            "name": "Ada", "pseudo": "ada", "email": "a@b.c",
            "password": "12345678", "passwordConfirm": "12345678",
            "role": "admin", "activated": true
        });
        let req: SignupRequest = allowed(body.as_object().unwrap(), SIGNUP_FIELDS).unwrap();
        assert_eq!(req.name, "Ada");
        assert_eq!(req.password_confirm, "12345678");
    }

    #[test]
    fn wrong_types_are_bad_requests() {
        let body = json!({"name": 5});
        let err = allowed::<SignupRequest>(body.as_object().unwrap(), SIGNUP_FIELDS).unwrap_err();
        assert!(err.to_string().starts_with("Invalid input data."));
    }
}
