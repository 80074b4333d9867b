use axum::{
    async_trait,
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
};
use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{AppError, JsonBody};

pub const NOT_AN_IMAGE: &str = "Not an image! Please upload only images";

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// A write body that is either JSON or multipart form data. Text parts become
/// fields (repeated names become arrays), file parts must be images.
#[derive(Debug, Default)]
pub struct FormInput {
    pub fields: Map<String, Value>,
    pub files: Vec<UploadedFile>,
}

impl FormInput {
    pub fn files_named(&self, field: &str) -> impl Iterator<Item = &UploadedFile> {
        let field = field.to_string();
        self.files.iter().filter(move |f| f.field == field)
    }

    /// Rejects more than `max` files under `field` and files under any other name.
    pub fn expect_files(&self, field: &str, max: usize) -> Result<(), AppError> {
        if let Some(other) = self.files.iter().find(|f| f.field != field) {
            return Err(AppError::bad_request(format!("Unexpected field {}", other.field)));
        }
        if self.files.len() > max {
            return Err(AppError::bad_request(format!(
                "Too many files! Please upload at most {max}"
            )));
        }
        Ok(())
    }
}

fn field_name(raw: &str) -> String {
    raw.strip_suffix("[]").unwrap_or(raw).to_string()
}

fn push_field(fields: &mut Map<String, Value>, name: String, value: Value) {
    match fields.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = std::mem::take(existing);
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(name, value);
        }
    }
}

async fn read_multipart(mut mp: Multipart) -> Result<FormInput, AppError> {
    let mut input = FormInput::default();
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(e.body_text()))?
    {
        let name = field_name(field.name().unwrap_or_default());
        let is_file = field.file_name().is_some();
        if is_file {
            let content_type = field.content_type().unwrap_or_default().to_string();
            if !content_type.starts_with("image") {
                warn!(field = %name, %content_type, "rejected non-image upload");
                return Err(AppError::bad_request(NOT_AN_IMAGE));
            }
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::bad_request(e.body_text()))?;
            input.files.push(UploadedFile { field: name, content_type, bytes });
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| AppError::bad_request(e.body_text()))?;
            push_field(&mut input.fields, name, Value::String(text));
        }
    }
    Ok(input)
}

#[async_trait]
impl<S> FromRequest<S> for FormInput
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("multipart/form-data"))
            .unwrap_or(false);
        if is_multipart {
            let mp = Multipart::from_request(req, state)
                .await
                .map_err(|e| AppError::bad_request(e.body_text()))?;
            return read_multipart(mp).await;
        }
        let JsonBody(fields) = JsonBody::<Map<String, Value>>::from_request(req, state).await?;
        Ok(Self { fields, files: Vec::new() })
    }
}
