use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::{config::Environment, state::AppState, store::StoreError};

#[derive(Debug, Error)]
pub enum AppError {
    /// Expected failures whose message is safe to show to the client.
    #[error("{message}")]
    Operational { status: StatusCode, message: String },

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Operational { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "You do not have permission to perform this action")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn document_not_found() -> Self {
        Self::not_found("Document not found")
    }

    pub fn mail_failed() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "There was an error sending the email. Try again later!",
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Operational { status, .. } => *status,
            Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Cast { path, value } => {
                Self::bad_request(format!("Invalid {path}: {value}."))
            }
            StoreError::Duplicate { value, .. } => Self::bad_request(format!(
                "Duplicate field value ({value}). Please use another value."
            )),
            StoreError::Validation(messages) => {
                Self::bad_request(format!("Invalid input data. {}", messages.join(". ")))
            }
            StoreError::Backend(e) => Self::Unexpected(e),
        }
    }
}

/// Attached to error responses so the development renderer can show internals.
#[derive(Debug, Clone)]
pub struct ErrorDetail {
    pub message: String,
    pub debug: String,
    pub stack: Vec<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Operational { message, .. } => message.clone(),
            Self::Unexpected(e) => {
                error!(error = ?e, "unexpected error");
                "Something went wrong!".to_string()
            }
        };
        let detail = ErrorDetail {
            message: self.to_string(),
            debug: format!("{self:?}"),
            stack: match &self {
                Self::Unexpected(e) => e.chain().map(|c| c.to_string()).collect(),
                Self::Operational { .. } => vec![self.to_string()],
            },
        };
        let mut res = (
            status,
            Json(json!({ "status": status_label(status), "message": message })),
        )
            .into_response();
        res.extensions_mut().insert(detail);
        res
    }
}

fn status_label(status: StatusCode) -> &'static str {
    if status.is_client_error() {
        "fail"
    } else {
        "error"
    }
}

/// Single error formatter: in development every `AppError` response is
/// re-rendered with its debug form and cause chain.
pub async fn render_errors(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let res = next.run(req).await;
    if state.config.env != Environment::Development {
        return res;
    }
    let Some(detail) = res.extensions().get::<ErrorDetail>().cloned() else {
        return res;
    };
    let status = res.status();
    (
        status,
        Json(json!({
            "status": status_label(status),
            "message": detail.message,
            "error": detail.debug,
            "stack": detail.stack,
        })),
    )
        .into_response()
}

pub async fn route_not_found(uri: axum::http::Uri) -> AppError {
    AppError::not_found(format!("Can't find {uri} on this server"))
}

/// `Json` whose rejections render through `AppError`.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e: JsonRejection| AppError::bad_request(e.body_text()))?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn body(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn client_errors_are_fail() {
        let res = AppError::forbidden().into_response();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        let json = body(res).await;
        assert_eq!(json["status"], "fail");
        assert_eq!(json["message"], "You do not have permission to perform this action");
    }

    #[tokio::test]
    async fn unexpected_errors_hide_details() {
        let res = AppError::from(anyhow::anyhow!("db exploded")).into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.extensions().get::<ErrorDetail>().is_some());
        let json = body(res).await;
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "Something went wrong!");
    }

    #[test]
    fn store_errors_map_to_client_messages() {
        let err = AppError::from(StoreError::Cast { path: "id".into(), value: "abc".into() });
        assert_eq!(err.to_string(), "Invalid id: abc.");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = AppError::from(StoreError::Duplicate {
            field: "email".into(),
            value: "a@b.c".into(),
        });
        assert_eq!(
            err.to_string(),
            "Duplicate field value (a@b.c). Please use another value."
        );

        let err = AppError::from(StoreError::Validation(vec![
            "Name is required".into(),
            "Pseudo is required".into(),
        ]));
        assert_eq!(
            err.to_string(),
            "Invalid input data. Name is required. Pseudo is required"
        );
    }
}
