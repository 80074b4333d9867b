use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::error;

/// Success envelope: `{status: "success", results?, data}`.
#[derive(Debug)]
pub struct ApiResponse<T: Serialize> {
    data: T,
    results: Option<usize>,
    status: StatusCode,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { data, results: None, status: StatusCode::OK }
    }

    pub fn created(data: T) -> Self {
        Self { status: StatusCode::CREATED, ..Self::ok(data) }
    }

    pub fn with_results(mut self, results: usize) -> Self {
        self.results = Some(results);
        self
    }
}

impl<T: Serialize> ApiResponse<Vec<T>> {
    pub fn list(data: Vec<T>) -> Self {
        let n = data.len();
        Self::ok(data).with_results(n)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let data = match serde_json::to_value(&self.data) {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "failed to serialize response data");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"status": "error", "message": "Something went wrong!"})),
                )
                    .into_response();
            }
        };
        let body = match self.results {
            Some(results) => json!({"status": "success", "results": results, "data": data}),
            None => json!({"status": "success", "data": data}),
        };
        (self.status, Json(body)).into_response()
    }
}

pub fn no_content() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    #[tokio::test]
    async fn list_adds_results() {
        let res = ApiResponse::list(vec![1, 2, 3]).into_response();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json, json!({"status": "success", "results": 3, "data": [1, 2, 3]}));
    }
}
