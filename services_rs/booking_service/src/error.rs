use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Failures of the booking lifecycle, independent of the HTTP surface.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("not enough available seats (requested {requested}, available {available})")]
    CapacityExceeded { requested: i32, available: i32 },
    #[error("access denied")]
    Forbidden,
    #[error("{0}")]
    InvalidState(String),
    #[error("booking already paid")]
    AlreadyPaid,
    #[error("{field}: {message}")]
    Validation { field: String, message: String },
    #[error("storage error: {0}")]
    Storage(String),
}

impl LifecycleError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Storage(format!("{context}: {err}"))
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
    pub field: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
            field: None,
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn invalid_field(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            ..Self::bad_request(detail)
        }
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }

    pub fn db(context: &str, err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::internal("database error")
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound(_) => ApiError::not_found(err.to_string()),
            LifecycleError::CapacityExceeded { .. } => ApiError::bad_request(err.to_string()),
            LifecycleError::Forbidden => ApiError::forbidden(err.to_string()),
            LifecycleError::InvalidState(detail) => ApiError::bad_request(detail),
            LifecycleError::AlreadyPaid => ApiError::bad_request(err.to_string()),
            LifecycleError::Validation { field, message } => {
                ApiError::invalid_field(field, message)
            }
            // Already logged with its cause where it was raised.
            LifecycleError::Storage(_) => ApiError::internal("database error"),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'a str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = axum::Json(ErrorBody {
            detail: self.detail.as_str(),
            field: self.field.as_deref(),
        });
        (self.status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// JSON body extractor whose failures render like every other validation error.
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    axum::Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(e) => {
                let (field, detail) = describe_data_error(&e.body_text());
                ApiError {
                    field,
                    ..ApiError::bad_request(detail)
                }
            }
            JsonRejection::JsonSyntaxError(_) => ApiError::bad_request("malformed JSON body"),
            JsonRejection::MissingJsonContentType(_) => ApiError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "expected an application/json body",
            ),
            other => ApiError::new(other.status(), other.body_text()),
        }
    }
}

/// Splits a serde body error such as
/// `...target type: passengers[0]: missing field `full_name` at line 1 column 40`
/// into the offending top-level field and a message without position noise.
fn describe_data_error(text: &str) -> (Option<String>, String) {
    let text = text
        .split_once("target type: ")
        .map(|(_, rest)| rest)
        .unwrap_or(text);
    let text = match text.rfind(" at line ") {
        Some(idx) => &text[..idx],
        None => text,
    };

    let path_field = text.split_once(": ").and_then(|(path, _)| {
        let is_path = !path.is_empty()
            && path
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'));
        is_path.then(|| {
            path.split(['.', '['])
                .next()
                .unwrap_or(path)
                .to_string()
        })
    });
    let field = path_field.or_else(|| {
        text.split_once("missing field `")
            .and_then(|(_, rest)| rest.split_once('`'))
            .map(|(name, _)| name.to_string())
    });
    (field, format!("invalid request body: {text}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_errors_map_to_client_statuses() {
        let cases = [
            (LifecycleError::NotFound("booking"), StatusCode::NOT_FOUND),
            (
                LifecycleError::CapacityExceeded {
                    requested: 2,
                    available: 1,
                },
                StatusCode::BAD_REQUEST,
            ),
            (LifecycleError::Forbidden, StatusCode::FORBIDDEN),
            (
                LifecycleError::InvalidState("cannot cancel".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (LifecycleError::AlreadyPaid, StatusCode::BAD_REQUEST),
            (
                LifecycleError::Storage("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn storage_detail_is_not_leaked() {
        let api = ApiError::from(LifecycleError::Storage("password=hunter2".to_string()));
        assert_eq!(api.detail, "database error");
    }

    #[test]
    fn body_errors_name_the_top_level_field() {
        let (field, detail) = describe_data_error(
            "Failed to deserialize the JSON body into the target type: passengers[0]: \
             missing field `full_name` at line 1 column 58",
        );
        assert_eq!(field.as_deref(), Some("passengers"));
        assert_eq!(
            detail,
            "invalid request body: passengers[0]: missing field `full_name`"
        );

        let (field, _) = describe_data_error(
            "Failed to deserialize the JSON body into the target type: payment_method: \
             unknown variant `bitcoin`, expected one of `cash`, `credit_card` at line 1 column 61",
        );
        assert_eq!(field.as_deref(), Some("payment_method"));

        let (field, _) = describe_data_error(
            "Failed to deserialize the JSON body into the target type: \
             missing field `schedule_id` at line 1 column 2",
        );
        assert_eq!(field.as_deref(), Some("schedule_id"));
    }

    #[test]
    fn validation_keeps_field() {
        let api = ApiError::from(LifecycleError::validation("passengers", "required"));
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.field.as_deref(), Some("passengers"));
        assert_eq!(api.detail, "required");
    }
}
