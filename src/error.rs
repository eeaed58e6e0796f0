use std::collections::BTreeMap;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::{model::ModelError, utility::Envelope};

/// Field name to human-readable message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    /// Keeps the first message recorded for a field.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_insert_with(|| message.into());
    }

    pub fn require(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.add(field, format!("{} is required", field));
        }
    }

    pub fn merge(&mut self, other: FieldErrors) {
        for (field, message) in other.0 {
            self.add(field, message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

pub const ALLOWED_METHODS: &str = "GET, POST, PUT, PATCH, DELETE";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed")]
    ValidationFailed(FieldErrors),
    #[error("authentication required")]
    Unauthorized,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("forbidden")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("{0}")]
    Conflict(String),
    #[error("too many requests")]
    TooManyRequests,
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationFailed(FieldErrors::single(field, message))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::ValidationFailed(_) => "Validation failed".to_string(),
            Self::Unauthorized => "Authentication required".to_string(),
            Self::InvalidCredentials => "Invalid email or password".to_string(),
            Self::Forbidden => "Insufficient permissions".to_string(),
            Self::NotFound(message) | Self::Conflict(message) => message.clone(),
            Self::MethodNotAllowed => "Method not allowed".to_string(),
            Self::TooManyRequests => "Too many attempts, try again later".to_string(),
            Self::Internal => "Internal server error".to_string(),
        }
    }
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::NotFound => Self::NotFound("Record not found".to_string()),
            ModelError::Conflict(message) => Self::Conflict(message),
            ModelError::Validation(errors) => Self::ValidationFailed(errors),
            other => internal_error!(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut envelope = Envelope::failure(self.message());
        if let Self::ValidationFailed(errors) = self {
            envelope.errors = Some(errors.into_inner());
        }

        let mut response = (status, Json(envelope)).into_response();
        if status == StatusCode::METHOD_NOT_ALLOWED {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_errors_keep_first_message() {
        let mut errors = FieldErrors::new();
        errors.add("email", "email is required");
        errors.add("email", "email is invalid");
        assert_eq!(errors.get("email"), Some("email is required"));
    }

    #[test]
    fn require_flags_blank_values() {
        let mut errors = FieldErrors::new();
        errors.require("title", "   ");
        errors.require("content", "body");
        assert_eq!(errors.get("title"), Some("title is required"));
        assert!(errors.get("content").is_none());
    }

    #[test]
    fn model_errors_map_onto_status_codes() {
        assert_eq!(ApiError::from(ModelError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(ModelError::Conflict("taken".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(ModelError::Validation(FieldErrors::single("a", "b"))).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ModelError::Hashing("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn method_not_allowed_sets_allow_header() {
        let response = ApiError::MethodNotAllowed.into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], ALLOWED_METHODS);
    }
}
