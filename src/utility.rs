use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ApiError;

macro_rules! internal_error {
    ($err:expr) => {{
        tracing::error!("{:?}", $err);
        $crate::error::ApiError::Internal
    }};
}

// https://github.com/serde-rs/serde/issues/984#issuecomment-314143738
pub fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl PaginationMeta {
    /// `limit` is clamped to at least one so an empty or bogus limit never divides by zero.
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let divisor = limit.max(1);
        let total = total.max(0);
        Self {
            page,
            limit: divisor,
            total,
            total_pages: (total + divisor - 1) / divisor,
        }
    }
}

/// The JSON body every admin endpoint answers with.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<std::collections::BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationMeta>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            pagination: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Envelope<()> {
    pub fn notice(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
            errors: None,
            pagination: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            errors: None,
            pagination: None,
        }
    }
}

pub mod action {
    use axum::{
        http::{header, StatusCode},
        response::IntoResponse,
        Json,
    };
    use serde::Serialize;

    use super::{Envelope, PaginationMeta};
    use crate::model::{Deleted, Page};

    pub struct List<T>(pub Page<T>, pub PaginationMeta);
    impl<T> IntoResponse for List<T>
    where
        T: Serialize,
    {
        fn into_response(self) -> axum::response::Response {
            let Self(page, meta) = self;
            let mut envelope = Envelope::ok(page.data);
            envelope.pagination = Some(meta);
            Json(envelope).into_response()
        }
    }

    /// The created record plus the request path it was created under.
    pub struct Create<T>(pub T, pub String, pub i64);
    impl<T> IntoResponse for Create<T>
    where
        T: Serialize,
    {
        fn into_response(self) -> axum::response::Response {
            let Self(value, route_path, id) = self;
            (
                StatusCode::CREATED,
                [(
                    header::LOCATION,
                    format!("{}/{}", route_path.trim_end_matches('/'), id),
                )],
                Json(Envelope::ok(value).with_message("Created successfully")),
            )
                .into_response()
        }
    }

    pub struct Show<T>(pub T);
    impl<T> IntoResponse for Show<T>
    where
        T: Serialize,
    {
        fn into_response(self) -> axum::response::Response {
            let Self(value) = self;
            Json(Envelope::ok(value)).into_response()
        }
    }

    pub struct Update<T>(pub T);
    impl<T> IntoResponse for Update<T>
    where
        T: Serialize,
    {
        fn into_response(self) -> axum::response::Response {
            let Self(value) = self;
            Json(Envelope::ok(value).with_message("Updated successfully")).into_response()
        }
    }

    pub struct Delete(pub Deleted);
    impl IntoResponse for Delete {
        fn into_response(self) -> axum::response::Response {
            let Self(deleted) = self;
            Json(Envelope::ok(deleted).with_message("Deleted successfully")).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(10, 0, 0)]
    #[case(10, 1, 1)]
    #[case(10, 10, 1)]
    #[case(10, 11, 2)]
    #[case(3, 10, 4)]
    #[case(0, 5, 5)]
    #[case(-4, 5, 5)]
    fn total_pages_is_ceiling_of_total_over_limit(
        #[case] limit: i64,
        #[case] total: i64,
        #[case] expected: i64,
    ) {
        assert_eq!(PaginationMeta::new(1, limit, total).total_pages, expected);
    }

    #[test]
    fn envelope_omits_absent_fields() {
        let body = serde_json::to_value(Envelope::ok(1)).unwrap();
        assert_eq!(body, serde_json::json!({ "success": true, "data": 1 }));

        let body = serde_json::to_value(Envelope::failure("nope")).unwrap();
        assert_eq!(body, serde_json::json!({ "success": false, "message": "nope" }));
    }

    #[test]
    fn pagination_serializes_camel_case() {
        let body = serde_json::to_value(PaginationMeta::new(2, 5, 12)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "page": 2, "limit": 5, "total": 12, "totalPages": 3 })
        );
    }
}
