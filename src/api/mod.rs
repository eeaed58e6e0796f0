use std::sync::Arc;

use axum::{Extension, Router};

use crate::{
    crud::Resource,
    entities::{Article, Category, Reservation, UserRecord},
    extract::Authenticator,
    hooks::{AuditTrail, BookingConflicts, ReservationNotices, Slugs},
    model::Stores,
    rate_limit::RateLimiter,
};

mod auth;
mod calendar;
mod resources;

/// Everything handlers share for the lifetime of the server.
pub struct AppState {
    pub stores: Stores,
    pub authenticator: Arc<Authenticator>,
    pub limiter: RateLimiter,
    pub production: bool,
}

impl AppState {
    pub fn new(stores: Stores, authenticator: Authenticator, production: bool) -> Self {
        crate::password::warm_decoy();
        Self {
            stores,
            authenticator: Arc::new(authenticator),
            limiter: RateLimiter::default(),
            production,
        }
    }
}

pub fn routes(state: AppState) -> Router {
    let stores = &state.stores;
    let users = Resource::<UserRecord>::new(stores.users.clone()).with(AuditTrail);
    let categories = Resource::<Category>::new(stores.categories.clone())
        .with(Slugs)
        .with(AuditTrail);
    let articles = Resource::<Article>::new(stores.articles.clone())
        .with(Slugs)
        .with(AuditTrail);
    let reservations = Resource::<Reservation>::new(stores.reservations.clone())
        .with(BookingConflicts::new(stores.reservations.clone()))
        .with(ReservationNotices)
        .with(AuditTrail);

    let authenticator = state.authenticator.clone();
    Router::new()
        .merge(resources::controllers(users))
        .merge(resources::controllers(categories))
        .merge(resources::controllers(articles))
        .merge(resources::controllers(reservations))
        .nest("/auth", auth::controllers())
        .nest("/calendar", calendar::controllers())
        .layer(Extension(authenticator))
        .layer(Extension(Arc::new(state)))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config,
        model::seed::{ADMIN_EMAIL, ADMIN_PASSWORD, EDITOR_EMAIL, EDITOR_PASSWORD},
        session::SessionKeys,
    };

    async fn app() -> Router {
        let stores = Stores::seeded_memory().await.unwrap();
        let authenticator = Authenticator::new(SessionKeys::new(b"scenario-secret"));
        Router::new().nest(
            config::API_ROUTE,
            routes(AppState::new(stores, authenticator, false)),
        )
    }

    fn request(method: &str, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn login(app: &Router, email: &str, password: &str) -> String {
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/admin/auth/login",
                None,
                Some(json!({ "email": email, "password": password })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn login_sets_session_cookie() {
        let app = app().await;
        let response = app
            .oneshot(request(
                "POST",
                "/api/admin/auth/login",
                None,
                Some(json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let set_cookie = response.headers()[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .to_string();
        assert!(set_cookie.starts_with("admin-token="));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Lax"));
        assert!(set_cookie.contains("Path=/"));
        assert!(set_cookie.contains("Max-Age=604800"));
        assert!(!set_cookie.contains("Secure"));

        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["user"]["email"], ADMIN_EMAIL);
        assert!(body["data"]["user"].get("digest").is_none());
        assert!(body["data"]["token"].is_string());
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let response = app()
            .await
            .oneshot(request(
                "POST",
                "/api/admin/auth/login",
                None,
                Some(json!({ "email": ADMIN_EMAIL, "password": "nope" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(response).await,
            json!({ "success": false, "message": "Invalid email or password" })
        );
    }

    #[tokio::test]
    async fn unknown_account_looks_like_wrong_password() {
        let response = app()
            .await
            .oneshot(request(
                "POST",
                "/api/admin/auth/login",
                None,
                Some(json!({ "email": "nobody@example.com", "password": ADMIN_PASSWORD })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(response).await,
            json!({ "success": false, "message": "Invalid email or password" })
        );
    }

    #[tokio::test]
    async fn login_requires_both_fields() {
        let response = app()
            .await
            .oneshot(request(
                "POST",
                "/api/admin/auth/login",
                None,
                Some(json!({ "email": ADMIN_EMAIL })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["errors"]["password"], "password is required");
    }

    #[tokio::test]
    async fn repeated_failures_are_throttled() {
        let app = app().await;
        let mut last = StatusCode::OK;
        for _ in 0..=config::LOGIN_ATTEMPT_LIMIT {
            last = app
                .clone()
                .oneshot(request(
                    "POST",
                    "/api/admin/auth/login",
                    None,
                    Some(json!({ "email": EDITOR_EMAIL, "password": "wrong" })),
                ))
                .await
                .unwrap()
                .status();
        }
        assert_eq!(last, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn anonymous_requests_are_unauthorized() {
        let response = app()
            .await
            .oneshot(request("GET", "/api/admin/users", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(response).await,
            json!({ "success": false, "message": "Authentication required" })
        );
    }

    #[tokio::test]
    async fn session_reports_current_user() {
        let app = app().await;
        let cookie = login(&app, EDITOR_EMAIL, EDITOR_PASSWORD).await;
        let response = app
            .oneshot(request("GET", "/api/admin/auth/session", Some(&cookie), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["data"]["email"], EDITOR_EMAIL);
    }

    #[tokio::test]
    async fn logout_clears_cookie() {
        let response = app()
            .await
            .oneshot(request(
                "POST",
                "/api/admin/auth/logout",
                Some("admin-token=stale"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.starts_with("admin-token="));
        assert!(set_cookie.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn editor_cannot_delete_users() {
        let app = app().await;
        let cookie = login(&app, EDITOR_EMAIL, EDITOR_PASSWORD).await;
        let response = app
            .clone()
            .oneshot(request("DELETE", "/api/admin/users/1", Some(&cookie), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["message"], "Insufficient permissions");

        let response = app
            .oneshot(request("GET", "/api/admin/users/1", Some(&cookie), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn category_with_children_survives_delete() {
        let app = app().await;
        let cookie = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
        let response = app
            .clone()
            .oneshot(request("DELETE", "/api/admin/categories/1", Some(&cookie), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["success"], false);

        let response = app
            .oneshot(request("GET", "/api/admin/categories/1", Some(&cookie), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["data"]["name"], "Hair");
    }

    #[tokio::test]
    async fn list_create_update_delete_article() {
        let app = app().await;
        let cookie = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                "/api/admin/articles?limit=2&sortBy=title&sortOrder=asc",
                Some(&cookie),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        assert_eq!(
            body["pagination"],
            json!({ "page": 1, "limit": 2, "total": 3, "totalPages": 2 })
        );

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/admin/articles",
                Some(&cookie),
                Some(json!({ "title": "Holiday hours", "content": "Closed on the 24th." })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::LOCATION], "/api/admin/articles/4");
        let body = json_body(response).await;
        assert_eq!(body["message"], "Created successfully");
        assert_eq!(body["data"]["slug"], "holiday-hours");

        let response = app
            .clone()
            .oneshot(request(
                "PATCH",
                "/api/admin/articles/4",
                Some(&cookie),
                Some(json!({ "status": "published" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["data"]["status"], "published");

        let response = app
            .clone()
            .oneshot(request("DELETE", "/api/admin/articles/4", Some(&cookie), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await["data"],
            json!({ "id": 4, "deleted": true })
        );

        let response = app
            .oneshot(request("GET", "/api/admin/articles/4", Some(&cookie), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_payload_reports_field_errors() {
        let app = app().await;
        let cookie = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
        let response = app
            .oneshot(request(
                "POST",
                "/api/admin/users",
                Some(&cookie),
                Some(json!({ "email": "not-an-email", "name": "X", "password": "short" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert!(body["errors"]["email"].is_string());
        assert!(body["errors"]["password"].is_string());
    }

    #[tokio::test]
    async fn unsupported_method_is_405() {
        let app = app().await;
        let cookie = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
        let response = app
            .oneshot(request("OPTIONS", "/api/admin/articles", Some(&cookie), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(response.headers().contains_key(header::ALLOW));
    }

    #[tokio::test]
    async fn calendar_groups_reservations_by_day() {
        let app = app().await;
        let cookie = login(&app, EDITOR_EMAIL, EDITOR_PASSWORD).await;
        let response = app
            .clone()
            .oneshot(request(
                "GET",
                "/api/admin/calendar?year=2026&month=2",
                Some(&cookie),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"]["weeks"].as_array().unwrap().len(), 5);
        assert_eq!(body["data"]["weeks"][0][0]["date"], "2026-01-26");

        let response = app
            .oneshot(request(
                "GET",
                "/api/admin/calendar?year=2026&month=13",
                Some(&cookie),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
