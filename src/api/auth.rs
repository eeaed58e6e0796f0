use std::{sync::Arc, time::Instant};

use axum::{
    body::Bytes,
    routing::{get, post},
    Extension, Json, Router,
};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::{
    config,
    entities::User,
    error::{ApiError, FieldErrors},
    extract::Authenticated,
    password::{verify_decoy, verify_password},
    utility::{ApiResult, Envelope},
};

pub fn controllers() -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout).get(logout))
        .route("/session", get(session))
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginData {
    user: User,
    token: String,
}

fn session_cookie(value: String, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(config::COOKIE_SESSION_KEY, value);
    cookie.set_secure(secure);
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(time::Duration::days(config::SESSION_TTL_DAYS));
    cookie.set_path("/");
    cookie
}

async fn login(
    Extension(state): Extension<Arc<AppState>>,
    jar: CookieJar,
    body: Bytes,
) -> ApiResult<(CookieJar, Json<Envelope<LoginData>>)> {
    let body: LoginBody = serde_json::from_slice(&body)
        .map_err(|_| ApiError::invalid("body", "request body must be a JSON object"))?;

    let mut errors = FieldErrors::new();
    errors.require("email", &body.email);
    errors.require("password", &body.password);
    errors.into_result().map_err(ApiError::ValidationFailed)?;

    let email = body.email.trim().to_lowercase();
    if !state.limiter.check(&email, Instant::now()) {
        tracing::warn!(email = %email, "login rate limit exceeded");
        return Err(ApiError::TooManyRequests);
    }

    // Verify credentials.
    let record = match state.stores.directory.find_by_email(&email).await? {
        Some(record) => record,
        None => {
            verify_decoy(&body.password);
            tracing::info!(email = %email, "failed login for unknown account");
            return Err(ApiError::InvalidCredentials);
        }
    };
    if !verify_password(&body.password, &record.digest) {
        tracing::info!(email = %email, "failed login");
        return Err(ApiError::InvalidCredentials);
    }
    state.limiter.reset(&email);

    // Issue session.
    let user = record.principal();
    let (token, _) = state
        .authenticator
        .keys()
        .issue(&user)
        .map_err(|err| internal_error!(err))?;
    tracing::info!(user_id = user.id, "signed in");

    Ok((
        jar.add(session_cookie(token.clone(), state.production)),
        Json(Envelope::ok(LoginData { user, token }).with_message("Login successful")),
    ))
}

async fn logout(jar: CookieJar) -> (CookieJar, Json<Envelope<()>>) {
    let mut cookie = Cookie::named(config::COOKIE_SESSION_KEY);
    cookie.set_path("/");
    (jar.remove(cookie), Json(Envelope::notice("Logged out")))
}

async fn session(Authenticated(user): Authenticated) -> Json<Envelope<User>> {
    Json(Envelope::ok(user))
}
