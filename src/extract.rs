use std::{convert::Infallible, sync::Arc};

use axum::{
    async_trait,
    extract::{FromRequest, RequestParts},
    TypedHeader,
};
use axum_extra::extract::CookieJar;
use headers::{authorization::Bearer, Authorization};

use crate::{
    config,
    entities::User,
    error::ApiError,
    provider::IdentityProvider,
    session::SessionKeys,
};

/// Raw credentials a request may carry.
#[derive(Debug, Default, Clone)]
pub struct Credentials {
    pub cookie: Option<String>,
    pub bearer: Option<String>,
}

#[async_trait]
impl<B> FromRequest<B> for Credentials
where
    B: Send,
{
    type Rejection = Infallible;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let cookie = CookieJar::from_request(req)
            .await?
            .get(config::COOKIE_SESSION_KEY)
            .map(|x| x.value().to_string());
        let bearer = TypedHeader::<Authorization<Bearer>>::from_request(req)
            .await
            .ok()
            .map(|TypedHeader(Authorization(bearer))| bearer.token().to_string());

        Ok(Self { cookie, bearer })
    }
}

/// Turns request credentials into a user, locally or through the identity provider.
pub struct Authenticator {
    keys: SessionKeys,
    provider: Option<Arc<dyn IdentityProvider>>,
}

impl Authenticator {
    pub fn new(keys: SessionKeys) -> Self {
        Self {
            keys,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// Bearer tokens go to the provider when one is configured. Otherwise, and
    /// for the session cookie, tokens are verified locally. Failures are silent.
    pub async fn authenticate(&self, credentials: &Credentials) -> Option<User> {
        if let (Some(provider), Some(token)) = (&self.provider, &credentials.bearer) {
            return provider.verify(token).await;
        }

        let token = credentials
            .cookie
            .as_deref()
            .or(credentials.bearer.as_deref())?;
        match self.keys.verify(token) {
            Ok(claims) => Some(claims.into_user()),
            Err(err) => {
                tracing::debug!("rejected session token: {}", err);
                None
            }
        }
    }
}

#[derive(Debug)]
pub struct Authenticated(pub User);

#[async_trait]
impl<B> FromRequest<B> for Authenticated
where
    B: Send,
{
    type Rejection = ApiError;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let authenticator = req
            .extensions()
            .get::<Arc<Authenticator>>()
            .cloned()
            .ok_or_else(|| internal_error!("no authenticator retrievable"))?;
        let credentials = match Credentials::from_request(req).await {
            Ok(credentials) => credentials,
            Err(never) => match never {},
        };

        authenticator
            .authenticate(&credentials)
            .await
            .map(Self)
            .ok_or(ApiError::Unauthorized)
    }
}

#[derive(Debug)]
pub struct Maybe<T>(pub Option<T>);

#[async_trait]
impl<B, T> FromRequest<B> for Maybe<T>
where
    B: Send,
    T: FromRequest<B>,
{
    type Rejection = Infallible;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        Ok(Self(T::from_request(req).await.ok()))
    }
}
