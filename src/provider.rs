//! Hosted identity provider used instead of local session tokens when configured.

use std::time::Duration;

use axum::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::{config::StackSettings, entities::User};

const REQUEST_TIMEOUT_SECS: u64 = 10;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolves an access token to a user. Every failure means "no user".
    async fn verify(&self, access_token: &str) -> Option<User>;
}

#[derive(Debug, Default, Deserialize)]
struct ServerMetadata {
    role: Option<String>,
    #[serde(default)]
    permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StackUser {
    id: String,
    primary_email: Option<String>,
    display_name: Option<String>,
    #[serde(default)]
    server_metadata: Option<ServerMetadata>,
}

impl StackUser {
    /// Provider ids are opaque strings; numeric ids are kept, anything else maps to 0.
    fn into_user(self) -> User {
        let metadata = self.server_metadata.unwrap_or_default();
        let email = self.primary_email.unwrap_or_default();
        User {
            id: self.id.parse().unwrap_or(0),
            name: self.display_name.unwrap_or_else(|| email.clone()),
            email,
            role: metadata.role.unwrap_or_else(|| "editor".to_string()),
            permissions: metadata.permissions,
        }
    }
}

pub struct StackAuthProvider {
    client: Client,
    settings: StackSettings,
}

impl StackAuthProvider {
    pub fn new(settings: StackSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, settings })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/v1/users/me", self.settings.api_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl IdentityProvider for StackAuthProvider {
    async fn verify(&self, access_token: &str) -> Option<User> {
        let response = self
            .client
            .get(self.endpoint())
            .header("x-stack-access-type", "server")
            .header("x-stack-project-id", &self.settings.project_id)
            .header("x-stack-secret-server-key", &self.settings.secret_server_key)
            .header("x-stack-access-token", access_token)
            .send()
            .await
            .map_err(|err| tracing::warn!("identity provider unreachable: {}", err))
            .ok()?;

        if !response.status().is_success() {
            tracing::debug!("identity provider rejected token: {}", response.status());
            return None;
        }

        response
            .json::<StackUser>()
            .await
            .map(StackUser::into_user)
            .map_err(|err| tracing::warn!("unexpected identity provider response: {}", err))
            .ok()
    }
}
