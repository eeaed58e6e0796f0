use std::{env, net::SocketAddr};

use thiserror::Error;

pub const API_ROUTE: &str = "/api/admin";
pub const ASSETS_ROUTE: &str = "/assets";

pub const COOKIE_SESSION_KEY: &str = "admin-token";
pub const SESSION_TTL_DAYS: i64 = 7;

pub const PAGINATION_DEFAULT_LIMIT: i64 = 10;
pub const PAGINATION_MAX_LIMIT: i64 = 100;

pub const LOGIN_ATTEMPT_LIMIT: usize = 10;
pub const LOGIN_ATTEMPT_WINDOW_SECS: u64 = 15 * 60;

pub const STACK_DEFAULT_API_URL: &str = "https://api.stack-auth.com";

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_STATIC_DIR: &str = "dist";
const MIN_PRODUCTION_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Credentials for the hosted identity provider.
#[derive(Debug, Clone)]
pub struct StackSettings {
    pub project_id: String,
    pub secret_server_key: String,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub cert_path: String,
    pub key_path: String,
}

/// Runtime settings assembled from the process environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub jwt_secret: String,
    pub database_url: Option<String>,
    pub stack: Option<StackSettings>,
    pub production: bool,
    pub bind_addr: SocketAddr,
    pub tls: Option<TlsSettings>,
    pub static_dir: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let production = get("APP_ENV").map_or(false, |value| value == "production");

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if production && jwt_secret.len() < MIN_PRODUCTION_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "JWT_SECRET",
                reason: format!("must be at least {} bytes", MIN_PRODUCTION_SECRET_LEN),
            });
        }

        let stack = match (
            get("NEXT_PUBLIC_STACK_PROJECT_ID"),
            get("STACK_SECRET_SERVER_KEY"),
        ) {
            (Some(project_id), Some(secret_server_key)) => Some(StackSettings {
                project_id,
                secret_server_key,
                api_url: get("STACK_API_URL")
                    .unwrap_or_else(|| STACK_DEFAULT_API_URL.to_string()),
            }),
            _ => None,
        };

        let bind_addr = get("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .map_err(|err: std::net::AddrParseError| ConfigError::Invalid {
                name: "BIND_ADDR",
                reason: err.to_string(),
            })?;

        let tls = match (get("CERT_PATH"), get("KEY_PATH")) {
            (Some(cert_path), Some(key_path)) => Some(TlsSettings {
                cert_path,
                key_path,
            }),
            _ => None,
        };

        Ok(Self {
            jwt_secret,
            database_url: get("DATABASE_URL"),
            stack,
            production,
            bind_addr,
            tls,
            static_dir: get("STATIC_DIR").unwrap_or_else(|| DEFAULT_STATIC_DIR.to_string()),
        })
    }
}
