use std::{process::ExitCode, sync::Arc};

use axum::Router;
use axum_extra::routing::SpaRouter;
use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[macro_use]
mod utility;

mod api;
mod calendar;
mod config;
mod crud;
mod entities;
mod error;
mod extract;
mod hooks;
mod model;
mod password;
mod permission;
mod provider;
mod query;
mod rate_limit;
mod session;

use config::Settings;
use extract::Authenticator;
use model::{ModelError, Stores};
use provider::StackAuthProvider;
use session::SessionKeys;

#[derive(Debug, Parser)]
#[command(name = "salon-admin")]
#[command(about = "Admin API for the salon site", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the admin API and the bundled front end (default).
    Serve,
    /// Apply pending database migrations.
    Migrate,
    /// Apply migrations and create the administrator account if missing.
    Seed,
}

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("could not prepare data: {0}")]
    Model(#[from] ModelError),
    #[error("could not build identity provider client: {0}")]
    Provider(#[from] reqwest::Error),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} requires DATABASE_URL")]
    NoDatabase(&'static str),
}

#[tokio::main]
async fn main() -> ExitCode {
    // Set up environment.
    dotenv().ok();

    // Initialize tracing.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match Settings::from_env() {
        Ok(settings) => run(cli.command.unwrap_or(Command::Serve), settings).await,
        Err(err) => Err(err.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{}", err);
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn connect(settings: &Settings) -> Result<Option<PgPool>, StartupError> {
    settings
        .database_url
        .as_deref()
        .map(|url| PgPoolOptions::new().max_connections(64).connect_lazy(url))
        .transpose()
        .map_err(StartupError::from)
}

async fn run(command: Command, settings: Settings) -> Result<(), StartupError> {
    let pool = connect(&settings)?;

    match command {
        Command::Migrate => {
            let pool = pool.ok_or(StartupError::NoDatabase("migrate"))?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            tracing::info!("migrations applied");
            Ok(())
        }
        Command::Seed => {
            let pool = pool.ok_or(StartupError::NoDatabase("seed"))?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            if model::ensure_admin(&Stores::postgres(pool)).await? {
                tracing::info!("created administrator {}", model::seed::ADMIN_EMAIL);
            } else {
                tracing::info!("administrator already present");
            }
            Ok(())
        }
        Command::Serve => serve(settings, pool).await,
    }
}

async fn serve(settings: Settings, pool: Option<PgPool>) -> Result<(), StartupError> {
    let stores = match pool {
        Some(pool) => {
            let stores = Stores::postgres(pool);
            if seeds_default_admin(&settings) {
                model::ensure_admin(&stores).await?;
            } else {
                tracing::info!("production mode, not creating the default administrator");
            }
            stores
        }
        None => {
            tracing::warn!("DATABASE_URL not set, serving in-memory demo data");
            Stores::seeded_memory().await?
        }
    };

    let mut authenticator = Authenticator::new(SessionKeys::new(settings.jwt_secret.as_bytes()));
    if let Some(stack) = settings.stack.clone() {
        tracing::info!("verifying bearer tokens with {}", stack.api_url);
        authenticator = authenticator.with_provider(Arc::new(StackAuthProvider::new(stack)?));
    }

    let state = api::AppState::new(stores, authenticator, settings.production);
    let app = build_app(state, &settings.static_dir);

    let addr = settings.bind_addr;
    tracing::debug!("listening on {}", addr);

    // Start app.
    match &settings.tls {
        Some(tls) => {
            let config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path).await?;
            tracing::debug!("using rustls");
            axum_server::bind_rustls(addr, config)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            axum_server::bind(addr)
                .serve(app.into_make_service())
                .await?;
        }
    }
    Ok(())
}

/// The well-known demo credentials are only planted outside production;
/// production databases get their administrator through `seed`.
fn seeds_default_admin(settings: &Settings) -> bool {
    !settings.production
}

fn build_app(state: api::AppState, static_dir: &str) -> Router {
    let spa = SpaRouter::new(config::ASSETS_ROUTE, static_dir);
    Router::new()
        .merge(spa)
        .nest(config::API_ROUTE, api::routes(state))
}
