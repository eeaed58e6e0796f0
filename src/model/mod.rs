//! The capability every admin resource plugs into the CRUD dispatcher with,
//! plus the in-memory and Postgres stores implementing it.

use std::sync::Arc;

use axum::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::{entities::UserRecord, error::FieldErrors, query::ListQuery};

mod memory;
mod postgres;
pub mod seed;

pub use memory::MemoryModel;
pub use postgres::PgModel;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("record not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid payload")]
    Validation(FieldErrors),
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// A page of records; `total` counts every match before pagination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Deleted {
    pub id: i64,
    pub deleted: bool,
}

/// How a filterable field compares against a `filter[<key>]` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Text,
    /// A timestamp matched by its UTC calendar date.
    Date,
}

/// A single field of a record, as seen by sorting and filtering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldValue {
    Null,
    Int(i64),
    Text(String),
    Time(DateTime<Utc>),
}

impl FieldValue {
    pub fn text(value: &str) -> Self {
        Self::Text(value.to_string())
    }

    pub fn optional_int(value: Option<i64>) -> Self {
        value.map_or(Self::Null, Self::Int)
    }

    pub fn optional_time(value: Option<DateTime<Utc>>) -> Self {
        value.map_or(Self::Null, Self::Time)
    }

    /// Whether this value satisfies a raw filter value of the given kind.
    pub fn matches(&self, kind: FieldKind, raw: &str) -> bool {
        match (self, kind) {
            (Self::Null, _) => raw == "null",
            (Self::Int(value), FieldKind::Int) => raw.parse::<i64>().map_or(false, |n| n == *value),
            (Self::Text(value), FieldKind::Text) => value == raw,
            (Self::Time(value), FieldKind::Date) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_or(false, |date| value.date_naive() == date),
            _ => false,
        }
    }
}

pub trait Validate {
    fn validate(&self) -> FieldErrors;
}

/// A record type the generic stores know how to hold.
pub trait Entity: Clone + Serialize + Send + Sync + 'static {
    type Create: DeserializeOwned + Validate + Send + Sync + 'static;
    type Update: DeserializeOwned + Validate + Send + Sync + 'static;

    /// Resource name; also the prefix of its permission keys.
    const RESOURCE: &'static str;
    const SORTABLE: &'static [&'static str];
    const FILTERABLE: &'static [(&'static str, FieldKind)];
    const DEFAULT_SORT: &'static str = "id";

    fn id(&self) -> i64;

    fn from_create(id: i64, payload: Self::Create, now: DateTime<Utc>) -> Result<Self, ModelError>;

    fn apply_update(&mut self, payload: Self::Update, now: DateTime<Utc>) -> Result<(), ModelError>;

    /// Values the free-text `search` parameter is matched against.
    fn search_text(&self) -> Vec<&str>;

    fn field(&self, name: &str) -> FieldValue;

    /// `(field, value)` pairs that must be unique across the table.
    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    /// A reference to another record of the same table, which then counts as
    /// a dependent of that record.
    fn parent_id(&self) -> Option<i64> {
        None
    }

    /// `(field, resource, id)` for every link to a record of another table.
    /// The target must exist when the record is written.
    fn references(&self) -> Vec<(&'static str, &'static str, i64)> {
        Vec::new()
    }

    /// Clears links to a deleted record of `resource`; returns whether any changed.
    fn detach(&mut self, _resource: &str, _id: i64) -> bool {
        false
    }

    fn filter_kind(field: &str) -> Option<FieldKind> {
        Self::FILTERABLE
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, kind)| *kind)
    }
}

#[async_trait]
pub trait Model<E: Entity>: Send + Sync {
    async fn find_many(&self, query: &ListQuery) -> Result<Page<E>, ModelError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<E>, ModelError>;

    async fn create(&self, payload: E::Create) -> Result<E, ModelError>;

    async fn update(&self, id: i64, payload: E::Update) -> Result<E, ModelError>;

    async fn delete(&self, id: i64) -> Result<Deleted, ModelError>;
}

/// Credential lookup used by login.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, ModelError>;
}

/// Every model the admin API serves, behind trait objects so the backing
/// store is chosen once at startup.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn Model<UserRecord>>,
    pub directory: Arc<dyn UserDirectory>,
    pub categories: Arc<dyn Model<crate::entities::Category>>,
    pub articles: Arc<dyn Model<crate::entities::Article>>,
    pub reservations: Arc<dyn Model<crate::entities::Reservation>>,
}

impl Stores {
    /// Fresh in-memory tables, empty.
    pub fn memory() -> Self {
        let users = Arc::new(MemoryModel::<UserRecord>::new());
        let categories = Arc::new(MemoryModel::<crate::entities::Category>::new());
        let articles = Arc::new(MemoryModel::<crate::entities::Article>::new());

        // Articles point at categories and authors; deleting either nulls the link.
        articles.link(&categories);
        articles.link(&users);
        categories.link(&articles);
        users.link(&articles);

        Self {
            users: users.clone(),
            directory: users,
            categories,
            articles,
            reservations: Arc::new(MemoryModel::<crate::entities::Reservation>::new()),
        }
    }

    /// In-memory tables holding the demo data set.
    pub async fn seeded_memory() -> Result<Self, ModelError> {
        let stores = Self::memory();
        seed::demo_data(&stores).await?;
        Ok(stores)
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let users = Arc::new(PgModel::<UserRecord>::new(pool.clone()));
        Self {
            users: users.clone(),
            directory: users,
            categories: Arc::new(PgModel::<crate::entities::Category>::new(pool.clone())),
            articles: Arc::new(PgModel::<crate::entities::Article>::new(pool.clone())),
            reservations: Arc::new(PgModel::<crate::entities::Reservation>::new(pool)),
        }
    }
}

pub use seed::ensure_admin;
