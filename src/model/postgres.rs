use std::marker::PhantomData;

use axum::async_trait;
use chrono::NaiveDate;
use sqlx::{
    postgres::PgRow,
    query_builder::Separated,
    FromRow, PgPool, Postgres, QueryBuilder,
};

use super::{Deleted, Entity, FieldKind, Model, ModelError, Page, UserDirectory};
use crate::{
    entities::{Article, Category, Reservation, UserRecord},
    error::FieldErrors,
    query::{ListQuery, SortOrder},
};

type Assignments<'qb, 'args> = Separated<'qb, 'args, Postgres, &'static str>;

/// Table layout of an entity stored in Postgres.
pub trait PgEntity: Entity + for<'r> FromRow<'r, PgRow> + Unpin {
    const TABLE: &'static str;
    /// Select list matching the entity's `FromRow` fields.
    const COLUMNS: &'static str;
    const SEARCH_COLUMNS: &'static [&'static str];
    /// `(table, column)` pairs whose rows block deletion while they reference a record.
    const DEPENDENTS: &'static [(&'static str, &'static str)] = &[];

    /// Pushes `(columns) VALUES (binds)`.
    fn push_insert(payload: Self::Create, q: &mut QueryBuilder<'_, Postgres>) -> Result<(), ModelError>;

    /// Pushes `column = bind` assignments for the fields present in the payload.
    fn push_update(id: i64, payload: Self::Update, set: &mut Assignments<'_, '_>) -> Result<(), ModelError>;
}

/// `createdAt` -> `created_at`. Only ever fed whitelisted field names.
fn column_name(field: &str) -> String {
    let mut column = String::with_capacity(field.len() + 4);
    for ch in field.chars() {
        if ch.is_ascii_uppercase() {
            column.push('_');
            column.push(ch.to_ascii_lowercase());
        } else {
            column.push(ch);
        }
    }
    column
}

fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn map_write_error(err: sqlx::Error) -> ModelError {
    match err {
        sqlx::Error::RowNotFound => ModelError::NotFound,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            ModelError::Conflict(db.message().to_string())
        }
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => {
            ModelError::Validation(FieldErrors::single("reference", db.message()))
        }
        _ => ModelError::Database(err),
    }
}

fn invalid_filter(field: &str, message: &str) -> ModelError {
    ModelError::Validation(FieldErrors::single(format!("filter[{}]", field), message))
}

fn push_conditions<E: PgEntity>(
    q: &mut QueryBuilder<'_, Postgres>,
    query: &ListQuery,
) -> Result<(), ModelError> {
    q.push(" WHERE TRUE");

    for (field, raw) in &query.filters {
        let kind = E::filter_kind(field)
            .ok_or_else(|| invalid_filter(field, "unknown filter field"))?;
        let column = column_name(field);
        match kind {
            FieldKind::Int if raw == "null" => {
                q.push(format!(" AND {} IS NULL", column));
            }
            FieldKind::Int => {
                let value: i64 = raw
                    .parse()
                    .map_err(|_| invalid_filter(field, "must be an integer or null"))?;
                q.push(format!(" AND {} = ", column));
                q.push_bind(value);
            }
            FieldKind::Text => {
                q.push(format!(" AND {} = ", column));
                q.push_bind(raw.clone());
            }
            FieldKind::Date => {
                let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|_| invalid_filter(field, "must be a YYYY-MM-DD date"))?;
                q.push(format!(" AND ({} AT TIME ZONE 'UTC')::date = ", column));
                q.push_bind(date);
            }
        }
    }

    if let Some(search) = &query.search {
        let pattern = like_pattern(search);
        q.push(" AND (");
        for (n, column) in E::SEARCH_COLUMNS.iter().enumerate() {
            if n > 0 {
                q.push(" OR ");
            }
            q.push(format!("{} ILIKE ", column));
            q.push_bind(pattern.clone());
        }
        q.push(")");
    }

    Ok(())
}

pub struct PgModel<E> {
    pool: PgPool,
    entity: PhantomData<fn() -> E>,
}

impl<E> PgModel<E> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            entity: PhantomData,
        }
    }
}

#[async_trait]
impl<E: PgEntity> Model<E> for PgModel<E> {
    async fn find_many(&self, query: &ListQuery) -> Result<Page<E>, ModelError> {
        let mut count = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM {}", E::TABLE));
        push_conditions::<E>(&mut count, query)?;
        let (total,): (i64,) = count.build_query_as().fetch_one(&self.pool).await?;

        let sort_by = query.sort_field::<E>();
        let sort_column = if E::SORTABLE.contains(&sort_by) {
            column_name(sort_by)
        } else {
            "id".to_string()
        };

        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {} FROM {}", E::COLUMNS, E::TABLE));
        push_conditions::<E>(&mut select, query)?;
        let nulls = match query.sort_order {
            SortOrder::Asc => "NULLS FIRST",
            SortOrder::Desc => "NULLS LAST",
        };
        select.push(format!(
            " ORDER BY {} {} {}, id ASC LIMIT ",
            sort_column,
            query.sort_order.as_sql(),
            nulls
        ));
        select.push_bind(query.limit.max(1));
        select.push(" OFFSET ");
        select.push_bind(query.offset().max(0));

        let data = select.build_query_as::<E>().fetch_all(&self.pool).await?;
        Ok(Page { data, total })
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<E>, ModelError> {
        let mut q = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM {} WHERE id = ",
            E::COLUMNS,
            E::TABLE
        ));
        q.push_bind(id);
        Ok(q.build_query_as::<E>().fetch_optional(&self.pool).await?)
    }

    async fn create(&self, payload: E::Create) -> Result<E, ModelError> {
        let mut q = QueryBuilder::<Postgres>::new(format!("INSERT INTO {} ", E::TABLE));
        E::push_insert(payload, &mut q)?;
        q.push(" RETURNING ");
        q.push(E::COLUMNS);

        q.build_query_as::<E>()
            .fetch_one(&self.pool)
            .await
            .map_err(map_write_error)
    }

    async fn update(&self, id: i64, payload: E::Update) -> Result<E, ModelError> {
        let mut q = QueryBuilder::<Postgres>::new(format!("UPDATE {} SET ", E::TABLE));
        {
            let mut set = q.separated(", ");
            E::push_update(id, payload, &mut set)?;
            set.push("updated_at = NOW()");
        }
        q.push(" WHERE id = ");
        q.push_bind(id);
        q.push(" RETURNING ");
        q.push(E::COLUMNS);

        q.build_query_as::<E>()
            .fetch_one(&self.pool)
            .await
            .map_err(map_write_error)
    }

    async fn delete(&self, id: i64) -> Result<Deleted, ModelError> {
        for (table, column) in E::DEPENDENTS {
            let has_dependents: bool = sqlx::query_scalar(&format!(
                "SELECT EXISTS (SELECT 1 FROM {} WHERE {} = $1)",
                table, column
            ))
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
            if has_dependents {
                return Err(ModelError::Conflict(format!(
                    "Cannot delete: {} {} has dependent records",
                    E::RESOURCE,
                    id
                )));
            }
        }

        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", E::TABLE))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => {
                    ModelError::Conflict(db.message().to_string())
                }
                _ => ModelError::Database(err),
            })?;

        if result.rows_affected() == 0 {
            return Err(ModelError::NotFound);
        }
        Ok(Deleted { id, deleted: true })
    }
}

#[async_trait]
impl UserDirectory for PgModel<UserRecord> {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, ModelError> {
        let mut q = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM users WHERE email = ",
            <UserRecord as PgEntity>::COLUMNS
        ));
        q.push_bind(email.trim().to_lowercase());
        Ok(q.build_query_as::<UserRecord>()
            .fetch_optional(&self.pool)
            .await?)
    }
}

impl PgEntity for UserRecord {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static str =
        "id, email, name, role, permissions, digest, created_at, updated_at";
    const SEARCH_COLUMNS: &'static [&'static str] = &["email", "name"];

    fn push_insert(payload: Self::Create, q: &mut QueryBuilder<'_, Postgres>) -> Result<(), ModelError> {
        let digest = crate::password::hash_password(&payload.password)?;
        q.push("(email, name, role, permissions, digest) VALUES (");
        let mut values = q.separated(", ");
        values.push_bind(payload.email.trim().to_lowercase());
        values.push_bind(payload.name);
        values.push_bind(payload.role);
        values.push_bind(payload.permissions);
        values.push_bind(digest);
        values.push_unseparated(")");
        Ok(())
    }

    fn push_update(_id: i64, payload: Self::Update, set: &mut Assignments<'_, '_>) -> Result<(), ModelError> {
        if let Some(password) = payload.password {
            let digest = crate::password::hash_password(&password)?;
            set.push("digest = ").push_bind_unseparated(digest);
        }
        if let Some(email) = payload.email {
            set.push("email = ").push_bind_unseparated(email.trim().to_lowercase());
        }
        if let Some(name) = payload.name {
            set.push("name = ").push_bind_unseparated(name);
        }
        if let Some(role) = payload.role {
            set.push("role = ").push_bind_unseparated(role);
        }
        if let Some(permissions) = payload.permissions {
            set.push("permissions = ").push_bind_unseparated(permissions);
        }
        Ok(())
    }
}

impl PgEntity for Category {
    const TABLE: &'static str = "categories";
    const COLUMNS: &'static str =
        "id, name, slug, description, parent_id, created_at, updated_at";
    const SEARCH_COLUMNS: &'static [&'static str] = &["name", "slug", "description"];
    const DEPENDENTS: &'static [(&'static str, &'static str)] = &[("categories", "parent_id")];

    fn push_insert(payload: Self::Create, q: &mut QueryBuilder<'_, Postgres>) -> Result<(), ModelError> {
        q.push("(name, slug, description, parent_id) VALUES (");
        let mut values = q.separated(", ");
        values.push_bind(payload.name);
        values.push_bind(payload.slug);
        values.push_bind(payload.description.filter(|d| !d.trim().is_empty()));
        values.push_bind(payload.parent_id);
        values.push_unseparated(")");
        Ok(())
    }

    fn push_update(id: i64, payload: Self::Update, set: &mut Assignments<'_, '_>) -> Result<(), ModelError> {
        if let Some(parent_id) = payload.parent_id {
            if parent_id == Some(id) {
                return Err(ModelError::Validation(FieldErrors::single(
                    "parentId",
                    "a category cannot be its own parent",
                )));
            }
            set.push("parent_id = ").push_bind_unseparated(parent_id);
        }
        if let Some(name) = payload.name {
            set.push("name = ").push_bind_unseparated(name);
        }
        if let Some(slug) = payload.slug {
            set.push("slug = ").push_bind_unseparated(slug);
        }
        if let Some(description) = payload.description {
            set.push("description = ")
                .push_bind_unseparated(description.filter(|d| !d.trim().is_empty()));
        }
        Ok(())
    }
}

impl PgEntity for Article {
    const TABLE: &'static str = "articles";
    const COLUMNS: &'static str = "id, title, slug, excerpt, content, category_id, status, \
                                   author_id, published_at, created_at, updated_at";
    const SEARCH_COLUMNS: &'static [&'static str] = &["title", "excerpt", "content"];

    fn push_insert(payload: Self::Create, q: &mut QueryBuilder<'_, Postgres>) -> Result<(), ModelError> {
        let published_at = (payload.status == "published").then(chrono::Utc::now);
        q.push("(title, slug, excerpt, content, category_id, status, author_id, published_at) VALUES (");
        let mut values = q.separated(", ");
        values.push_bind(payload.title);
        values.push_bind(payload.slug);
        values.push_bind(payload.excerpt.filter(|e| !e.trim().is_empty()));
        values.push_bind(payload.content);
        values.push_bind(payload.category_id);
        values.push_bind(payload.status);
        values.push_bind(payload.author_id);
        values.push_bind(published_at);
        values.push_unseparated(")");
        Ok(())
    }

    fn push_update(_id: i64, payload: Self::Update, set: &mut Assignments<'_, '_>) -> Result<(), ModelError> {
        if let Some(title) = payload.title {
            set.push("title = ").push_bind_unseparated(title);
        }
        if let Some(slug) = payload.slug {
            set.push("slug = ").push_bind_unseparated(slug);
        }
        if let Some(excerpt) = payload.excerpt {
            set.push("excerpt = ")
                .push_bind_unseparated(excerpt.filter(|e| !e.trim().is_empty()));
        }
        if let Some(content) = payload.content {
            set.push("content = ").push_bind_unseparated(content);
        }
        if let Some(category_id) = payload.category_id {
            set.push("category_id = ").push_bind_unseparated(category_id);
        }
        if let Some(status) = payload.status {
            if status == "published" {
                set.push("published_at = COALESCE(published_at, NOW())");
            }
            set.push("status = ").push_bind_unseparated(status);
        }
        Ok(())
    }
}

impl PgEntity for Reservation {
    const TABLE: &'static str = "reservations";
    const COLUMNS: &'static str = "id, customer_name, customer_email, customer_phone, service, \
                                   staff, starts_at, duration_minutes, status, notes, \
                                   created_at, updated_at";
    const SEARCH_COLUMNS: &'static [&'static str] =
        &["customer_name", "customer_email", "customer_phone", "service", "staff"];

    fn push_insert(payload: Self::Create, q: &mut QueryBuilder<'_, Postgres>) -> Result<(), ModelError> {
        let starts_at = payload.starts_at.ok_or_else(|| {
            ModelError::Validation(FieldErrors::single("startsAt", "startsAt is required"))
        })?;
        q.push(
            "(customer_name, customer_email, customer_phone, service, staff, starts_at, \
             duration_minutes, status, notes) VALUES (",
        );
        let mut values = q.separated(", ");
        values.push_bind(payload.customer_name);
        values.push_bind(payload.customer_email.trim().to_lowercase());
        values.push_bind(payload.customer_phone.filter(|p| !p.trim().is_empty()));
        values.push_bind(payload.service);
        values.push_bind(payload.staff.filter(|s| !s.trim().is_empty()));
        values.push_bind(starts_at);
        values.push_bind(payload.duration_minutes);
        values.push_bind(payload.status);
        values.push_bind(payload.notes.filter(|n| !n.trim().is_empty()));
        values.push_unseparated(")");
        Ok(())
    }

    fn push_update(_id: i64, payload: Self::Update, set: &mut Assignments<'_, '_>) -> Result<(), ModelError> {
        if let Some(name) = payload.customer_name {
            set.push("customer_name = ").push_bind_unseparated(name);
        }
        if let Some(email) = payload.customer_email {
            set.push("customer_email = ")
                .push_bind_unseparated(email.trim().to_lowercase());
        }
        if let Some(phone) = payload.customer_phone {
            set.push("customer_phone = ")
                .push_bind_unseparated(phone.filter(|p| !p.trim().is_empty()));
        }
        if let Some(service) = payload.service {
            set.push("service = ").push_bind_unseparated(service);
        }
        if let Some(staff) = payload.staff {
            set.push("staff = ")
                .push_bind_unseparated(staff.filter(|s| !s.trim().is_empty()));
        }
        if let Some(starts_at) = payload.starts_at {
            set.push("starts_at = ").push_bind_unseparated(starts_at);
        }
        if let Some(minutes) = payload.duration_minutes {
            set.push("duration_minutes = ").push_bind_unseparated(minutes);
        }
        if let Some(status) = payload.status {
            set.push("status = ").push_bind_unseparated(status);
        }
        if let Some(notes) = payload.notes {
            set.push("notes = ")
                .push_bind_unseparated(notes.filter(|n| !n.trim().is_empty()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_fields_map_to_snake_case_columns() {
        assert_eq!(column_name("id"), "id");
        assert_eq!(column_name("createdAt"), "created_at");
        assert_eq!(column_name("customerName"), "customer_name");
        assert_eq!(column_name("parentId"), "parent_id");
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn conditions_bind_filters_and_search() {
        let mut query = ListQuery {
            search: Some("cut".into()),
            ..ListQuery::default()
        };
        query.filters.insert("status".into(), "confirmed".into());
        query.filters.insert("startsAt".into(), "2026-10-19".into());

        let mut q = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM reservations");
        push_conditions::<Reservation>(&mut q, &query).unwrap();
        let sql = q.sql();
        assert!(sql.contains("(starts_at AT TIME ZONE 'UTC')::date = $1"));
        assert!(sql.contains("status = $2"));
        assert!(sql.contains("customer_name ILIKE $3 OR customer_email ILIKE $4"));
    }

    #[test]
    fn null_filter_becomes_is_null() {
        let mut query = ListQuery::default();
        query.filters.insert("parentId".into(), "null".into());
        let mut q = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM categories");
        push_conditions::<Category>(&mut q, &query).unwrap();
        assert!(q.sql().ends_with("WHERE TRUE AND parent_id IS NULL"));
    }

    #[test]
    fn unknown_filter_is_rejected() {
        let mut query = ListQuery::default();
        query.filters.insert("digest".into(), "x".into());
        let mut q = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        assert!(matches!(
            push_conditions::<UserRecord>(&mut q, &query),
            Err(ModelError::Validation(_))
        ));
    }
}
