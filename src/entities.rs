use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::FieldErrors,
    model::{Entity, FieldKind, FieldValue, ModelError, Validate},
    password,
    utility::deserialize_some,
};

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref PERMISSION_REGEX: Regex = Regex::new(r"^[a-z_]+\.[a-z_]+$").unwrap();
    static ref SLUG_REGEX: Regex = Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap();
}

const PASSWORD_LENGTH: std::ops::RangeInclusive<usize> = 8..=512;
pub const MAX_DURATION_MINUTES: i32 = 480;
const DURATION_MINUTES: std::ops::RangeInclusive<i32> = 5..=MAX_DURATION_MINUTES;

pub const ARTICLE_STATUSES: &[&str] = &["draft", "published", "archived"];
pub const RESERVATION_STATUSES: &[&str] = &["pending", "confirmed", "cancelled", "completed"];

/// Lowercase ASCII slug with single dashes between words.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

fn check_email(errors: &mut FieldErrors, field: &str, email: &str) {
    if email.trim().is_empty() {
        errors.add(field, format!("{} is required", field));
    } else if !EMAIL_REGEX.is_match(email.trim()) {
        errors.add(field, format!("{} must be a valid email address", field));
    }
}

fn check_password(errors: &mut FieldErrors, password: &str) {
    if !PASSWORD_LENGTH.contains(&password.chars().count()) {
        errors.add("password", "password must be between 8 and 512 characters");
    }
}

fn check_permissions(errors: &mut FieldErrors, permissions: &[String]) {
    if let Some(bad) = permissions.iter().find(|p| !PERMISSION_REGEX.is_match(p)) {
        errors.add(
            "permissions",
            format!("{} is not a resource.action permission", bad),
        );
    }
}

fn check_slug(errors: &mut FieldErrors, slug: &str) {
    if !slug.is_empty() && !SLUG_REGEX.is_match(slug) {
        errors.add("slug", "slug may only contain lowercase letters, digits and dashes");
    }
}

fn check_status(errors: &mut FieldErrors, status: &str, allowed: &[&str]) {
    if !allowed.contains(&status) {
        errors.add("status", format!("status must be one of {}", allowed.join(", ")));
    }
}

fn validation(field: &str, message: &str) -> ModelError {
    ModelError::Validation(FieldErrors::single(field, message))
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// Users

/// An authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub role: String,
    pub permissions: Vec<String>,
    #[serde(skip_serializing)]
    pub digest: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn principal(&self) -> User {
        User {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

fn default_role() -> String {
    "editor".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl Validate for CreateUser {
    fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        check_email(&mut errors, "email", &self.email);
        errors.require("name", &self.name);
        check_password(&mut errors, &self.password);
        errors.require("role", &self.role);
        check_permissions(&mut errors, &self.permissions);
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    pub email: Option<String>,
    pub name: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub permissions: Option<Vec<String>>,
}

impl Validate for UpdateUser {
    fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if let Some(email) = &self.email {
            check_email(&mut errors, "email", email);
        }
        if let Some(name) = &self.name {
            errors.require("name", name);
        }
        if let Some(password) = &self.password {
            check_password(&mut errors, password);
        }
        if let Some(role) = &self.role {
            errors.require("role", role);
        }
        if let Some(permissions) = &self.permissions {
            check_permissions(&mut errors, permissions);
        }
        errors
    }
}

impl Entity for UserRecord {
    type Create = CreateUser;
    type Update = UpdateUser;

    const RESOURCE: &'static str = "users";
    const SORTABLE: &'static [&'static str] = &["id", "email", "name", "role", "createdAt"];
    const FILTERABLE: &'static [(&'static str, FieldKind)] = &[("role", FieldKind::Text)];

    fn id(&self) -> i64 {
        self.id
    }

    fn from_create(id: i64, payload: CreateUser, now: DateTime<Utc>) -> Result<Self, ModelError> {
        Ok(Self {
            id,
            email: payload.email.trim().to_lowercase(),
            name: payload.name,
            role: payload.role,
            permissions: payload.permissions,
            digest: password::hash_password(&payload.password)?,
            created_at: now,
            updated_at: now,
        })
    }

    fn apply_update(&mut self, payload: UpdateUser, now: DateTime<Utc>) -> Result<(), ModelError> {
        if let Some(password) = payload.password {
            self.digest = password::hash_password(&password)?;
        }
        if let Some(email) = payload.email {
            self.email = email.trim().to_lowercase();
        }
        if let Some(name) = payload.name {
            self.name = name;
        }
        if let Some(role) = payload.role {
            self.role = role;
        }
        if let Some(permissions) = payload.permissions {
            self.permissions = permissions;
        }
        self.updated_at = now;
        Ok(())
    }

    fn search_text(&self) -> Vec<&str> {
        vec![self.email.as_str(), self.name.as_str()]
    }

    fn field(&self, name: &str) -> FieldValue {
        match name {
            "id" => FieldValue::Int(self.id),
            "email" => FieldValue::text(&self.email),
            "name" => FieldValue::text(&self.name),
            "role" => FieldValue::text(&self.role),
            "createdAt" => FieldValue::Time(self.created_at),
            _ => FieldValue::Null,
        }
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![("email", self.email.clone())]
    }
}

// Categories

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCategory {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
}

impl Validate for CreateCategory {
    fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        errors.require("name", &self.name);
        check_slug(&mut errors, &self.slug);
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCategory {
    pub name: Option<String>,
    pub slug: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub parent_id: Option<Option<i64>>,
}

impl Validate for UpdateCategory {
    fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if let Some(name) = &self.name {
            errors.require("name", name);
        }
        if let Some(slug) = &self.slug {
            errors.require("slug", slug);
            check_slug(&mut errors, slug);
        }
        errors
    }
}

impl Entity for Category {
    type Create = CreateCategory;
    type Update = UpdateCategory;

    const RESOURCE: &'static str = "categories";
    const SORTABLE: &'static [&'static str] = &["id", "name", "slug", "createdAt"];
    const FILTERABLE: &'static [(&'static str, FieldKind)] = &[("parentId", FieldKind::Int)];

    fn id(&self) -> i64 {
        self.id
    }

    fn from_create(id: i64, payload: CreateCategory, now: DateTime<Utc>) -> Result<Self, ModelError> {
        Ok(Self {
            id,
            name: payload.name,
            slug: payload.slug,
            description: blank_to_none(payload.description),
            parent_id: payload.parent_id,
            created_at: now,
            updated_at: now,
        })
    }

    fn apply_update(&mut self, payload: UpdateCategory, now: DateTime<Utc>) -> Result<(), ModelError> {
        if let Some(parent_id) = payload.parent_id {
            if parent_id == Some(self.id) {
                return Err(validation("parentId", "a category cannot be its own parent"));
            }
            self.parent_id = parent_id;
        }
        if let Some(name) = payload.name {
            self.name = name;
        }
        if let Some(slug) = payload.slug {
            self.slug = slug;
        }
        if let Some(description) = payload.description {
            self.description = blank_to_none(description);
        }
        self.updated_at = now;
        Ok(())
    }

    fn search_text(&self) -> Vec<&str> {
        let mut text = vec![self.name.as_str(), self.slug.as_str()];
        text.extend(self.description.as_deref());
        text
    }

    fn field(&self, name: &str) -> FieldValue {
        match name {
            "id" => FieldValue::Int(self.id),
            "name" => FieldValue::text(&self.name),
            "slug" => FieldValue::text(&self.slug),
            "parentId" => FieldValue::optional_int(self.parent_id),
            "createdAt" => FieldValue::Time(self.created_at),
            _ => FieldValue::Null,
        }
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![("slug", self.slug.clone())]
    }

    fn parent_id(&self) -> Option<i64> {
        self.parent_id
    }
}

// Articles

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub excerpt: Option<String>,
    pub content: String,
    pub category_id: Option<i64>,
    pub status: String,
    pub author_id: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_article_status() -> String {
    "draft".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateArticle {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub slug: String,
    pub excerpt: Option<String>,
    #[serde(default)]
    pub content: String,
    pub category_id: Option<i64>,
    #[serde(default = "default_article_status")]
    pub status: String,
    pub author_id: Option<i64>,
}

impl Validate for CreateArticle {
    fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        errors.require("title", &self.title);
        errors.require("content", &self.content);
        check_slug(&mut errors, &self.slug);
        check_status(&mut errors, &self.status, ARTICLE_STATUSES);
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateArticle {
    pub title: Option<String>,
    pub slug: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub excerpt: Option<Option<String>>,
    pub content: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub category_id: Option<Option<i64>>,
    pub status: Option<String>,
}

impl Validate for UpdateArticle {
    fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if let Some(title) = &self.title {
            errors.require("title", title);
        }
        if let Some(content) = &self.content {
            errors.require("content", content);
        }
        if let Some(slug) = &self.slug {
            errors.require("slug", slug);
            check_slug(&mut errors, slug);
        }
        if let Some(status) = &self.status {
            check_status(&mut errors, status, ARTICLE_STATUSES);
        }
        errors
    }
}

impl Entity for Article {
    type Create = CreateArticle;
    type Update = UpdateArticle;

    const RESOURCE: &'static str = "articles";
    const SORTABLE: &'static [&'static str] =
        &["id", "title", "status", "publishedAt", "createdAt", "updatedAt"];
    const FILTERABLE: &'static [(&'static str, FieldKind)] = &[
        ("status", FieldKind::Text),
        ("categoryId", FieldKind::Int),
        ("authorId", FieldKind::Int),
    ];

    fn id(&self) -> i64 {
        self.id
    }

    fn from_create(id: i64, payload: CreateArticle, now: DateTime<Utc>) -> Result<Self, ModelError> {
        let published_at = (payload.status == "published").then_some(now);
        Ok(Self {
            id,
            title: payload.title,
            slug: payload.slug,
            excerpt: blank_to_none(payload.excerpt),
            content: payload.content,
            category_id: payload.category_id,
            status: payload.status,
            author_id: payload.author_id,
            published_at,
            created_at: now,
            updated_at: now,
        })
    }

    fn apply_update(&mut self, payload: UpdateArticle, now: DateTime<Utc>) -> Result<(), ModelError> {
        if let Some(title) = payload.title {
            self.title = title;
        }
        if let Some(slug) = payload.slug {
            self.slug = slug;
        }
        if let Some(excerpt) = payload.excerpt {
            self.excerpt = blank_to_none(excerpt);
        }
        if let Some(content) = payload.content {
            self.content = content;
        }
        if let Some(category_id) = payload.category_id {
            self.category_id = category_id;
        }
        if let Some(status) = payload.status {
            if status == "published" && self.published_at.is_none() {
                self.published_at = Some(now);
            }
            self.status = status;
        }
        self.updated_at = now;
        Ok(())
    }

    fn search_text(&self) -> Vec<&str> {
        let mut text = vec![self.title.as_str(), self.content.as_str()];
        text.extend(self.excerpt.as_deref());
        text
    }

    fn field(&self, name: &str) -> FieldValue {
        match name {
            "id" => FieldValue::Int(self.id),
            "title" => FieldValue::text(&self.title),
            "status" => FieldValue::text(&self.status),
            "categoryId" => FieldValue::optional_int(self.category_id),
            "authorId" => FieldValue::optional_int(self.author_id),
            "publishedAt" => FieldValue::optional_time(self.published_at),
            "createdAt" => FieldValue::Time(self.created_at),
            "updatedAt" => FieldValue::Time(self.updated_at),
            _ => FieldValue::Null,
        }
    }

    fn references(&self) -> Vec<(&'static str, &'static str, i64)> {
        let mut references = Vec::new();
        if let Some(category_id) = self.category_id {
            references.push(("categoryId", "categories", category_id));
        }
        if let Some(author_id) = self.author_id {
            references.push(("authorId", "users", author_id));
        }
        references
    }

    fn detach(&mut self, resource: &str, id: i64) -> bool {
        let link = match resource {
            "categories" => &mut self.category_id,
            "users" => &mut self.author_id,
            _ => return false,
        };
        if *link != Some(id) {
            return false;
        }
        *link = None;
        true
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![("slug", self.slug.clone())]
    }
}

// Reservations

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: i64,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub service: String,
    pub staff: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.starts_at + chrono::Duration::minutes(i64::from(self.duration_minutes))
    }
}

fn default_duration() -> i32 {
    60
}

fn default_reservation_status() -> String {
    "pending".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservation {
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub customer_email: String,
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub service: String,
    pub staff: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default = "default_duration")]
    pub duration_minutes: i32,
    #[serde(default = "default_reservation_status")]
    pub status: String,
    pub notes: Option<String>,
}

fn check_duration(errors: &mut FieldErrors, minutes: i32) {
    if !DURATION_MINUTES.contains(&minutes) {
        errors.add("durationMinutes", "durationMinutes must be between 5 and 480");
    }
}

impl Validate for CreateReservation {
    fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        errors.require("customerName", &self.customer_name);
        check_email(&mut errors, "customerEmail", &self.customer_email);
        errors.require("service", &self.service);
        if self.starts_at.is_none() {
            errors.add("startsAt", "startsAt is required");
        }
        check_duration(&mut errors, self.duration_minutes);
        check_status(&mut errors, &self.status, RESERVATION_STATUSES);
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReservation {
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub customer_phone: Option<Option<String>>,
    pub service: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub staff: Option<Option<String>>,
    pub starts_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub notes: Option<Option<String>>,
}

impl Validate for UpdateReservation {
    fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if let Some(name) = &self.customer_name {
            errors.require("customerName", name);
        }
        if let Some(email) = &self.customer_email {
            check_email(&mut errors, "customerEmail", email);
        }
        if let Some(service) = &self.service {
            errors.require("service", service);
        }
        if let Some(minutes) = self.duration_minutes {
            check_duration(&mut errors, minutes);
        }
        if let Some(status) = &self.status {
            check_status(&mut errors, status, RESERVATION_STATUSES);
        }
        errors
    }
}

impl Entity for Reservation {
    type Create = CreateReservation;
    type Update = UpdateReservation;

    const RESOURCE: &'static str = "reservations";
    const SORTABLE: &'static [&'static str] =
        &["id", "startsAt", "customerName", "status", "createdAt"];
    const FILTERABLE: &'static [(&'static str, FieldKind)] = &[
        ("status", FieldKind::Text),
        ("service", FieldKind::Text),
        ("staff", FieldKind::Text),
        ("startsAt", FieldKind::Date),
    ];
    const DEFAULT_SORT: &'static str = "startsAt";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_create(id: i64, payload: CreateReservation, now: DateTime<Utc>) -> Result<Self, ModelError> {
        let starts_at = payload
            .starts_at
            .ok_or_else(|| validation("startsAt", "startsAt is required"))?;
        Ok(Self {
            id,
            customer_name: payload.customer_name,
            customer_email: payload.customer_email.trim().to_lowercase(),
            customer_phone: blank_to_none(payload.customer_phone),
            service: payload.service,
            staff: blank_to_none(payload.staff),
            starts_at,
            duration_minutes: payload.duration_minutes,
            status: payload.status,
            notes: blank_to_none(payload.notes),
            created_at: now,
            updated_at: now,
        })
    }

    fn apply_update(&mut self, payload: UpdateReservation, now: DateTime<Utc>) -> Result<(), ModelError> {
        if let Some(name) = payload.customer_name {
            self.customer_name = name;
        }
        if let Some(email) = payload.customer_email {
            self.customer_email = email.trim().to_lowercase();
        }
        if let Some(phone) = payload.customer_phone {
            self.customer_phone = blank_to_none(phone);
        }
        if let Some(service) = payload.service {
            self.service = service;
        }
        if let Some(staff) = payload.staff {
            self.staff = blank_to_none(staff);
        }
        if let Some(starts_at) = payload.starts_at {
            self.starts_at = starts_at;
        }
        if let Some(minutes) = payload.duration_minutes {
            self.duration_minutes = minutes;
        }
        if let Some(status) = payload.status {
            self.status = status;
        }
        if let Some(notes) = payload.notes {
            self.notes = blank_to_none(notes);
        }
        self.updated_at = now;
        Ok(())
    }

    fn search_text(&self) -> Vec<&str> {
        let mut text = vec![
            self.customer_name.as_str(),
            self.customer_email.as_str(),
            self.service.as_str(),
        ];
        text.extend(self.customer_phone.as_deref());
        text.extend(self.staff.as_deref());
        text
    }

    fn field(&self, name: &str) -> FieldValue {
        match name {
            "id" => FieldValue::Int(self.id),
            "startsAt" => FieldValue::Time(self.starts_at),
            "customerName" => FieldValue::text(&self.customer_name),
            "status" => FieldValue::text(&self.status),
            "service" => FieldValue::text(&self.service),
            "staff" => self.staff.as_deref().map_or(FieldValue::Null, FieldValue::text),
            "createdAt" => FieldValue::Time(self.created_at),
            _ => FieldValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("Hair & Beauty", "hair-beauty")]
    #[case("  Summer Colour 2026! ", "summer-colour-2026")]
    #[case("---", "")]
    #[case("Ünïcode Cut", "n-code-cut")]
    fn slugify_produces_dashed_lowercase(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(slugify(input), expected);
    }

    #[test]
    fn create_user_requires_fields() {
        let payload: CreateUser = serde_json::from_value(serde_json::json!({})).unwrap();
        let errors = payload.validate();
        assert_eq!(errors.get("email"), Some("email is required"));
        assert_eq!(errors.get("name"), Some("name is required"));
        assert!(errors.get("password").is_some());
        assert!(errors.get("role").is_none());
    }

    #[test]
    fn create_user_rejects_malformed_permissions() {
        let payload: CreateUser = serde_json::from_value(serde_json::json!({
            "email": "a@b.co",
            "name": "A",
            "password": "long-enough",
            "permissions": ["users.read", "everything"]
        }))
        .unwrap();
        let errors = payload.validate();
        assert!(errors.get("permissions").unwrap().contains("everything"));
    }

    #[test]
    fn user_digest_is_never_serialized() {
        let now = Utc::now();
        let payload: CreateUser = serde_json::from_value(serde_json::json!({
            "email": " Admin@Example.com ",
            "name": "Admin",
            "password": "admin123"
        }))
        .unwrap();
        let user = UserRecord::from_create(1, payload, now).unwrap();
        assert_eq!(user.email, "admin@example.com");
        let body = serde_json::to_value(&user).unwrap();
        assert!(body.get("digest").is_none());
        assert_eq!(body["createdAt"], serde_json::to_value(now).unwrap());
    }

    #[test]
    fn category_cannot_parent_itself() {
        let now = Utc::now();
        let mut category = Category::from_create(
            4,
            CreateCategory {
                name: "Hair".into(),
                slug: "hair".into(),
                ..Default::default()
            },
            now,
        )
        .unwrap();
        let update: UpdateCategory =
            serde_json::from_value(serde_json::json!({ "parentId": 4 })).unwrap();
        assert!(matches!(
            category.apply_update(update, now),
            Err(ModelError::Validation(_))
        ));
    }

    #[test]
    fn explicit_null_clears_nullable_field() {
        let update: UpdateCategory =
            serde_json::from_value(serde_json::json!({ "parentId": null })).unwrap();
        assert_eq!(update.parent_id, Some(None));
        let update: UpdateCategory = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(update.parent_id, None);
    }

    #[test]
    fn publishing_stamps_published_at_once() {
        let created = Utc::now();
        let payload: CreateArticle = serde_json::from_value(serde_json::json!({
            "title": "Spring offers",
            "content": "..."
        }))
        .unwrap();
        let mut article = Article::from_create(1, payload, created).unwrap();
        assert_eq!(article.status, "draft");
        assert!(article.published_at.is_none());

        let published = created + chrono::Duration::minutes(5);
        article
            .apply_update(
                UpdateArticle {
                    status: Some("published".into()),
                    ..Default::default()
                },
                published,
            )
            .unwrap();
        assert_eq!(article.published_at, Some(published));

        let later = published + chrono::Duration::minutes(5);
        article
            .apply_update(
                UpdateArticle {
                    status: Some("published".into()),
                    ..Default::default()
                },
                later,
            )
            .unwrap();
        assert_eq!(article.published_at, Some(published));
    }

    #[test]
    fn reservation_validation() {
        let payload: CreateReservation = serde_json::from_value(serde_json::json!({
            "customerName": "Mia",
            "customerEmail": "not-an-email",
            "service": "Cut",
            "durationMinutes": 2,
            "status": "maybe"
        }))
        .unwrap();
        let errors = payload.validate();
        assert!(errors.get("customerEmail").is_some());
        assert_eq!(errors.get("startsAt"), Some("startsAt is required"));
        assert!(errors.get("durationMinutes").is_some());
        assert!(errors.get("status").is_some());
    }

    #[test]
    fn reservation_end_follows_duration() {
        let starts_at = Utc::now();
        let payload = CreateReservation {
            customer_name: "Mia".into(),
            customer_email: "mia@example.com".into(),
            customer_phone: None,
            service: "Cut".into(),
            staff: Some("  ".into()),
            starts_at: Some(starts_at),
            duration_minutes: 45,
            status: "pending".into(),
            notes: None,
        };
        let reservation = Reservation::from_create(1, payload, starts_at).unwrap();
        assert_eq!(reservation.ends_at() - starts_at, chrono::Duration::minutes(45));
        assert!(reservation.staff.is_none());
    }
}
