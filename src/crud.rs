//! Generic create/read/update/delete dispatch over any [`Model`].
//!
//! [`Resource::handle`] is a plain function of the request and the caller:
//! nothing persists between calls except what the model's store holds.
//!
//! Interceptors run in registration order. Validation and `before_*` hooks
//! may reject or rewrite a write; their first error aborts it before the model
//! is touched. `after_*` hooks observe a write that has already happened, so
//! their errors are logged and otherwise ignored.

use std::{collections::BTreeMap, sync::Arc};

use axum::{async_trait, body::Bytes, http::Method};
use serde::de::DeserializeOwned;

use crate::{
    entities::User,
    error::{ApiError, FieldErrors},
    model::{Deleted, Entity, Model, Page, Validate},
    permission::{self, Action},
    query::ListQuery,
    utility::PaginationMeta,
};

#[async_trait]
pub trait Interceptor<E: Entity>: Send + Sync {
    fn validate_create(&self, _payload: &E::Create) -> FieldErrors {
        FieldErrors::new()
    }

    fn validate_update(&self, _id: i64, _payload: &E::Update) -> FieldErrors {
        FieldErrors::new()
    }

    async fn before_create(&self, _user: &User, payload: E::Create) -> Result<E::Create, ApiError> {
        Ok(payload)
    }

    async fn after_create(&self, _user: &User, _record: &E) -> Result<(), ApiError> {
        Ok(())
    }

    async fn before_update(
        &self,
        _user: &User,
        _id: i64,
        payload: E::Update,
    ) -> Result<E::Update, ApiError> {
        Ok(payload)
    }

    async fn after_update(&self, _user: &User, _record: &E) -> Result<(), ApiError> {
        Ok(())
    }

    async fn before_delete(&self, _user: &User, _id: i64) -> Result<(), ApiError> {
        Ok(())
    }

    async fn after_delete(&self, _user: &User, _deleted: &Deleted) -> Result<(), ApiError> {
        Ok(())
    }
}

/// A request reduced to what the dispatcher looks at.
#[derive(Debug, Clone)]
pub struct CrudRequest {
    pub method: Method,
    /// Path segments below the resource root, e.g. `["12"]`.
    pub segments: Vec<String>,
    pub params: BTreeMap<String, String>,
    pub body: Bytes,
}

impl CrudRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            segments: path
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
            params: BTreeMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

#[derive(Debug)]
pub enum Outcome<E> {
    List(Page<E>, PaginationMeta),
    Show(E),
    Created(E),
    Updated(E),
    Deleted(Deleted),
}

pub struct Resource<E: Entity> {
    model: Arc<dyn Model<E>>,
    interceptors: Vec<Arc<dyn Interceptor<E>>>,
}

fn action_for(method: &Method) -> Result<Action, ApiError> {
    match *method {
        Method::GET => Ok(Action::Read),
        Method::POST => Ok(Action::Create),
        Method::PUT | Method::PATCH => Ok(Action::Update),
        Method::DELETE => Ok(Action::Delete),
        _ => Err(ApiError::MethodNotAllowed),
    }
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::invalid("id", "id must be a positive integer"))
}

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    let value = if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::Value::Object(Default::default())
    } else {
        serde_json::from_slice(body)
            .map_err(|_| ApiError::invalid("body", "request body must be valid JSON"))?
    };
    if !value.is_object() {
        return Err(ApiError::invalid("body", "request body must be a JSON object"));
    }
    serde_json::from_value(value).map_err(|err| ApiError::invalid("body", err.to_string()))
}

impl<E: Entity> Resource<E> {
    pub fn new(model: Arc<dyn Model<E>>) -> Self {
        Self {
            model,
            interceptors: Vec::new(),
        }
    }

    pub fn with(mut self, interceptor: impl Interceptor<E> + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    #[cfg(test)]
    pub fn model(&self) -> &Arc<dyn Model<E>> {
        &self.model
    }

    pub async fn handle(
        &self,
        request: CrudRequest,
        user: Option<&User>,
    ) -> Result<Outcome<E>, ApiError> {
        let (raw_id, subaction) = match request.segments.as_slice() {
            [] => (None, None),
            [id] => (Some(id.as_str()), None),
            [id, sub] => (Some(id.as_str()), Some(sub.as_str())),
            _ => return Err(ApiError::NotFound("Not found".to_string())),
        };

        let action = action_for(&request.method)?;
        if action == Action::Create && raw_id.is_some() {
            return Err(ApiError::MethodNotAllowed);
        }

        let user = user.ok_or(ApiError::Unauthorized)?;
        if !permission::can(Some(user), action, E::RESOURCE) {
            tracing::debug!(
                user_id = user.id,
                "missing permission {}",
                permission::permission_key(E::RESOURCE, action)
            );
            return Err(ApiError::Forbidden);
        }

        if let Some(sub) = subaction {
            return Err(ApiError::NotFound(format!("Unknown action {}", sub)));
        }
        let id = raw_id.map(parse_id).transpose()?;

        match (action, id) {
            (Action::Read, None) => self.list(&request.params).await,
            (Action::Read, Some(id)) => self.show(id).await,
            (Action::Create, _) => self.create(user, &request.body).await,
            (Action::Update, Some(id)) => self.update(user, id, &request.body).await,
            (Action::Delete, Some(id)) => self.delete(user, id).await,
            (Action::Update | Action::Delete, None) => Err(ApiError::invalid("id", "id is required")),
        }
    }

    async fn list(&self, params: &BTreeMap<String, String>) -> Result<Outcome<E>, ApiError> {
        let query = ListQuery::from_params(params).map_err(ApiError::ValidationFailed)?;
        query
            .check_fields::<E>()
            .map_err(ApiError::ValidationFailed)?;

        let page = self.model.find_many(&query).await?;
        let meta = PaginationMeta::new(query.page, query.limit, page.total);
        Ok(Outcome::List(page, meta))
    }

    async fn show(&self, id: i64) -> Result<Outcome<E>, ApiError> {
        self.model
            .find_by_id(id)
            .await?
            .map(Outcome::Show)
            .ok_or_else(|| ApiError::NotFound(format!("{} {} not found", E::RESOURCE, id)))
    }

    async fn create(&self, user: &User, body: &Bytes) -> Result<Outcome<E>, ApiError> {
        let mut payload: E::Create = decode(body)?;

        let mut errors = payload.validate();
        for interceptor in &self.interceptors {
            errors.merge(interceptor.validate_create(&payload));
        }
        errors.into_result().map_err(ApiError::ValidationFailed)?;

        for interceptor in &self.interceptors {
            payload = interceptor.before_create(user, payload).await?;
        }

        let record = self.model.create(payload).await?;

        for interceptor in &self.interceptors {
            if let Err(err) = interceptor.after_create(user, &record).await {
                tracing::warn!(resource = E::RESOURCE, id = record.id(), "after_create hook failed: {}", err);
            }
        }
        Ok(Outcome::Created(record))
    }

    async fn update(&self, user: &User, id: i64, body: &Bytes) -> Result<Outcome<E>, ApiError> {
        let mut payload: E::Update = decode(body)?;

        let mut errors = payload.validate();
        for interceptor in &self.interceptors {
            errors.merge(interceptor.validate_update(id, &payload));
        }
        errors.into_result().map_err(ApiError::ValidationFailed)?;

        for interceptor in &self.interceptors {
            payload = interceptor.before_update(user, id, payload).await?;
        }

        let record = self.model.update(id, payload).await?;

        for interceptor in &self.interceptors {
            if let Err(err) = interceptor.after_update(user, &record).await {
                tracing::warn!(resource = E::RESOURCE, id, "after_update hook failed: {}", err);
            }
        }
        Ok(Outcome::Updated(record))
    }

    async fn delete(&self, user: &User, id: i64) -> Result<Outcome<E>, ApiError> {
        for interceptor in &self.interceptors {
            interceptor.before_delete(user, id).await?;
        }

        let deleted = self.model.delete(id).await?;

        for interceptor in &self.interceptors {
            if let Err(err) = interceptor.after_delete(user, &deleted).await {
                tracing::warn!(resource = E::RESOURCE, id, "after_delete hook failed: {}", err);
            }
        }
        Ok(Outcome::Deleted(deleted))
    }
}
