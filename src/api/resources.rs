use std::{collections::BTreeMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{OriginalUri, Path, Query},
    http::Method,
    response::{IntoResponse, Response},
    routing::any,
    Extension, Router,
};

use crate::{
    crud::{CrudRequest, Outcome, Resource},
    extract::{Authenticated, Maybe},
    model::Entity,
    utility::{action, ApiResult},
};

/// Mounts `/{resource}` and everything below it on a single dispatcher.
pub fn controllers<E: Entity>(resource: Resource<E>) -> Router {
    let root = format!("/{}", E::RESOURCE);
    let nested = format!("/{}/*rest", E::RESOURCE);
    Router::new()
        .route(&root, any(dispatch::<E>))
        .route(&nested, any(dispatch::<E>))
        .layer(Extension(Arc::new(resource)))
}

async fn dispatch<E: Entity>(
    Extension(resource): Extension<Arc<Resource<E>>>,
    Maybe(user): Maybe<Authenticated>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    rest: Option<Path<String>>,
    params: Option<Query<BTreeMap<String, String>>>,
    body: Bytes,
) -> ApiResult<Response> {
    let rest = rest.map(|Path(rest)| rest).unwrap_or_default();
    let params = params.map(|Query(params)| params).unwrap_or_default();
    let request = CrudRequest::new(method, &rest)
        .with_params(params)
        .with_body(body);

    let user = user.map(|Authenticated(user)| user);
    Ok(match resource.handle(request, user.as_ref()).await? {
        Outcome::List(page, meta) => action::List(page, meta).into_response(),
        Outcome::Show(record) => action::Show(record).into_response(),
        Outcome::Created(record) => {
            let id = record.id();
            action::Create(record, uri.path().to_string(), id).into_response()
        }
        Outcome::Updated(record) => action::Update(record).into_response(),
        Outcome::Deleted(deleted) => action::Delete(deleted).into_response(),
    })
}
