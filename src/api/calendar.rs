use std::{collections::BTreeMap, sync::Arc};

use axum::{extract::Query, routing::get, Extension, Json, Router};
use chrono::{Datelike, Utc};

use super::AppState;
use crate::{
    calendar::{visible_range, MonthGrid},
    config,
    error::ApiError,
    extract::Authenticated,
    permission::{self, Action},
    query::ListQuery,
    utility::{ApiResult, Envelope},
};

pub fn controllers() -> Router {
    Router::new().route("/", get(month))
}

fn number<T: std::str::FromStr>(
    params: &BTreeMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ApiError> {
    match params.get(key).map(|raw| raw.trim()).filter(|raw| !raw.is_empty()) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::invalid(key, format!("{} must be a number", key))),
        None => Ok(default),
    }
}

async fn month(
    Extension(state): Extension<Arc<AppState>>,
    Authenticated(user): Authenticated,
    params: Option<Query<BTreeMap<String, String>>>,
) -> ApiResult<Json<Envelope<MonthGrid>>> {
    if !permission::can(Some(&user), Action::Read, "reservations") {
        return Err(ApiError::Forbidden);
    }

    let params = params.map(|Query(params)| params).unwrap_or_default();
    let today = Utc::now().date_naive();
    let year: i32 = number(&params, "year", today.year())?;
    let month: u32 = number(&params, "month", today.month())?;
    let (start, end) = visible_range(year, month)
        .ok_or_else(|| ApiError::invalid("month", "month must be between 1 and 12"))?;

    // Walk every page; the store has no range filter.
    let mut query = ListQuery {
        limit: config::PAGINATION_MAX_LIMIT,
        sort_by: Some("startsAt".to_string()),
        ..ListQuery::default()
    };
    let mut shown = Vec::new();
    loop {
        let page = state.stores.reservations.find_many(&query).await?;
        let exhausted = query.is_last_page(page.total);
        shown.extend(page.data.into_iter().filter(|reservation| {
            let day = reservation.starts_at.date_naive();
            start <= day && day <= end
        }));
        if exhausted {
            break;
        }
        query.page += 1;
    }

    let grid = MonthGrid::build(year, month, shown)
        .ok_or_else(|| ApiError::invalid("month", "month must be between 1 and 12"))?;
    Ok(Json(Envelope::ok(grid)))
}
