use std::collections::BTreeMap;

use crate::{
    config,
    error::FieldErrors,
    model::{Entity, FieldKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Request-scoped listing parameters.
///
/// `page` is at least 1 and `limit` lies in `1..=PAGINATION_MAX_LIMIT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub page: i64,
    pub limit: i64,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
    pub filters: BTreeMap<String, String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: config::PAGINATION_DEFAULT_LIMIT,
            search: None,
            sort_by: None,
            sort_order: SortOrder::Asc,
            filters: BTreeMap::new(),
        }
    }
}

fn parse_number(errors: &mut FieldErrors, field: &str, raw: Option<&String>) -> Option<i64> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<i64>() {
        Ok(value) => Some(value),
        Err(_) => {
            errors.add(field, format!("{} must be an integer", field));
            None
        }
    }
}

fn filter_key(param: &str) -> Option<&str> {
    param
        .strip_prefix("filter[")?
        .strip_suffix(']')
        .filter(|key| !key.is_empty())
}

impl ListQuery {
    /// Parses `page`, `limit`, `search`, `sortBy`, `sortOrder` and `filter[<key>]` parameters.
    /// Out-of-range numbers are clamped; malformed ones are rejected.
    pub fn from_params(params: &BTreeMap<String, String>) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::new();
        let mut query = Self::default();

        if let Some(page) = parse_number(&mut errors, "page", params.get("page")) {
            query.page = page.max(1);
        }
        if let Some(limit) = parse_number(&mut errors, "limit", params.get("limit")) {
            query.limit = limit.clamp(1, config::PAGINATION_MAX_LIMIT);
        }

        query.search = params
            .get("search")
            .map(|search| search.trim().to_string())
            .filter(|search| !search.is_empty());
        query.sort_by = params
            .get("sortBy")
            .map(|sort_by| sort_by.trim().to_string())
            .filter(|sort_by| !sort_by.is_empty());

        if let Some(order) = params.get("sortOrder") {
            match order.trim().to_ascii_lowercase().as_str() {
                "" | "asc" => query.sort_order = SortOrder::Asc,
                "desc" => query.sort_order = SortOrder::Desc,
                _ => errors.add("sortOrder", "sortOrder must be asc or desc"),
            }
        }

        for (param, value) in params {
            if let Some(key) = filter_key(param) {
                query.filters.insert(key.to_string(), value.trim().to_string());
            }
        }

        errors.into_result().map(|_| query)
    }

    /// Saturates instead of overflowing; a page past the end is simply empty.
    pub fn offset(&self) -> i64 {
        (self.page - 1).max(0).saturating_mul(self.limit.max(1))
    }

    /// Whether the page just read was the last one holding rows.
    pub fn is_last_page(&self, total: i64) -> bool {
        self.offset().saturating_add(self.limit) >= total
    }

    /// The sort field to apply, falling back to the entity's default.
    pub fn sort_field<E: Entity>(&self) -> &str {
        self.sort_by.as_deref().unwrap_or(E::DEFAULT_SORT)
    }

    /// Rejects sort and filter fields the entity does not expose, and filter
    /// values that cannot be compared against their field.
    pub fn check_fields<E: Entity>(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();

        if let Some(sort_by) = &self.sort_by {
            if !E::SORTABLE.contains(&sort_by.as_str()) {
                errors.add(
                    "sortBy",
                    format!("cannot sort {} by {}", E::RESOURCE, sort_by),
                );
            }
        }

        for (field, value) in &self.filters {
            let param = format!("filter[{}]", field);
            match E::filter_kind(field) {
                None => errors.add(param, format!("cannot filter {} by {}", E::RESOURCE, field)),
                Some(FieldKind::Int) if value != "null" && value.parse::<i64>().is_err() => {
                    errors.add(param, format!("{} must be an integer or null", field))
                }
                Some(FieldKind::Date)
                    if chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").is_err() =>
                {
                    errors.add(param, format!("{} must be a YYYY-MM-DD date", field))
                }
                Some(_) => {}
            }
        }

        errors.into_result()
    }
}
