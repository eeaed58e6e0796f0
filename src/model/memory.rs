use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use axum::async_trait;
use chrono::Utc;

use super::{Deleted, Entity, Model, ModelError, Page, UserDirectory};
use crate::{entities::UserRecord, error::FieldErrors, query::{ListQuery, SortOrder}};

struct Table<E> {
    rows: BTreeMap<i64, E>,
    next_id: i64,
}

/// A process-local table owned by whoever constructs it.
pub struct MemoryModel<E> {
    table: Mutex<Table<E>>,
    links: Mutex<Vec<Weak<dyn Linked>>>,
}

/// The view one in-memory table has of another it references or is referenced by.
pub trait Linked: Send + Sync {
    fn resource(&self) -> &'static str;

    fn contains(&self, id: i64) -> bool;

    /// Nulls every link to the deleted record `id` of `resource`.
    fn detach(&self, resource: &str, id: i64);
}

impl<E: Entity> Linked for MemoryModel<E> {
    fn resource(&self) -> &'static str {
        E::RESOURCE
    }

    fn contains(&self, id: i64) -> bool {
        self.table().rows.contains_key(&id)
    }

    fn detach(&self, resource: &str, id: i64) {
        for row in self.table().rows.values_mut() {
            row.detach(resource, id);
        }
    }
}

impl<E: Entity> Default for MemoryModel<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> MemoryModel<E> {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                rows: BTreeMap::new(),
                next_id: 1,
            }),
            links: Mutex::new(Vec::new()),
        }
    }

    /// Registers another table this one references or is referenced by.
    pub fn link<L: Linked + 'static>(&self, other: &Arc<L>) {
        let other: Weak<dyn Linked> = Arc::downgrade(other) as Weak<L>;
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(other);
    }

    fn linked(&self) -> Vec<Arc<dyn Linked>> {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Runs before this table's own lock is taken, so two tables never lock each other.
    fn check_references(&self, record: &E) -> Result<(), ModelError> {
        let linked = self.linked();
        let mut errors = FieldErrors::new();
        for (field, resource, id) in record.references() {
            let target = linked.iter().find(|table| table.resource() == resource);
            if let Some(table) = target {
                if !table.contains(id) {
                    errors.add(field, format!("{} {} does not exist", resource, id));
                }
            }
        }
        errors.into_result().map_err(ModelError::Validation)
    }

    fn table(&self) -> MutexGuard<'_, Table<E>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reserve_id(&self) -> i64 {
        let mut table = self.table();
        let id = table.next_id;
        table.next_id += 1;
        id
    }
}

fn check_constraints<E: Entity>(rows: &BTreeMap<i64, E>, record: &E) -> Result<(), ModelError> {
    for (field, value) in record.unique_keys() {
        if value.is_empty() {
            continue;
        }
        let taken = rows.values().any(|other| {
            other.id() != record.id()
                && other
                    .unique_keys()
                    .iter()
                    .any(|(other_field, other_value)| *other_field == field && *other_value == value)
        });
        if taken {
            return Err(ModelError::Conflict(format!("{} {} is already taken", field, value)));
        }
    }

    if let Some(parent_id) = record.parent_id() {
        let mut seen = HashSet::new();
        let mut cursor = Some(parent_id);
        while let Some(current) = cursor {
            if current == record.id() {
                return Err(ModelError::Validation(FieldErrors::single(
                    "parentId",
                    "parent chain would form a cycle",
                )));
            }
            if !seen.insert(current) {
                break;
            }
            cursor = match rows.get(&current) {
                Some(row) => row.parent_id(),
                None if current == parent_id => {
                    return Err(ModelError::Validation(FieldErrors::single(
                        "parentId",
                        "parent record does not exist",
                    )))
                }
                None => None,
            };
        }
    }

    Ok(())
}

fn matches<E: Entity>(record: &E, query: &ListQuery, needle: Option<&str>) -> bool {
    let filtered = query.filters.iter().all(|(field, raw)| {
        E::filter_kind(field).map_or(false, |kind| record.field(field).matches(kind, raw))
    });
    filtered
        && needle.map_or(true, |needle| {
            record
                .search_text()
                .iter()
                .any(|text| text.to_lowercase().contains(needle))
        })
}

#[async_trait]
impl<E: Entity> Model<E> for MemoryModel<E> {
    async fn find_many(&self, query: &ListQuery) -> Result<Page<E>, ModelError> {
        let needle = query.search.as_ref().map(|search| search.to_lowercase());
        let sort_by = query.sort_field::<E>();

        let mut matched: Vec<E> = self
            .table()
            .rows
            .values()
            .filter(|record| matches(*record, query, needle.as_deref()))
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            let by_field = a.field(sort_by).cmp(&b.field(sort_by));
            let by_field = match query.sort_order {
                SortOrder::Asc => by_field,
                SortOrder::Desc => by_field.reverse(),
            };
            by_field.then_with(|| a.id().cmp(&b.id()))
        });

        let total = matched.len() as i64;
        let data = matched
            .into_iter()
            .skip(query.offset().max(0) as usize)
            .take(query.limit.max(1) as usize)
            .collect();

        Ok(Page { data, total })
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<E>, ModelError> {
        Ok(self.table().rows.get(&id).cloned())
    }

    async fn create(&self, payload: E::Create) -> Result<E, ModelError> {
        let id = self.reserve_id();
        let record = E::from_create(id, payload, Utc::now())?;
        self.check_references(&record)?;

        let mut table = self.table();
        check_constraints(&table.rows, &record)?;
        table.rows.insert(id, record.clone());
        Ok(record)
    }

    async fn update(&self, id: i64, payload: E::Update) -> Result<E, ModelError> {
        let mut record = self.table().rows.get(&id).cloned().ok_or(ModelError::NotFound)?;
        record.apply_update(payload, Utc::now())?;
        self.check_references(&record)?;

        let mut table = self.table();
        if !table.rows.contains_key(&id) {
            return Err(ModelError::NotFound);
        }
        check_constraints(&table.rows, &record)?;
        table.rows.insert(id, record.clone());
        Ok(record)
    }

    async fn delete(&self, id: i64) -> Result<Deleted, ModelError> {
        {
            let mut table = self.table();
            if !table.rows.contains_key(&id) {
                return Err(ModelError::NotFound);
            }
            if table.rows.values().any(|row| row.parent_id() == Some(id)) {
                return Err(ModelError::Conflict(format!(
                    "Cannot delete: {} {} has dependent records",
                    E::RESOURCE,
                    id
                )));
            }
            table.rows.remove(&id);
        }

        for other in self.linked() {
            other.detach(E::RESOURCE, id);
        }
        Ok(Deleted { id, deleted: true })
    }
}

#[async_trait]
impl UserDirectory for MemoryModel<UserRecord> {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, ModelError> {
        let email = email.trim().to_lowercase();
        Ok(self
            .table()
            .rows
            .values()
            .find(|user| user.email == email)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Category, CreateArticle, CreateCategory, UpdateCategory, Article};

    fn category(name: &str, parent_id: Option<i64>) -> CreateCategory {
        CreateCategory {
            name: name.to_string(),
            slug: crate::entities::slugify(name),
            description: None,
            parent_id,
        }
    }

    fn article(title: &str, status: &str) -> CreateArticle {
        CreateArticle {
            title: title.to_string(),
            slug: crate::entities::slugify(title),
            excerpt: None,
            content: format!("All about {}", title),
            category_id: None,
            status: status.to_string(),
            author_id: Some(1),
        }
    }

    async fn articles(count: usize) -> MemoryModel<Article> {
        let model = MemoryModel::new();
        for n in 0..count {
            let status = if n % 2 == 0 { "published" } else { "draft" };
            model.create(article(&format!("Article {}", n), status)).await.unwrap();
        }
        model
    }

    #[tokio::test]
    async fn create_then_find_round_trips() {
        let model = MemoryModel::<Category>::new();
        let created = model.create(category("Hair Care", None)).await.unwrap();
        let found = model.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(found, created);
        assert_eq!(found.name, "Hair Care");
        assert_eq!(found.slug, "hair-care");
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let model = MemoryModel::<Category>::new();
        let a = model.create(category("A", None)).await.unwrap();
        model.delete(a.id).await.unwrap();
        let b = model.create(category("B", None)).await.unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn pages_respect_limit_and_total() {
        let model = articles(23).await;
        for limit in [1, 5, 10, 23, 50] {
            let mut seen = 0;
            let mut page = 1;
            loop {
                let query = ListQuery { page, limit, ..ListQuery::default() };
                let result = model.find_many(&query).await.unwrap();
                assert_eq!(result.total, 23);
                assert!((result.data.len() as i64) <= limit);
                if result.data.is_empty() {
                    break;
                }
                seen += result.data.len();
                page += 1;
            }
            assert_eq!(seen, 23);
        }
    }

    #[tokio::test]
    async fn identical_queries_are_stable() {
        let model = articles(9).await;
        let query = ListQuery {
            sort_by: Some("status".into()),
            sort_order: SortOrder::Desc,
            ..ListQuery::default()
        };
        let first = model.find_many(&query).await.unwrap();
        let second = model.find_many(&query).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.data[0].status, "published");
        let published: Vec<i64> = first
            .data
            .iter()
            .filter(|a| a.status == "published")
            .map(|a| a.id)
            .collect();
        let mut sorted = published.clone();
        sorted.sort();
        assert_eq!(published, sorted);
    }

    #[tokio::test]
    async fn filters_and_search_narrow_total() {
        let model = articles(10).await;
        let mut query = ListQuery::default();
        query.filters.insert("status".into(), "draft".into());
        let drafts = model.find_many(&query).await.unwrap();
        assert_eq!(drafts.total, 5);
        assert!(drafts.data.iter().all(|a| a.status == "draft"));

        let query = ListQuery {
            search: Some("ARTICLE 7".into()),
            ..ListQuery::default()
        };
        let found = model.find_many(&query).await.unwrap();
        assert_eq!(found.total, 1);
        assert_eq!(found.data[0].title, "Article 7");
    }

    #[tokio::test]
    async fn null_filter_selects_roots() {
        let model = MemoryModel::<Category>::new();
        let root = model.create(category("Root", None)).await.unwrap();
        model.create(category("Child", Some(root.id))).await.unwrap();
        let mut query = ListQuery::default();
        query.filters.insert("parentId".into(), "null".into());
        let roots = model.find_many(&query).await.unwrap();
        assert_eq!(roots.total, 1);
        assert_eq!(roots.data[0].id, root.id);
    }

    #[tokio::test]
    async fn second_delete_is_not_found() {
        let model = MemoryModel::<Category>::new();
        let created = model.create(category("Nails", None)).await.unwrap();
        let deleted = model.delete(created.id).await.unwrap();
        assert_eq!(deleted, Deleted { id: created.id, deleted: true });
        assert!(matches!(model.delete(created.id).await, Err(ModelError::NotFound)));
    }

    #[tokio::test]
    async fn parent_with_children_cannot_be_deleted() {
        let model = MemoryModel::<Category>::new();
        let parent = model.create(category("Hair", None)).await.unwrap();
        model.create(category("Colour", Some(parent.id))).await.unwrap();

        assert!(matches!(model.delete(parent.id).await, Err(ModelError::Conflict(_))));
        assert!(model.find_by_id(parent.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_parent_is_rejected() {
        let model = MemoryModel::<Category>::new();
        let result = model.create(category("Orphan", Some(99))).await;
        assert!(matches!(result, Err(ModelError::Validation(_))));
    }

    #[tokio::test]
    async fn parent_cycles_are_rejected() {
        let model = MemoryModel::<Category>::new();
        let a = model.create(category("A", None)).await.unwrap();
        let b = model.create(category("B", Some(a.id))).await.unwrap();
        let update = UpdateCategory {
            parent_id: Some(Some(b.id)),
            ..Default::default()
        };
        assert!(matches!(model.update(a.id, update).await, Err(ModelError::Validation(_))));
        assert_eq!(model.find_by_id(a.id).await.unwrap().unwrap().parent_id, None);
    }

    #[tokio::test]
    async fn duplicate_slug_conflicts() {
        let model = MemoryModel::<Category>::new();
        model.create(category("Spa", None)).await.unwrap();
        assert!(matches!(
            model.create(category("Spa", None)).await,
            Err(ModelError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn update_of_missing_record_is_not_found() {
        let model = MemoryModel::<Category>::new();
        let result = model.update(42, UpdateCategory::default()).await;
        assert!(matches!(result, Err(ModelError::NotFound)));
    }

    #[tokio::test]
    async fn directory_finds_users_case_insensitively() {
        let model = MemoryModel::<UserRecord>::new();
        let payload: crate::entities::CreateUser = serde_json::from_value(serde_json::json!({
            "email": "owner@example.com",
            "name": "Owner",
            "password": "owner-pass"
        }))
        .unwrap();
        model.create(payload).await.unwrap();
        let found = model.find_by_email(" OWNER@example.com").await.unwrap();
        assert_eq!(found.unwrap().name, "Owner");
        assert!(model.find_by_email("nobody@example.com").await.unwrap().is_none());
    }
}
