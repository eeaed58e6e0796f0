use std::sync::Arc;

use axum::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    config,
    crud::Interceptor,
    entities::{
        slugify, Article, Category, CreateArticle, CreateCategory, CreateReservation, Reservation,
        UpdateReservation, User, MAX_DURATION_MINUTES,
    },
    error::ApiError,
    model::{Deleted, Entity, Model},
    query::ListQuery,
};

/// Logs every write with the acting user.
pub struct AuditTrail;

#[async_trait]
impl<E: Entity> Interceptor<E> for AuditTrail {
    async fn after_create(&self, user: &User, record: &E) -> Result<(), ApiError> {
        tracing::info!(resource = E::RESOURCE, id = record.id(), user_id = user.id, "created");
        Ok(())
    }

    async fn after_update(&self, user: &User, record: &E) -> Result<(), ApiError> {
        tracing::info!(resource = E::RESOURCE, id = record.id(), user_id = user.id, "updated");
        Ok(())
    }

    async fn after_delete(&self, user: &User, deleted: &Deleted) -> Result<(), ApiError> {
        tracing::info!(resource = E::RESOURCE, id = deleted.id, user_id = user.id, "deleted");
        Ok(())
    }
}

/// Fills in slugs from titles/names and the author of new articles.
pub struct Slugs;

#[async_trait]
impl Interceptor<Article> for Slugs {
    async fn before_create(
        &self,
        user: &User,
        mut payload: CreateArticle,
    ) -> Result<CreateArticle, ApiError> {
        if payload.slug.is_empty() {
            payload.slug = slugify(&payload.title);
        }
        if payload.author_id.is_none() {
            payload.author_id = Some(user.id);
        }
        Ok(payload)
    }
}

#[async_trait]
impl Interceptor<Category> for Slugs {
    async fn before_create(
        &self,
        _user: &User,
        mut payload: CreateCategory,
    ) -> Result<CreateCategory, ApiError> {
        if payload.slug.is_empty() {
            payload.slug = slugify(&payload.name);
        }
        Ok(payload)
    }
}

/// Refuses bookings that overlap another active booking of the same staff member.
pub struct BookingConflicts {
    reservations: Arc<dyn Model<Reservation>>,
}

struct Slot<'a> {
    id: Option<i64>,
    staff: &'a str,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
}

fn is_active(status: &str) -> bool {
    status != "cancelled"
}

impl BookingConflicts {
    pub fn new(reservations: Arc<dyn Model<Reservation>>) -> Self {
        Self { reservations }
    }

    /// Any booking overlapping the slot starts no earlier than the longest
    /// allowed booking before it, so every start date in that window is scanned.
    async fn check(&self, slot: Slot<'_>) -> Result<(), ApiError> {
        let earliest = slot.starts_at - chrono::Duration::minutes(i64::from(MAX_DURATION_MINUTES));
        let mut date = earliest.date_naive();
        while date <= slot.ends_at.date_naive() {
            self.check_day(&slot, date).await?;
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        Ok(())
    }

    async fn check_day(&self, slot: &Slot<'_>, date: NaiveDate) -> Result<(), ApiError> {
        let mut query = ListQuery {
            limit: config::PAGINATION_MAX_LIMIT,
            ..ListQuery::default()
        };
        query.filters.insert("staff".into(), slot.staff.to_string());
        query.filters.insert("startsAt".into(), date.to_string());

        loop {
            let page = self.reservations.find_many(&query).await?;
            let clash = page.data.iter().find(|other| {
                Some(other.id) != slot.id
                    && is_active(&other.status)
                    && other.starts_at < slot.ends_at
                    && slot.starts_at < other.ends_at()
            });
            if let Some(other) = clash {
                return Err(ApiError::Conflict(format!(
                    "{} is already booked at {} (reservation {})",
                    slot.staff,
                    other.starts_at.format("%Y-%m-%d %H:%M"),
                    other.id
                )));
            }
            if query.is_last_page(page.total) {
                return Ok(());
            }
            query.page += 1;
        }
    }
}

#[async_trait]
impl Interceptor<Reservation> for BookingConflicts {
    async fn before_create(
        &self,
        _user: &User,
        payload: CreateReservation,
    ) -> Result<CreateReservation, ApiError> {
        if let (Some(staff), Some(starts_at)) = (payload.staff.as_deref(), payload.starts_at) {
            if is_active(&payload.status) && !staff.trim().is_empty() {
                self.check(Slot {
                    id: None,
                    staff,
                    starts_at,
                    ends_at: starts_at
                        + chrono::Duration::minutes(i64::from(payload.duration_minutes)),
                })
                .await?;
            }
        }
        Ok(payload)
    }

    async fn before_update(
        &self,
        _user: &User,
        id: i64,
        payload: UpdateReservation,
    ) -> Result<UpdateReservation, ApiError> {
        let Some(current) = self.reservations.find_by_id(id).await? else {
            return Ok(payload);
        };

        let staff = match &payload.staff {
            Some(staff) => staff.clone(),
            None => current.staff.clone(),
        };
        let status = payload.status.as_deref().unwrap_or(&current.status);
        let starts_at = payload.starts_at.unwrap_or(current.starts_at);
        let minutes = payload.duration_minutes.unwrap_or(current.duration_minutes);

        if let Some(staff) = staff.as_deref().filter(|s| !s.trim().is_empty()) {
            if is_active(status) {
                self.check(Slot {
                    id: Some(id),
                    staff,
                    starts_at,
                    ends_at: starts_at + chrono::Duration::minutes(i64::from(minutes)),
                })
                .await?;
            }
        }
        Ok(payload)
    }
}

/// Emits the booking notice for new and changed reservations.
pub struct ReservationNotices;

#[async_trait]
impl Interceptor<Reservation> for ReservationNotices {
    async fn after_create(&self, _user: &User, record: &Reservation) -> Result<(), ApiError> {
        tracing::info!(
            reservation_id = record.id,
            customer = %record.customer_email,
            starts_at = %record.starts_at,
            "booking notice queued for new reservation"
        );
        Ok(())
    }

    async fn after_update(&self, _user: &User, record: &Reservation) -> Result<(), ApiError> {
        tracing::info!(
            reservation_id = record.id,
            customer = %record.customer_email,
            status = %record.status,
            "booking notice queued for reservation change"
        );
        Ok(())
    }
}
