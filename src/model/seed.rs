use chrono::{Datelike, Duration, TimeZone, Utc};

use super::{ModelError, Stores};
use crate::{
    entities::{slugify, CreateArticle, CreateCategory, CreateReservation, CreateUser},
    permission::all_permissions,
};

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "admin123";
pub const EDITOR_EMAIL: &str = "editor@example.com";
pub const EDITOR_PASSWORD: &str = "editor123";

const RESOURCES: [&str; 4] = ["users", "categories", "articles", "reservations"];

fn admin() -> CreateUser {
    CreateUser {
        email: ADMIN_EMAIL.to_string(),
        name: "Administrator".to_string(),
        password: ADMIN_PASSWORD.to_string(),
        role: "admin".to_string(),
        permissions: all_permissions(&RESOURCES),
    }
}

/// Creates the administrator account unless one with its e-mail exists.
/// Returns whether an account was created.
pub async fn ensure_admin(stores: &Stores) -> Result<bool, ModelError> {
    if stores.directory.find_by_email(ADMIN_EMAIL).await?.is_some() {
        return Ok(false);
    }
    stores.users.create(admin()).await?;
    Ok(true)
}

pub(super) async fn demo_data(stores: &Stores) -> Result<(), ModelError> {
    ensure_admin(stores).await?;
    stores
        .users
        .create(CreateUser {
            email: EDITOR_EMAIL.to_string(),
            name: "Content Editor".to_string(),
            password: EDITOR_PASSWORD.to_string(),
            role: "editor".to_string(),
            permissions: vec![
                "articles.read".to_string(),
                "articles.create".to_string(),
                "articles.update".to_string(),
                "categories.read".to_string(),
                "reservations.read".to_string(),
                "users.read".to_string(),
            ],
        })
        .await?;

    let hair = stores.categories.create(category("Hair", None)).await?;
    let colour = stores.categories.create(category("Colour", Some(hair.id))).await?;
    stores.categories.create(category("Nails", None)).await?;

    for (title, category_id, status) in [
        ("Welcome to the salon", None, "published"),
        ("Autumn colour trends", Some(colour.id), "published"),
        ("Caring for curly hair", Some(hair.id), "draft"),
    ] {
        stores
            .articles
            .create(CreateArticle {
                title: title.to_string(),
                slug: slugify(title),
                excerpt: None,
                content: format!("{}.", title),
                category_id,
                status: status.to_string(),
                author_id: Some(1),
            })
            .await?;
    }

    let today = Utc::now().date_naive();
    let opening = Utc
        .with_ymd_and_hms(today.year(), today.month(), today.day(), 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    for (offset_days, hour, customer, service, status) in [
        (0, 1, "Mia Jensen", "Haircut", "confirmed"),
        (0, 3, "Noah Berg", "Beard trim", "pending"),
        (1, 2, "Ella Lind", "Colour", "confirmed"),
        (3, 0, "Liam Dahl", "Manicure", "cancelled"),
    ] {
        stores
            .reservations
            .create(CreateReservation {
                customer_name: customer.to_string(),
                customer_email: format!("{}@example.com", slugify(customer)),
                customer_phone: None,
                service: service.to_string(),
                staff: Some("Sara".to_string()),
                starts_at: Some(opening + Duration::days(offset_days) + Duration::hours(hour)),
                duration_minutes: 60,
                status: status.to_string(),
                notes: None,
            })
            .await?;
    }

    Ok(())
}

fn category(name: &str, parent_id: Option<i64>) -> CreateCategory {
    CreateCategory {
        name: name.to_string(),
        slug: slugify(name),
        description: None,
        parent_id,
    }
}
