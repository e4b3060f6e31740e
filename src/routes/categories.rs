use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use diesel::{dsl::count_star, prelude::*, result::DatabaseErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Category, NewCategory},
    schema::{categories, tickets},
    state::AppState,
};

use super::tickets::to_iso;

#[derive(Serialize, Clone)]
pub struct CategoryResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Category> for CategoryResponse {
    fn from(category: Category) -> Self {
        Self {
            id: category.id,
            name: category.name,
            description: category.description,
            color: category.color,
            created_at: to_iso(category.created_at),
            updated_at: to_iso(category.updated_at),
        }
    }
}

/// List entry; `ticket_count` lets the admin UI show usage before deletes.
#[derive(Serialize)]
pub struct CategoryCatalogEntry {
    #[serde(flatten)]
    pub category: CategoryResponse,
    pub ticket_count: i64,
}

#[derive(Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = categories)]
struct CategoryChangeset<'a> {
    name: Option<&'a str>,
    description: Option<&'a str>,
    color: Option<&'a str>,
}

pub async fn list_categories(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<CategoryCatalogEntry>>> {
    let mut conn = state.db()?;

    let category_list: Vec<Category> = categories::table
        .order(categories::name.asc())
        .load(&mut conn)?;

    let usage_rows: Vec<(Uuid, i64)> = tickets::table
        .group_by(tickets::category_id)
        .select((tickets::category_id, count_star()))
        .load(&mut conn)?;

    let usage_map: HashMap<Uuid, i64> = usage_rows.into_iter().collect();

    let response = category_list
        .into_iter()
        .map(|category| {
            let ticket_count = usage_map.get(&category.id).copied().unwrap_or(0);
            CategoryCatalogEntry {
                category: CategoryResponse::from(category),
                ticket_count,
            }
        })
        .collect();

    Ok(Json(response))
}

pub async fn create_category(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateCategoryRequest>,
) -> AppResult<(StatusCode, Json<CategoryCatalogEntry>)> {
    if !user.is_admin() {
        return Err(AppError::forbidden("admin role required"));
    }

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    if let Some(ref color) = payload.color {
        validate_color(color)?;
    }

    let mut conn = state.db()?;
    let new_category = NewCategory {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: payload.description,
        color: payload.color,
    };

    match diesel::insert_into(categories::table)
        .values(&new_category)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(AppError::conflict("category name already exists"));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let category: Category = categories::table.find(new_category.id).first(&mut conn)?;
    Ok((
        StatusCode::CREATED,
        Json(CategoryCatalogEntry {
            category: CategoryResponse::from(category),
            ticket_count: 0,
        }),
    ))
}

pub async fn update_category(
    State(state): State<AppState>,
    Path(category_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateCategoryRequest>,
) -> AppResult<Json<CategoryCatalogEntry>> {
    if !user.is_admin() {
        return Err(AppError::forbidden("admin role required"));
    }

    let mut conn = state.db()?;
    let existing: Category = categories::table.find(category_id).first(&mut conn)?;

    let mut new_name: Option<String> = None;
    if let Some(ref candidate) = payload.name {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            return Err(AppError::bad_request("name must not be empty"));
        }
        if trimmed != existing.name {
            new_name = Some(trimmed.to_string());
        }
    }

    if let Some(ref color) = payload.color {
        validate_color(color)?;
    }

    let changeset = CategoryChangeset {
        name: new_name.as_deref(),
        description: payload.description.as_deref(),
        color: payload.color.as_deref(),
    };

    let now = Utc::now().naive_utc();
    match diesel::update(categories::table.find(category_id))
        .set((&changeset, categories::updated_at.eq(now)))
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(AppError::conflict("category name already exists"));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let updated: Category = categories::table.find(category_id).first(&mut conn)?;
    let ticket_count: i64 = tickets::table
        .filter(tickets::category_id.eq(category_id))
        .select(count_star())
        .first(&mut conn)?;

    Ok(Json(CategoryCatalogEntry {
        category: CategoryResponse::from(updated),
        ticket_count,
    }))
}

pub async fn delete_category(
    State(state): State<AppState>,
    Path(category_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    if !user.is_admin() {
        return Err(AppError::forbidden("admin role required"));
    }

    let mut conn = state.db()?;

    let usage: i64 = tickets::table
        .filter(tickets::category_id.eq(category_id))
        .select(count_star())
        .first(&mut conn)?;

    if usage > 0 {
        return Err(AppError::conflict(
            "cannot delete a category that still has tickets",
        ));
    }

    let deleted = diesel::delete(categories::table.find(category_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }

    Ok(StatusCode::NO_CONTENT)
}

fn validate_color(color: &str) -> AppResult<()> {
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(AppError::bad_request(
            "color must be a #rrggbb hex value",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_color;

    #[test]
    fn accepts_hex_colors() {
        assert!(validate_color("#dc3545").is_ok());
        assert!(validate_color("#FFC107").is_ok());
    }

    #[test]
    fn rejects_malformed_colors() {
        assert!(validate_color("dc3545").is_err());
        assert!(validate_color("#dc354").is_err());
        assert!(validate_color("#dc354z").is_err());
        assert!(validate_color("red").is_err());
    }
}
