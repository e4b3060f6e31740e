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
    auth::{self, password, AuthenticatedUser, ROLE_ADMIN, ROLE_AGENT},
    error::{AppError, AppResult},
    models::{NewUser, User},
    schema::{tickets, users},
    state::AppState,
};

use super::tickets::to_iso;

/// Wire form of a user. Never carries the password hash.
#[derive(Serialize, Clone)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
            created_at: to_iso(user.created_at),
            updated_at: to_iso(user.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = users)]
struct UserChangeset<'a> {
    email: Option<&'a str>,
    password_hash: Option<&'a str>,
    role: Option<&'a str>,
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<UserResponse>>> {
    if !user.is_admin() {
        return Err(AppError::forbidden("admin role required"));
    }

    let mut conn = state.db()?;
    let rows: Vec<User> = users::table.order(users::username.asc()).load(&mut conn)?;
    Ok(Json(rows.into_iter().map(UserResponse::from).collect()))
}

/// Staff listing used to populate the assignee picker.
pub async fn list_agents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<UserResponse>>> {
    if !user.is_staff() {
        return Err(AppError::forbidden("agent or admin role required"));
    }

    let mut conn = state.db()?;
    let rows: Vec<User> = users::table
        .filter(users::role.eq_any([ROLE_AGENT, ROLE_ADMIN]))
        .order(users::username.asc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(UserResponse::from).collect()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserResponse>> {
    if !user.is_admin() && user.user_id != user_id {
        return Err(AppError::forbidden("cannot view other users"));
    }

    let mut conn = state.db()?;
    let row: User = users::table.find(user_id).first(&mut conn)?;
    Ok(Json(UserResponse::from(row)))
}

pub async fn create_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    if !user.is_admin() {
        return Err(AppError::forbidden("admin role required"));
    }

    let username = payload.username.trim();
    if username.is_empty() {
        return Err(AppError::bad_request("username must not be empty"));
    }
    let email = payload.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("email must be a valid address"));
    }
    if payload.password.len() < 8 {
        return Err(AppError::bad_request(
            "password must be at least 8 characters",
        ));
    }
    let role = payload.role.as_deref().unwrap_or(auth::ROLE_USER);
    if !auth::is_valid_role(role) {
        return Err(AppError::bad_request(format!("invalid role: {role}")));
    }

    let new_user = NewUser {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email: email.to_string(),
        password_hash: password::hash_password(&payload.password)?,
        role: role.to_string(),
    };

    let mut conn = state.db()?;
    match diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(AppError::conflict("username or email already taken"));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let created: User = users::table.find(new_user.id).first(&mut conn)?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(created))))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<UserResponse>> {
    if !user.is_admin() && user.user_id != user_id {
        return Err(AppError::forbidden("cannot update other users"));
    }

    let mut conn = state.db()?;
    let existing: User = users::table.find(user_id).first(&mut conn)?;

    let mut new_email: Option<String> = None;
    if let Some(ref candidate) = payload.email {
        let trimmed = candidate.trim();
        if trimmed.is_empty() || !trimmed.contains('@') {
            return Err(AppError::bad_request("email must be a valid address"));
        }
        if trimmed != existing.email {
            new_email = Some(trimmed.to_string());
        }
    }

    let mut new_password_hash: Option<String> = None;
    if let Some(ref candidate) = payload.password {
        if candidate.len() < 8 {
            return Err(AppError::bad_request(
                "password must be at least 8 characters",
            ));
        }
        new_password_hash = Some(password::hash_password(candidate)?);
    }

    let mut new_role: Option<String> = None;
    if let Some(ref candidate) = payload.role {
        if !user.is_admin() {
            return Err(AppError::forbidden("only admins may change roles"));
        }
        if !auth::is_valid_role(candidate) {
            return Err(AppError::bad_request(format!("invalid role: {candidate}")));
        }
        if candidate != &existing.role {
            new_role = Some(candidate.clone());
        }
    }

    if new_email.is_none() && new_password_hash.is_none() && new_role.is_none() {
        return Ok(Json(UserResponse::from(existing)));
    }

    let changeset = UserChangeset {
        email: new_email.as_deref(),
        password_hash: new_password_hash.as_deref(),
        role: new_role.as_deref(),
    };

    let now = Utc::now().naive_utc();
    match diesel::update(users::table.find(user_id))
        .set((&changeset, users::updated_at.eq(now)))
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(AppError::conflict("email already taken"));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let updated: User = users::table.find(user_id).first(&mut conn)?;
    Ok(Json(UserResponse::from(updated)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    if !user.is_admin() {
        return Err(AppError::forbidden("admin role required"));
    }
    if user.user_id == user_id {
        return Err(AppError::bad_request("cannot delete your own account"));
    }

    let mut conn = state.db()?;

    let referencing: i64 = tickets::table
        .filter(
            tickets::user_id
                .eq(user_id)
                .or(tickets::assigned_to.eq(user_id)),
        )
        .select(count_star())
        .first(&mut conn)?;

    if referencing > 0 {
        return Err(AppError::conflict(
            "cannot delete a user that still has tickets",
        ));
    }

    let deleted = diesel::delete(users::table.find(user_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }

    Ok(StatusCode::NO_CONTENT)
}
