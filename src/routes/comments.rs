use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Comment, User},
    schema::{comments, users},
    state::AppState,
};

use super::tickets::{find_visible_ticket, to_comment_response, CommentResponse};

#[derive(Deserialize)]
pub struct UpdateCommentRequest {
    pub body: String,
}

pub async fn update_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateCommentRequest>,
) -> AppResult<Json<CommentResponse>> {
    let body = payload.body.trim();
    if body.is_empty() {
        return Err(AppError::bad_request("body must not be empty"));
    }

    let mut conn = state.db()?;
    let comment: Comment = comments::table.find(comment_id).first(&mut conn)?;
    find_visible_ticket(&mut conn, comment.ticket_id, &user)?;
    if comment.is_internal && !user.is_staff() {
        return Err(AppError::not_found());
    }

    if comment.author_id != user.user_id {
        return Err(AppError::forbidden("only the author may edit a comment"));
    }

    diesel::update(comments::table.find(comment_id))
        .set(comments::body.eq(body))
        .execute(&mut conn)?;
    diesel::update(crate::schema::tickets::table.find(comment.ticket_id))
        .set(crate::schema::tickets::updated_at.eq(Utc::now().naive_utc()))
        .execute(&mut conn)?;

    let (updated, author): (Comment, User) = comments::table
        .inner_join(users::table)
        .filter(comments::id.eq(comment_id))
        .first(&mut conn)?;

    Ok(Json(to_comment_response(updated, author)))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let comment: Comment = comments::table.find(comment_id).first(&mut conn)?;
    find_visible_ticket(&mut conn, comment.ticket_id, &user)?;
    if comment.is_internal && !user.is_staff() {
        return Err(AppError::not_found());
    }

    if comment.author_id != user.user_id && !user.is_admin() {
        return Err(AppError::forbidden(
            "only the author or an admin may delete a comment",
        ));
    }

    diesel::delete(comments::table.find(comment_id)).execute(&mut conn)?;

    Ok(StatusCode::NO_CONTENT)
}
