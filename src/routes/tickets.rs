use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::dsl::{count_star, exists};
use diesel::{prelude::*, select, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::categories::CategoryResponse;
use super::users::UserResponse;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Attachment, Category, Comment, NewComment, NewTicket, Ticket, User};
use crate::schema::{attachments, categories, comments, tickets, users};
use crate::state::AppState;
use crate::utils::json::{classify_nullable_str, classify_nullable_uuid, NullableValue};

pub const STATUS_OPEN: &str = "open";
pub const STATUS_IN_PROGRESS: &str = "in_progress";
pub const STATUS_RESOLVED: &str = "resolved";
pub const STATUS_CLOSED: &str = "closed";

pub const TICKET_STATUSES: &[&str] = &[
    STATUS_OPEN,
    STATUS_IN_PROGRESS,
    STATUS_RESOLVED,
    STATUS_CLOSED,
];

pub const PRIORITY_MEDIUM: &str = "medium";

pub const TICKET_PRIORITIES: &[&str] = &["low", PRIORITY_MEDIUM, "high", "urgent"];

const DEFAULT_PER_PAGE: i64 = 10;
const MAX_PER_PAGE: i64 = 100;

fn is_valid_status(status: &str) -> bool {
    TICKET_STATUSES.iter().any(|allowed| *allowed == status)
}

fn is_valid_priority(priority: &str) -> bool {
    TICKET_PRIORITIES.iter().any(|allowed| *allowed == priority)
}

#[derive(Deserialize)]
pub struct TicketListQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub category_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateTicketRequest {
    pub subject: String,
    pub description: String,
    pub category_id: Uuid,
    pub priority: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub body: String,
    #[serde(default)]
    pub is_internal: bool,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = tickets)]
struct TicketChangeset<'a> {
    subject: Option<&'a str>,
    description: Option<&'a str>,
    status: Option<&'a str>,
    priority: Option<&'a str>,
    assigned_to: Option<Option<Uuid>>,
    resolved_at: Option<NaiveDateTime>,
}

#[derive(Serialize)]
pub struct TicketResponse {
    pub id: Uuid,
    pub subject: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub created_at: String,
    pub updated_at: String,
    pub resolved_at: Option<String>,
    pub user_id: Uuid,
    pub category_id: Uuid,
    pub assigned_to: Option<Uuid>,
    pub user: UserResponse,
    pub category: CategoryResponse,
    pub assigned_agent: Option<UserResponse>,
    pub comment_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<CommentResponse>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<AttachmentResponse>>,
}

#[derive(Serialize, Clone)]
pub struct CommentResponse {
    pub id: Uuid,
    pub body: String,
    pub is_internal: bool,
    pub created_at: String,
    pub ticket_id: Uuid,
    pub author_id: Uuid,
    pub author: UserResponse,
}

/// The storage key (`file_path`) deliberately stays server-side; clients
/// download through the attachment endpoint.
#[derive(Serialize, Clone)]
pub struct AttachmentResponse {
    pub id: Uuid,
    pub filename: String,
    pub original_filename: String,
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub created_at: String,
    pub ticket_id: Uuid,
    pub uploaded_by: Uuid,
    pub uploader: UserResponse,
}

#[derive(Serialize)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
    pub pages: i64,
}

#[derive(Serialize)]
pub struct TicketListResponse {
    pub tickets: Vec<TicketResponse>,
    pub pagination: Pagination,
}

#[derive(Serialize)]
pub struct TicketStats {
    pub total: i64,
    pub open: i64,
    pub in_progress: i64,
    pub resolved: i64,
    pub closed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unassigned: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to_me: Option<i64>,
}

#[derive(Serialize)]
pub struct TicketStatsResponse {
    pub stats: TicketStats,
}

pub async fn list_tickets(
    State(state): State<AppState>,
    Query(params): Query<TicketListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<TicketListResponse>> {
    let mut conn = state.db()?;

    if let Some(ref status) = params.status {
        if !is_valid_status(status) {
            return Err(AppError::bad_request(format!("invalid status: {status}")));
        }
    }
    if let Some(ref priority) = params.priority {
        if !is_valid_priority(priority) {
            return Err(AppError::bad_request(format!(
                "invalid priority: {priority}"
            )));
        }
    }

    let page = params.page.unwrap_or(1).max(1);
    let per_page = params
        .per_page
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, MAX_PER_PAGE);

    let build_query = || {
        let mut query = tickets::table.into_boxed();

        // End-users only ever see their own tickets.
        if !user.is_staff() {
            query = query.filter(tickets::user_id.eq(user.user_id));
        }
        if let Some(ref status) = params.status {
            query = query.filter(tickets::status.eq(status.clone()));
        }
        if let Some(ref priority) = params.priority {
            query = query.filter(tickets::priority.eq(priority.clone()));
        }
        if let Some(category_id) = params.category_id {
            query = query.filter(tickets::category_id.eq(category_id));
        }
        if let Some(assigned_to) = params.assigned_to {
            query = query.filter(tickets::assigned_to.eq(assigned_to));
        }
        if let Some(search) = params
            .search
            .as_ref()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
        {
            // Backslash first, it is also the ILIKE escape character.
            let escaped = search
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            let pattern = format!("%{escaped}%");
            query = query.filter(
                tickets::subject
                    .ilike(pattern.clone())
                    .or(tickets::description.ilike(pattern)),
            );
        }
        query
    };

    let total: i64 = build_query().select(count_star()).first(&mut conn)?;

    let mut query = build_query();
    let descending = !matches!(params.order.as_deref(), Some("asc"));
    query = match (params.sort_by.as_deref().unwrap_or("updated_at"), descending) {
        ("created_at", true) => query.order(tickets::created_at.desc()),
        ("created_at", false) => query.order(tickets::created_at.asc()),
        ("priority", true) => query.order(tickets::priority.desc()),
        ("priority", false) => query.order(tickets::priority.asc()),
        ("status", true) => query.order(tickets::status.desc()),
        ("status", false) => query.order(tickets::status.asc()),
        (_, true) => query.order(tickets::updated_at.desc()),
        (_, false) => query.order(tickets::updated_at.asc()),
    };

    let rows: Vec<Ticket> = query
        .limit(per_page)
        .offset((page - 1) * per_page)
        .load(&mut conn)?;

    let responses = build_ticket_responses(&mut conn, rows, &user)?;

    let pages = if total == 0 {
        0
    } else {
        (total + per_page - 1) / per_page
    };

    Ok(Json(TicketListResponse {
        tickets: responses,
        pagination: Pagination {
            page,
            per_page,
            total,
            pages,
        },
    }))
}

pub async fn ticket_stats(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<TicketStatsResponse>> {
    let mut conn = state.db()?;

    // group_by cannot be applied to a boxed query, hence the two branches.
    let by_status: Vec<(String, i64)> = if user.is_staff() {
        tickets::table
            .group_by(tickets::status)
            .select((tickets::status, count_star()))
            .load(&mut conn)?
    } else {
        tickets::table
            .filter(tickets::user_id.eq(user.user_id))
            .group_by(tickets::status)
            .select((tickets::status, count_star()))
            .load(&mut conn)?
    };
    let status_map: HashMap<String, i64> = by_status.into_iter().collect();

    let total = status_map.values().copied().sum();

    let unassigned = if user.is_staff() {
        Some(
            tickets::table
                .filter(tickets::assigned_to.is_null())
                .select(count_star())
                .first(&mut conn)?,
        )
    } else {
        None
    };

    let assigned_to_me = if user.is_staff() {
        Some(
            tickets::table
                .filter(tickets::assigned_to.eq(user.user_id))
                .select(count_star())
                .first(&mut conn)?,
        )
    } else {
        None
    };

    Ok(Json(TicketStatsResponse {
        stats: TicketStats {
            total,
            open: status_map.get(STATUS_OPEN).copied().unwrap_or(0),
            in_progress: status_map.get(STATUS_IN_PROGRESS).copied().unwrap_or(0),
            resolved: status_map.get(STATUS_RESOLVED).copied().unwrap_or(0),
            closed: status_map.get(STATUS_CLOSED).copied().unwrap_or(0),
            unassigned,
            assigned_to_me,
        },
    }))
}

pub async fn create_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTicketRequest>,
) -> AppResult<(StatusCode, Json<TicketResponse>)> {
    let subject = payload.subject.trim();
    if subject.is_empty() {
        return Err(AppError::bad_request("subject must not be empty"));
    }
    let description = payload.description.trim();
    if description.is_empty() {
        return Err(AppError::bad_request("description must not be empty"));
    }

    let priority = payload.priority.as_deref().unwrap_or(PRIORITY_MEDIUM);
    if !is_valid_priority(priority) {
        return Err(AppError::bad_request(format!(
            "invalid priority: {priority}"
        )));
    }

    let mut conn = state.db()?;
    let category_exists: bool = select(exists(
        categories::table.filter(categories::id.eq(payload.category_id)),
    ))
    .get_result(&mut conn)?;
    if !category_exists {
        return Err(AppError::bad_request("category does not exist"));
    }

    let new_ticket = NewTicket {
        id: Uuid::new_v4(),
        subject: subject.to_string(),
        description: description.to_string(),
        status: STATUS_OPEN.to_string(),
        priority: priority.to_string(),
        user_id: user.user_id,
        category_id: payload.category_id,
        assigned_to: None,
    };

    diesel::insert_into(tickets::table)
        .values(&new_ticket)
        .execute(&mut conn)?;

    let ticket: Ticket = tickets::table.find(new_ticket.id).first(&mut conn)?;
    info!(ticket_id = %ticket.id, user_id = %user.user_id, "ticket created");

    let response = build_ticket_responses(&mut conn, vec![ticket], &user)?
        .pop()
        .ok_or_else(|| AppError::internal("freshly created ticket missing"))?;

    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<TicketResponse>> {
    let mut conn = state.db()?;
    let ticket = find_visible_ticket(&mut conn, ticket_id, &user)?;

    let comment_rows = load_comments(&mut conn, ticket_id, &user)?;
    let attachment_rows = load_attachments(&mut conn, ticket_id)?;

    let mut response = build_ticket_responses(&mut conn, vec![ticket], &user)?
        .pop()
        .ok_or_else(AppError::not_found)?;
    response.comments = Some(comment_rows);
    response.attachments = Some(attachment_rows);

    Ok(Json(response))
}

pub async fn update_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<Json<TicketResponse>> {
    let mut conn = state.db()?;
    let existing = find_visible_ticket(&mut conn, ticket_id, &user)?;

    let mut changeset = TicketChangeset::default();
    let mut changed = false;

    let subject = match classify_nullable_str(body.get("subject")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => None,
        NullableValue::Null => return Err(AppError::bad_request("subject cannot be null")),
        NullableValue::Value(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("subject must not be empty"));
            }
            Some(trimmed)
        }
    };

    let description =
        match classify_nullable_str(body.get("description")).map_err(AppError::bad_request)? {
            NullableValue::Omitted => None,
            NullableValue::Null => return Err(AppError::bad_request("description cannot be null")),
            NullableValue::Value(value) => {
                let trimmed = value.trim().to_string();
                if trimmed.is_empty() {
                    return Err(AppError::bad_request("description must not be empty"));
                }
                Some(trimmed)
            }
        };

    let status = match classify_nullable_str(body.get("status")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => None,
        NullableValue::Null => return Err(AppError::bad_request("status cannot be null")),
        NullableValue::Value(value) => {
            if !is_valid_status(&value) {
                return Err(AppError::bad_request(format!("invalid status: {value}")));
            }
            Some(value)
        }
    };

    let priority = match classify_nullable_str(body.get("priority")).map_err(AppError::bad_request)?
    {
        NullableValue::Omitted => None,
        NullableValue::Null => return Err(AppError::bad_request("priority cannot be null")),
        NullableValue::Value(value) => {
            if !is_valid_priority(&value) {
                return Err(AppError::bad_request(format!("invalid priority: {value}")));
            }
            Some(value)
        }
    };

    let assignment =
        match classify_nullable_uuid(body.get("assigned_to")).map_err(AppError::bad_request)? {
            NullableValue::Omitted => None,
            NullableValue::Null => Some(None),
            NullableValue::Value(agent_id) => {
                let agent_exists: bool = select(exists(users::table.filter(
                    users::id.eq(agent_id).and(users::role.ne(crate::auth::ROLE_USER)),
                )))
                .get_result(&mut conn)?;
                if !agent_exists {
                    return Err(AppError::bad_request("assignee must be an agent or admin"));
                }
                Some(Some(agent_id))
            }
        };

    if let Some(ref value) = subject {
        if value != &existing.subject {
            changeset.subject = Some(value.as_str());
            changed = true;
        }
    }
    if let Some(ref value) = description {
        if value != &existing.description {
            changeset.description = Some(value.as_str());
            changed = true;
        }
    }
    if let Some(ref value) = priority {
        if value != &existing.priority {
            changeset.priority = Some(value.as_str());
            changed = true;
        }
    }
    if let Some(value) = assignment {
        if value != existing.assigned_to {
            changeset.assigned_to = Some(value);
            changed = true;
        }
    }

    let mut resolved_now = false;
    if let Some(ref value) = status {
        if value != &existing.status {
            changeset.status = Some(value.as_str());
            changed = true;
            // resolved_at marks the first transition into resolved and is
            // never cleared by later status changes.
            if value == STATUS_RESOLVED && existing.status != STATUS_RESOLVED {
                changeset.resolved_at = Some(Utc::now().naive_utc());
                resolved_now = true;
            }
        }
    }

    // End-users may only touch subject/description of their own tickets;
    // changing status, priority or assignment is a staff operation. The gate
    // looks at actual changes so a client echoing the current values passes.
    if !user.is_staff()
        && (changeset.status.is_some()
            || changeset.priority.is_some()
            || changeset.assigned_to.is_some())
    {
        return Err(AppError::forbidden(
            "only agents may change status, priority or assignment",
        ));
    }

    if changed {
        let now = Utc::now().naive_utc();
        diesel::update(tickets::table.find(ticket_id))
            .set((&changeset, tickets::updated_at.eq(now)))
            .execute(&mut conn)?;

        if let Some(new_status) = changeset.status {
            info!(
                ticket_id = %ticket_id,
                from = %existing.status,
                to = %new_status,
                by = %user.user_id,
                "ticket status changed"
            );
        }
    }

    let updated: Ticket = tickets::table.find(ticket_id).first(&mut conn)?;
    let response = build_ticket_responses(&mut conn, vec![updated.clone()], &user)?
        .pop()
        .ok_or_else(AppError::not_found)?;

    if resolved_now {
        // Release the connection before the mail await so a slow relay
        // cannot starve the pool.
        let requester: Result<User, _> = users::table.find(updated.user_id).first(&mut conn);
        drop(conn);
        match requester {
            Ok(requester) => notify_ticket_resolved(&state, &requester, &updated).await,
            Err(err) => {
                warn!(ticket_id = %updated.id, error = %err, "requester lookup failed, skipping mail");
            }
        }
    }

    Ok(Json(response))
}

pub async fn delete_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let ticket = find_visible_ticket(&mut conn, ticket_id, &user)?;

    if !user.is_admin() && ticket.user_id != user.user_id {
        return Err(AppError::forbidden("only the requester or an admin may delete a ticket"));
    }

    let object_keys: Vec<String> = attachments::table
        .filter(attachments::ticket_id.eq(ticket_id))
        .select(attachments::file_path)
        .load(&mut conn)?;

    // Comments and attachments go with the ticket (ON DELETE CASCADE).
    diesel::delete(tickets::table.find(ticket_id)).execute(&mut conn)?;
    info!(ticket_id = %ticket_id, by = %user.user_id, "ticket deleted");
    drop(conn);

    for key in object_keys {
        if let Err(err) = state.storage.delete_object(&key).await {
            warn!(%key, error = %err, "failed to delete attachment object");
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_ticket_comments(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<CommentResponse>>> {
    let mut conn = state.db()?;
    find_visible_ticket(&mut conn, ticket_id, &user)?;
    Ok(Json(load_comments(&mut conn, ticket_id, &user)?))
}

pub async fn create_ticket_comment(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateCommentRequest>,
) -> AppResult<(StatusCode, Json<CommentResponse>)> {
    let body = payload.body.trim();
    if body.is_empty() {
        return Err(AppError::bad_request("body must not be empty"));
    }
    if payload.is_internal && !user.is_staff() {
        return Err(AppError::forbidden("only agents may post internal notes"));
    }

    let mut conn = state.db()?;
    find_visible_ticket(&mut conn, ticket_id, &user)?;

    let new_comment = NewComment {
        id: Uuid::new_v4(),
        body: body.to_string(),
        is_internal: payload.is_internal,
        ticket_id,
        author_id: user.user_id,
    };

    let now = Utc::now().naive_utc();
    diesel::insert_into(comments::table)
        .values(&new_comment)
        .execute(&mut conn)?;
    diesel::update(tickets::table.find(ticket_id))
        .set(tickets::updated_at.eq(now))
        .execute(&mut conn)?;

    let (comment, author): (Comment, User) = comments::table
        .inner_join(users::table)
        .filter(comments::id.eq(new_comment.id))
        .first(&mut conn)?;

    Ok((
        StatusCode::CREATED,
        Json(to_comment_response(comment, author)),
    ))
}

/// Loads a ticket, applying the end-user visibility rule. A foreign ticket
/// is reported as 404 rather than 403 so ids are not probeable.
pub(crate) fn find_visible_ticket(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    user: &AuthenticatedUser,
) -> AppResult<Ticket> {
    let ticket: Ticket = tickets::table.find(ticket_id).first(conn)?;
    if !user.is_staff() && ticket.user_id != user.user_id {
        return Err(AppError::not_found());
    }
    Ok(ticket)
}

fn load_comments(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    user: &AuthenticatedUser,
) -> AppResult<Vec<CommentResponse>> {
    let mut query = comments::table
        .inner_join(users::table)
        .filter(comments::ticket_id.eq(ticket_id))
        .into_boxed();

    if !user.is_staff() {
        query = query.filter(comments::is_internal.eq(false));
    }

    let rows: Vec<(Comment, User)> = query.order(comments::created_at.asc()).load(conn)?;

    Ok(rows
        .into_iter()
        .map(|(comment, author)| to_comment_response(comment, author))
        .collect())
}

fn load_attachments(conn: &mut PgConnection, ticket_id: Uuid) -> AppResult<Vec<AttachmentResponse>> {
    let rows: Vec<(Attachment, User)> = attachments::table
        .inner_join(users::table)
        .filter(attachments::ticket_id.eq(ticket_id))
        .order(attachments::created_at.asc())
        .load(conn)?;

    Ok(rows
        .into_iter()
        .map(|(attachment, uploader)| to_attachment_response(attachment, uploader))
        .collect())
}

pub(crate) fn to_comment_response(comment: Comment, author: User) -> CommentResponse {
    CommentResponse {
        id: comment.id,
        body: comment.body,
        is_internal: comment.is_internal,
        created_at: to_iso(comment.created_at),
        ticket_id: comment.ticket_id,
        author_id: comment.author_id,
        author: UserResponse::from(author),
    }
}

pub(crate) fn to_attachment_response(attachment: Attachment, uploader: User) -> AttachmentResponse {
    AttachmentResponse {
        id: attachment.id,
        filename: attachment.filename,
        original_filename: attachment.original_filename,
        file_size: attachment.file_size,
        mime_type: attachment.mime_type,
        created_at: to_iso(attachment.created_at),
        ticket_id: attachment.ticket_id,
        uploaded_by: attachment.uploaded_by,
        uploader: UserResponse::from(uploader),
    }
}

/// Builds list-level responses with the nested requester/category/assignee
/// objects batched in three queries instead of one round trip per ticket.
/// `comment_count` is scoped like the comment listing, so end-users never
/// see internal notes reflected in the count.
pub(crate) fn build_ticket_responses(
    conn: &mut PgConnection,
    rows: Vec<Ticket>,
    user: &AuthenticatedUser,
) -> AppResult<Vec<TicketResponse>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ticket_ids: Vec<Uuid> = rows.iter().map(|t| t.id).collect();

    let mut user_ids: Vec<Uuid> = rows.iter().map(|t| t.user_id).collect();
    user_ids.extend(rows.iter().filter_map(|t| t.assigned_to));
    user_ids.sort();
    user_ids.dedup();

    let mut category_ids: Vec<Uuid> = rows.iter().map(|t| t.category_id).collect();
    category_ids.sort();
    category_ids.dedup();

    let user_rows: Vec<User> = users::table
        .filter(users::id.eq_any(&user_ids))
        .load(conn)?;
    let users_map: HashMap<Uuid, UserResponse> = user_rows
        .into_iter()
        .map(|u| (u.id, UserResponse::from(u)))
        .collect();

    let category_rows: Vec<Category> = categories::table
        .filter(categories::id.eq_any(&category_ids))
        .load(conn)?;
    let categories_map: HashMap<Uuid, CategoryResponse> = category_rows
        .into_iter()
        .map(|c| (c.id, CategoryResponse::from(c)))
        .collect();

    // group_by cannot be applied to a boxed query, hence the two branches.
    let count_rows: Vec<(Uuid, i64)> = if user.is_staff() {
        comments::table
            .filter(comments::ticket_id.eq_any(&ticket_ids))
            .group_by(comments::ticket_id)
            .select((comments::ticket_id, count_star()))
            .load(conn)?
    } else {
        comments::table
            .filter(comments::ticket_id.eq_any(&ticket_ids))
            .filter(comments::is_internal.eq(false))
            .group_by(comments::ticket_id)
            .select((comments::ticket_id, count_star()))
            .load(conn)?
    };
    let counts_map: HashMap<Uuid, i64> = count_rows.into_iter().collect();

    let mut responses = Vec::with_capacity(rows.len());
    for ticket in rows {
        let requester = users_map
            .get(&ticket.user_id)
            .cloned()
            .ok_or_else(|| AppError::internal("ticket requester missing"))?;
        let category = categories_map
            .get(&ticket.category_id)
            .cloned()
            .ok_or_else(|| AppError::internal("ticket category missing"))?;
        let assigned_agent = ticket
            .assigned_to
            .and_then(|agent_id| users_map.get(&agent_id).cloned());

        responses.push(TicketResponse {
            id: ticket.id,
            subject: ticket.subject,
            description: ticket.description,
            status: ticket.status,
            priority: ticket.priority,
            created_at: to_iso(ticket.created_at),
            updated_at: to_iso(ticket.updated_at),
            resolved_at: ticket.resolved_at.map(to_iso),
            user_id: ticket.user_id,
            category_id: ticket.category_id,
            assigned_to: ticket.assigned_to,
            user: requester,
            category,
            assigned_agent,
            comment_count: counts_map.get(&ticket.id).copied().unwrap_or(0),
            comments: None,
            attachments: None,
        });
    }

    Ok(responses)
}

async fn notify_ticket_resolved(state: &AppState, requester: &User, ticket: &Ticket) {
    let subject = format!("Your ticket has been resolved: {}", ticket.subject);
    let body = format!(
        "Hello {},\n\nYour support ticket \"{}\" has been marked as resolved.\n\n\
         If the issue persists, reply on the ticket to reopen the conversation.\n\n\
         The QuickDesk Team",
        requester.username, ticket.subject
    );

    if let Err(err) = state.mailer.send(&requester.email, &subject, &body).await {
        warn!(ticket_id = %ticket.id, error = %err, "resolved notification failed");
    }
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_statuses() {
        for status in TICKET_STATUSES {
            assert!(is_valid_status(status));
        }
    }

    #[test]
    fn rejects_unknown_status() {
        assert!(!is_valid_status("reopened"));
        assert!(!is_valid_status("OPEN"));
        assert!(!is_valid_status(""));
    }

    #[test]
    fn accepts_known_priorities() {
        for priority in TICKET_PRIORITIES {
            assert!(is_valid_priority(priority));
        }
    }

    #[test]
    fn rejects_unknown_priority() {
        assert!(!is_valid_priority("critical"));
        assert!(!is_valid_priority("Medium"));
    }

    #[test]
    fn iso_timestamps_are_utc() {
        let dt = chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(to_iso(dt), "2024-05-01T12:30:00+00:00");
    }
}
