use std::time::Duration;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use diesel::prelude::*;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Attachment, NewAttachment, User},
    schema::{attachments, users},
    state::AppState,
};

use super::tickets::{find_visible_ticket, to_attachment_response, AttachmentResponse};

const PRESIGNED_URL_EXPIRY_SECONDS: u64 = 300;
const MAX_ATTACHMENT_BYTES: usize = 16 * 1024 * 1024;

#[derive(Serialize)]
pub struct AttachmentDownloadResponse {
    pub url: String,
    pub expires_in: u64,
    pub filename: String,
    pub mime_type: Option<String>,
    pub file_size: i64,
}

pub async fn upload_attachment(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<AttachmentResponse>)> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut content_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        let msg = format!("invalid multipart data: {err}");
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(msg)
    })? {
        let name = field.name().map(|n| n.to_string());
        if name.as_deref() == Some("file") {
            original_name = field.file_name().map(|n| n.to_string());
            content_type = field.content_type().map(|mime| mime.to_string());
            let data = field.bytes().await.map_err(|err| {
                let msg = format!("failed to read file bytes: {err}");
                error!(error = %err, "failed to read file bytes");
                AppError::bad_request(msg)
            })?;
            file_bytes = Some(data.to_vec());
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| {
        error!("upload rejected: missing file field");
        AppError::bad_request("file field is required")
    })?;
    if file_bytes.is_empty() {
        return Err(AppError::bad_request("file field must not be empty"));
    }
    if file_bytes.len() > MAX_ATTACHMENT_BYTES {
        return Err(AppError::bad_request("file exceeds the 16 MiB limit"));
    }
    let original_name = original_name
        .ok_or_else(|| AppError::bad_request("filename is required"))?;

    let mut conn = state.db()?;
    find_visible_ticket(&mut conn, ticket_id, &user)?;

    let attachment_id = Uuid::new_v4();
    let stored_filename = sanitize_filename(&original_name);
    let mime_type = content_type.or_else(|| {
        mime_guess::from_path(&original_name)
            .first()
            .map(|mime| mime.to_string())
    });
    let object_key = format!("tickets/{ticket_id}/{attachment_id}/{stored_filename}");

    let content_disposition = inline_content_disposition(&stored_filename);
    state
        .storage
        .put_object(
            &object_key,
            file_bytes.clone(),
            mime_type.clone(),
            content_disposition,
        )
        .await
        .map_err(|err| {
            error!(error = %err, key = %object_key, "failed to store attachment");
            AppError::internal(format!("failed to store attachment: {err}"))
        })?;

    let new_attachment = NewAttachment {
        id: attachment_id,
        filename: stored_filename,
        original_filename: original_name,
        file_size: file_bytes.len() as i64,
        mime_type,
        file_path: object_key,
        ticket_id,
        uploaded_by: user.user_id,
    };
    diesel::insert_into(attachments::table)
        .values(&new_attachment)
        .execute(&mut conn)?;

    let (attachment, uploader): (Attachment, User) = attachments::table
        .inner_join(users::table)
        .filter(attachments::id.eq(attachment_id))
        .first(&mut conn)?;

    info!(
        attachment_id = %attachment.id,
        ticket_id = %ticket_id,
        size = attachment.file_size,
        "attachment upload succeeded"
    );

    Ok((
        StatusCode::CREATED,
        Json(to_attachment_response(attachment, uploader)),
    ))
}

pub async fn download_attachment(
    State(state): State<AppState>,
    Path(attachment_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<AttachmentDownloadResponse>> {
    let mut conn = state.db()?;
    let attachment: Attachment = attachments::table.find(attachment_id).first(&mut conn)?;
    find_visible_ticket(&mut conn, attachment.ticket_id, &user)?;

    let presigned_url = state
        .storage
        .presign_get_object(
            &attachment.file_path,
            Duration::from_secs(PRESIGNED_URL_EXPIRY_SECONDS),
        )
        .await
        .map_err(|err| AppError::internal(format!("failed to generate download URL: {err}")))?;

    Ok(Json(AttachmentDownloadResponse {
        url: presigned_url,
        expires_in: PRESIGNED_URL_EXPIRY_SECONDS,
        filename: attachment.original_filename,
        mime_type: attachment.mime_type,
        file_size: attachment.file_size,
    }))
}

pub async fn delete_attachment(
    State(state): State<AppState>,
    Path(attachment_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let attachment: Attachment = attachments::table.find(attachment_id).first(&mut conn)?;
    find_visible_ticket(&mut conn, attachment.ticket_id, &user)?;

    if attachment.uploaded_by != user.user_id && !user.is_staff() {
        return Err(AppError::forbidden(
            "only the uploader or an agent may delete an attachment",
        ));
    }

    diesel::delete(attachments::table.find(attachment_id)).execute(&mut conn)?;

    if let Err(err) = state.storage.delete_object(&attachment.file_path).await {
        warn!(
            attachment_id = %attachment.id,
            key = %attachment.file_path,
            error = %err,
            "attachment object cleanup failed"
        );
    }

    Ok(StatusCode::NO_CONTENT)
}

fn sanitize_filename(name: &str) -> String {
    let basename = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);
    let cleaned: String = basename
        .chars()
        .map(|ch| match ch {
            '\0' | '"' => '_',
            _ => ch,
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        "attachment".to_string()
    } else {
        trimmed.to_string()
    }
}

fn inline_content_disposition(filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    ))
}

#[cfg(test)]
mod tests {
    use super::{inline_content_disposition, sanitize_filename};

    #[test]
    fn strips_path_components() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("a/b\\c.txt"), "c.txt");
    }

    #[test]
    fn falls_back_when_filename_is_all_dots() {
        assert_eq!(sanitize_filename("..."), "attachment");
    }

    #[test]
    fn encodes_content_disposition() {
        let header = inline_content_disposition("über report.pdf");
        assert!(header
            .as_deref()
            .is_some_and(|value| value.contains("filename*=UTF-8''")));
        assert!(inline_content_disposition("").is_none());
    }
}
