use axum::{
    Json,
    extract::{Multipart, State, multipart::Field},
    http::StatusCode,
};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use models::{Attachment, AttachmentKind, Target, payloads::PresignedUrls};
use tokio::task::spawn_blocking;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    Id, MAX_FILES_PER_UPLOAD, Scope, Shared, attachment_or_404, purge_objects, target_author,
};
use crate::{
    auth::AuthUser,
    error::AppError,
    media::{THUMBNAIL_NAME, THUMBNAIL_TYPE, checksum, classify, guess_content_type, thumbnail},
    state::State as AppState,
    utils::sanitize_file_name,
};

const FILE_FIELD: &str = "file";

/// Reads a field, failing as soon as it grows past `limit`.
async fn read_limited(field: &mut Field<'_>, limit: usize) -> Result<Bytes, AppError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = field.chunk().await? {
        if buf.len() + chunk.len() > limit {
            return Err(AppError::PayloadTooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

async fn store_file(
    state: &AppState,
    owner_id: Uuid,
    target: Target,
    field: &mut Field<'_>,
) -> Result<Attachment, AppError> {
    let file_name = sanitize_file_name(field.file_name().unwrap_or_default());
    let content_type = match field.content_type() {
        Some(content_type) if content_type != "application/octet-stream" => {
            content_type.to_string()
        }
        _ => guess_content_type(&file_name).to_string(),
    };
    let kind = classify(&content_type)?;

    let bytes = read_limited(field, state.config.max_upload_bytes).await?;
    if bytes.is_empty() {
        return Err(AppError::validation(format!("{file_name} is empty")));
    }

    let id = Uuid::new_v4();
    let prefix = format!("{}/{}/{id}", target.kind.as_str(), target.id);
    let object_key = format!("{prefix}/{file_name}");

    state
        .storage
        .put(&object_key, bytes.clone(), &content_type)
        .await?;

    let mut attachment = Attachment {
        id,
        owner_id,
        target,
        file_name,
        content_type,
        size: bytes.len() as u64,
        checksum: checksum(&bytes),
        object_key,
        thumbnail_key: None,
        kind,
        created_at: Utc::now(),
    };

    if kind == AttachmentKind::Image {
        let source = bytes.clone();
        let content_type = attachment.content_type.clone();
        let preview = spawn_blocking(move || thumbnail(&source, &content_type))
            .await
            .map_err(|e| AppError::InternalError(Box::new(e)))?;

        match preview {
            Some(preview) => {
                let key = format!("{prefix}/{THUMBNAIL_NAME}");
                let put = state
                    .storage
                    .put(&key, Bytes::from(preview), THUMBNAIL_TYPE)
                    .await;
                if let Err(e) = put {
                    purge_objects(state, std::slice::from_ref(&attachment)).await;
                    return Err(e.into());
                }
                attachment.thumbnail_key = Some(key);
            }
            None => warn!("No thumbnail for undecodable image {}", attachment.id),
        }
    }

    if let Err(e) = state.db.insert_attachment(&attachment).await {
        purge_objects(state, std::slice::from_ref(&attachment)).await;
        return Err(e.into());
    }

    Ok(attachment)
}

/// Multipart upload, one or more `file` fields. Either every file is stored
/// or none is.
pub async fn upload<S: Scope>(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Vec<Attachment>>), AppError> {
    let target = S::target(id);
    caller.require_owner(target_author(&state, target).await?)?;

    let mut stored: Vec<Attachment> = Vec::new();
    let result = async {
        while let Some(mut field) = multipart.next_field().await? {
            if field.name() != Some(FILE_FIELD) {
                continue;
            }
            if stored.len() == MAX_FILES_PER_UPLOAD {
                return Err(AppError::validation(format!(
                    "at most {MAX_FILES_PER_UPLOAD} files per upload"
                )));
            }
            stored.push(store_file(&state, caller.id(), target, &mut field).await?);
        }
        Ok::<_, AppError>(())
    }
    .await;

    if let Err(e) = result {
        for attachment in &stored {
            state.db.delete_attachment(attachment.id).await?;
        }
        purge_objects(&state, &stored).await;
        return Err(e);
    }
    if stored.is_empty() {
        return Err(AppError::validation("no file in upload"));
    }

    info!("{} attachments added to {target}", stored.len());
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn list<S: Scope>(
    State(state): Shared,
    Id(id): Id,
) -> Result<Json<Vec<Attachment>>, AppError> {
    let target = S::target(id);
    target_author(&state, target).await?;

    Ok(Json(state.db.list_attachments(target).await?))
}

pub async fn url(State(state): Shared, Id(id): Id) -> Result<Json<PresignedUrls>, AppError> {
    let attachment = attachment_or_404(&state, id).await?;
    let expires_in = state.config.presign_ttl_secs;

    let thumbnail_url = attachment
        .thumbnail_key
        .as_deref()
        .map(|key| state.storage.presign_get(key, expires_in))
        .transpose()?;

    Ok(Json(PresignedUrls {
        url: state
            .storage
            .presign_get(&attachment.object_key, expires_in)?,
        thumbnail_url,
        expires_in,
    }))
}

/// Objects first so a failed delete leaves the record to retry against.
pub async fn remove(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
) -> Result<StatusCode, AppError> {
    let attachment = attachment_or_404(&state, id).await?;
    caller.require_owner(attachment.owner_id)?;

    state.storage.delete(&attachment.object_key).await?;
    if let Some(key) = &attachment.thumbnail_key {
        state.storage.delete(key).await?;
    }
    state.db.delete_attachment(id).await?;

    Ok(StatusCode::NO_CONTENT)
}
