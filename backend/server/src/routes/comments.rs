use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use models::{
    Comment, VoteTally,
    payloads::{CreateCommentRequest, Page, PageQuery, UpdateCommentRequest},
};
use uuid::Uuid;

use super::{Id, Params, Payload, Scope, Shared, comment_or_404, home_thread, page};
use crate::{auth::AuthUser, database::page_window, error::AppError, utils::require_len};

pub const COMMENT_MAX: usize = 5000;

pub async fn create<S: Scope>(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
    Payload(payload): Payload<CreateCommentRequest>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    let target = S::target(id);
    if home_thread(&state, target).await?.is_locked {
        return Err(AppError::conflict("thread is locked"));
    }

    let content = require_len("content", &payload.content, 1, COMMENT_MAX)?;
    if let Some(parent_id) = payload.parent_id {
        let parent = comment_or_404(&state, parent_id).await?;
        if parent.target != target {
            return Err(AppError::validation("parent comment belongs elsewhere"));
        }
    }

    let now = Utc::now();
    let comment = Comment {
        id: Uuid::new_v4(),
        author_id: caller.id(),
        target,
        parent_id: payload.parent_id,
        content,
        is_edited: false,
        is_deleted: false,
        votes: VoteTally::default(),
        created_at: now,
        updated_at: now,
    };
    state.db.insert_comment(&comment).await?;

    Ok((StatusCode::CREATED, Json(comment)))
}

/// Oldest first, flat. Clients rebuild threads of replies from `parentId`.
pub async fn list<S: Scope>(
    State(state): Shared,
    Id(id): Id,
    Params(query): Params<PageQuery>,
) -> Result<Json<Page<Comment>>, AppError> {
    let target = S::target(id);
    home_thread(&state, target).await?;

    let (page_number, limit, offset) = page_window(query.page, query.limit);
    let (comments, total) = state
        .db
        .list_comments(target, offset, limit as usize)
        .await?;

    Ok(Json(page(comments, page_number, limit, total)))
}

pub async fn update(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
    Payload(payload): Payload<UpdateCommentRequest>,
) -> Result<Json<Comment>, AppError> {
    let mut comment = comment_or_404(&state, id).await?;
    if comment.author_id != caller.id() {
        return Err(AppError::Forbidden);
    }
    if comment.is_deleted {
        return Err(AppError::conflict("comment was deleted"));
    }

    comment.content = require_len("content", &payload.content, 1, COMMENT_MAX)?;
    comment.is_edited = true;
    comment.updated_at = Utc::now();
    state.db.save_comment(&comment).await?;

    Ok(Json(comment))
}

/// Soft delete, replies keep pointing at a placeholder.
pub async fn remove(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
) -> Result<StatusCode, AppError> {
    let mut comment = comment_or_404(&state, id).await?;
    caller.require_owner(comment.author_id)?;

    if !comment.is_deleted {
        comment.content.clear();
        comment.is_deleted = true;
        comment.updated_at = Utc::now();
        state.db.save_comment(&comment).await?;
    }

    Ok(StatusCode::NO_CONTENT)
}
