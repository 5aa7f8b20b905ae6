use axum::{Json, extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use models::{
    Target, Thread, ThreadStatus, VoteTally,
    payloads::{
        CreateThreadRequest, ModerateThreadRequest, Page, ThreadListQuery, UpdateThreadRequest,
    },
};
use tracing::{info, warn};
use uuid::Uuid;

use super::{Id, Params, Payload, Shared, page, purge_objects, thread_or_404};
use crate::{
    auth::AuthUser,
    database::{ThreadFilter, page_window},
    error::AppError,
    utils::{normalize_tags, require_len, sanitize, validate_trl},
};

pub const TITLE_MIN: usize = 5;
pub const TITLE_MAX: usize = 200;
pub const CONTENT_MAX: usize = 20_000;

pub fn future_deadline(
    deadline: Option<DateTime<Utc>>,
) -> Result<Option<DateTime<Utc>>, AppError> {
    match deadline {
        Some(deadline) if deadline <= Utc::now() => {
            Err(AppError::validation("deadline must be in the future"))
        }
        other => Ok(other),
    }
}

pub async fn create(
    State(state): Shared,
    caller: AuthUser,
    Payload(payload): Payload<CreateThreadRequest>,
) -> Result<(StatusCode, Json<Thread>), AppError> {
    let now = Utc::now();
    let thread = Thread {
        id: Uuid::new_v4(),
        author_id: caller.id(),
        title: require_len("title", &payload.title, TITLE_MIN, TITLE_MAX)?,
        content: require_len("content", &payload.content, 1, CONTENT_MAX)?,
        category: payload.category,
        tags: normalize_tags(&payload.tags)?,
        status: ThreadStatus::Open,
        urgency: payload.urgency,
        trl: validate_trl(payload.trl)?,
        deadline: future_deadline(payload.deadline)?,
        is_pinned: false,
        is_locked: false,
        accepted_solution_id: None,
        votes: VoteTally::default(),
        views: 0,
        solution_count: 0,
        comment_count: 0,
        created_at: now,
        updated_at: now,
    };

    state.db.insert_thread(&thread).await?;
    info!("Thread {} created by {}", thread.id, thread.author_id);

    Ok((StatusCode::CREATED, Json(thread)))
}

pub async fn list(
    State(state): Shared,
    Params(query): Params<ThreadListQuery>,
) -> Result<Json<Page<Thread>>, AppError> {
    let (page_number, limit, offset) = page_window(query.page, query.limit);
    let filter = ThreadFilter {
        category: query.category,
        status: query.status,
        tag: query.tag.map(|tag| sanitize(&tag)).filter(|tag| !tag.is_empty()),
        author: query.author,
        sort: query.sort,
    };

    let (threads, total) = state
        .db
        .list_threads(&filter, offset, limit as usize)
        .await?;

    Ok(Json(page(threads, page_number, limit, total)))
}

/// Counts a view on every fetch.
pub async fn fetch(State(state): Shared, Id(id): Id) -> Result<Json<Thread>, AppError> {
    let mut thread = thread_or_404(&state, id).await?;
    thread.views = state.db.record_view(id).await?;

    Ok(Json(thread))
}

pub async fn update(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
    Payload(payload): Payload<UpdateThreadRequest>,
) -> Result<Json<Thread>, AppError> {
    let mut thread = thread_or_404(&state, id).await?;
    caller.require_owner(thread.author_id)?;
    if thread.is_locked && !caller.is_moderator() {
        return Err(AppError::Forbidden);
    }

    if let Some(title) = payload.title {
        thread.title = require_len("title", &title, TITLE_MIN, TITLE_MAX)?;
    }
    if let Some(content) = payload.content {
        thread.content = require_len("content", &content, 1, CONTENT_MAX)?;
    }
    if let Some(category) = payload.category {
        thread.category = category;
    }
    if let Some(tags) = payload.tags {
        thread.tags = normalize_tags(&tags)?;
    }
    if let Some(status) = payload.status {
        thread.status = status;
    }
    if let Some(urgency) = payload.urgency {
        thread.urgency = urgency;
    }
    if payload.trl.is_some() {
        thread.trl = validate_trl(payload.trl)?;
    }
    if payload.deadline.is_some() {
        thread.deadline = future_deadline(payload.deadline)?;
    }
    thread.updated_at = Utc::now();

    state.db.save_thread(&thread).await?;
    Ok(Json(thread))
}

/// Removes the thread with everything under it, then its stored objects and
/// its search document.
pub async fn remove(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
) -> Result<StatusCode, AppError> {
    let thread = thread_or_404(&state, id).await?;
    caller.require_owner(thread.author_id)?;

    let mut attachments = state.db.list_attachments(Target::thread(id)).await?;
    for solution in state.db.list_solutions(id, Default::default()).await? {
        attachments.extend(
            state
                .db
                .list_attachments(Target::solution(solution.id))
                .await?,
        );
    }

    state.db.delete_thread(id).await?;
    purge_objects(&state, &attachments).await;
    if let Err(e) = state.search.remove(id).await {
        warn!("Thread {id} left in search index: {e}");
    }

    info!("Thread {id} deleted by {}", caller.id());
    Ok(StatusCode::NO_CONTENT)
}

pub async fn moderate(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
    Payload(payload): Payload<ModerateThreadRequest>,
) -> Result<Json<Thread>, AppError> {
    caller.require_moderator()?;
    let mut thread = thread_or_404(&state, id).await?;

    if let Some(pinned) = payload.is_pinned {
        thread.is_pinned = pinned;
    }
    if let Some(locked) = payload.is_locked {
        thread.is_locked = locked;
    }
    thread.updated_at = Utc::now();

    state.db.save_thread(&thread).await?;
    info!(
        "Thread {id} pinned={} locked={} by {}",
        thread.is_pinned,
        thread.is_locked,
        caller.id()
    );
    Ok(Json(thread))
}
