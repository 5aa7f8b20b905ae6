use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use models::{
    Solution, SolutionStatus, Target, ThreadStatus, VoteTally,
    payloads::{
        CreateSolutionRequest, SolutionListQuery, SolutionStatusRequest, UpdateSolutionRequest,
    },
};
use tracing::info;
use uuid::Uuid;

use super::{
    Id, Params, Payload, Shared, purge_objects, solution_or_404, thread_or_404,
    threads::{CONTENT_MAX, TITLE_MAX, TITLE_MIN},
};
use crate::{
    auth::AuthUser,
    error::AppError,
    utils::{require_len, validate_trl},
};

/// Reputation for having a solution accepted.
pub const ACCEPT_REPUTATION: i64 = 15;

pub async fn create(
    State(state): Shared,
    caller: AuthUser,
    Id(thread_id): Id,
    Payload(payload): Payload<CreateSolutionRequest>,
) -> Result<(StatusCode, Json<Solution>), AppError> {
    let thread = thread_or_404(&state, thread_id).await?;
    if !thread.accepts_solutions() {
        return Err(AppError::conflict("thread is not accepting solutions"));
    }

    let now = Utc::now();
    let solution = Solution {
        id: Uuid::new_v4(),
        thread_id,
        author_id: caller.id(),
        title: require_len("title", &payload.title, TITLE_MIN, TITLE_MAX)?,
        content: require_len("content", &payload.content, 1, CONTENT_MAX)?,
        trl: validate_trl(payload.trl)?,
        status: SolutionStatus::Pending,
        is_accepted: false,
        votes: VoteTally::default(),
        comment_count: 0,
        created_at: now,
        updated_at: now,
    };

    state.db.insert_solution(&solution).await?;
    info!("Solution {} posted on thread {thread_id}", solution.id);

    Ok((StatusCode::CREATED, Json(solution)))
}

pub async fn list(
    State(state): Shared,
    Id(thread_id): Id,
    Params(query): Params<SolutionListQuery>,
) -> Result<Json<Vec<Solution>>, AppError> {
    thread_or_404(&state, thread_id).await?;

    Ok(Json(state.db.list_solutions(thread_id, query.sort).await?))
}

pub async fn fetch(State(state): Shared, Id(id): Id) -> Result<Json<Solution>, AppError> {
    Ok(Json(solution_or_404(&state, id).await?))
}

pub async fn update(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
    Payload(payload): Payload<UpdateSolutionRequest>,
) -> Result<Json<Solution>, AppError> {
    let mut solution = solution_or_404(&state, id).await?;
    caller.require_owner(solution.author_id)?;

    let thread = thread_or_404(&state, solution.thread_id).await?;
    if thread.is_locked && !caller.is_moderator() {
        return Err(AppError::Forbidden);
    }

    if let Some(title) = payload.title {
        solution.title = require_len("title", &title, TITLE_MIN, TITLE_MAX)?;
    }
    if let Some(content) = payload.content {
        solution.content = require_len("content", &content, 1, CONTENT_MAX)?;
    }
    if payload.trl.is_some() {
        solution.trl = validate_trl(payload.trl)?;
    }
    solution.updated_at = Utc::now();

    state.db.save_solution(&solution).await?;
    Ok(Json(solution))
}

pub async fn remove(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
) -> Result<StatusCode, AppError> {
    let solution = solution_or_404(&state, id).await?;
    caller.require_owner(solution.author_id)?;

    let attachments = state.db.list_attachments(Target::solution(id)).await?;
    state.db.delete_solution(id).await?;
    purge_objects(&state, &attachments).await;

    if solution.is_accepted {
        state
            .db
            .adjust_reputation(solution.author_id, -ACCEPT_REPUTATION)
            .await?;
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Thread author picks the answer. A previously accepted solution loses the
/// flag and its author gives back the reputation.
pub async fn accept(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
) -> Result<Json<Solution>, AppError> {
    let mut solution = solution_or_404(&state, id).await?;
    let mut thread = thread_or_404(&state, solution.thread_id).await?;

    if thread.author_id != caller.id() || solution.author_id == caller.id() {
        return Err(AppError::Forbidden);
    }
    if thread.accepted_solution_id == Some(id) {
        return Ok(Json(solution));
    }

    if let Some(previous_id) = thread.accepted_solution_id {
        if let Some(mut previous) = state.db.get_solution(previous_id).await? {
            previous.is_accepted = false;
            previous.updated_at = Utc::now();
            state.db.save_solution(&previous).await?;
            state
                .db
                .adjust_reputation(previous.author_id, -ACCEPT_REPUTATION)
                .await?;
        }
    }

    solution.is_accepted = true;
    solution.updated_at = Utc::now();
    state.db.save_solution(&solution).await?;

    thread.accepted_solution_id = Some(id);
    thread.status = ThreadStatus::Solved;
    thread.updated_at = solution.updated_at;
    state.db.save_thread(&thread).await?;

    state
        .db
        .adjust_reputation(solution.author_id, ACCEPT_REPUTATION)
        .await?;

    info!("Solution {id} accepted on thread {}", thread.id);
    Ok(Json(solution))
}

pub async fn set_status(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
    Payload(payload): Payload<SolutionStatusRequest>,
) -> Result<Json<Solution>, AppError> {
    caller.require_moderator()?;
    if payload.status == SolutionStatus::Pending {
        return Err(AppError::validation("status must be approved or rejected"));
    }

    let mut solution = solution_or_404(&state, id).await?;
    solution.status = payload.status;
    solution.updated_at = Utc::now();
    state.db.save_solution(&solution).await?;

    Ok(Json(solution))
}
