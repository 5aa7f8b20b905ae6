use axum::{Json, extract::State};
use models::{
    Target, VoteKind, VoteOutcome,
    payloads::{MyVote, VoteRequest},
};

use super::{Id, Payload, Scope, Shared, target_author};
use crate::{auth::AuthUser, error::AppError, state::State as AppState, votes::VoteTransition};

async fn apply(
    state: &AppState,
    caller: &AuthUser,
    target: Target,
    request: Option<VoteKind>,
) -> Result<VoteOutcome, AppError> {
    let author = target_author(state, target).await?;
    if author == caller.id() {
        return Err(AppError::Forbidden);
    }

    let outcome = state.db.apply_vote(caller.id(), target, request).await?;

    let delta = VoteTransition::resolve(outcome.previous, request).score_delta();
    if delta != 0 {
        state.db.adjust_reputation(author, delta).await?;
    }

    Ok(outcome)
}

/// Same kind twice withdraws, the other kind switches.
pub async fn cast<S: Scope>(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
    Payload(payload): Payload<VoteRequest>,
) -> Result<Json<VoteOutcome>, AppError> {
    Ok(Json(
        apply(&state, &caller, S::target(id), Some(payload.kind)).await?,
    ))
}

pub async fn withdraw<S: Scope>(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
) -> Result<Json<VoteOutcome>, AppError> {
    Ok(Json(apply(&state, &caller, S::target(id), None).await?))
}

pub async fn mine<S: Scope>(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
) -> Result<Json<MyVote>, AppError> {
    let target = S::target(id);
    target_author(&state, target).await?;

    Ok(Json(MyVote {
        vote: state.db.get_vote(caller.id(), target).await?,
    }))
}
