use axum::{Json, extract::State};
use chrono::Utc;
use models::{
    Thread, UserView,
    payloads::{BanRequest, LeaderboardQuery, Page, PageQuery, UpdateProfileRequest},
};
use tracing::info;

use super::{Id, Params, Payload, Shared, page, user_or_404};
use crate::{
    auth::AuthUser,
    database::{ThreadFilter, UserPatch, page_window},
    error::AppError,
    utils::{optional_len, require_len},
};

pub async fn profile(State(state): Shared, Id(id): Id) -> Result<Json<UserView>, AppError> {
    Ok(Json(user_or_404(&state, id).await?.public()))
}

/// `None` leaves a field alone, an empty string clears organization and bio.
pub async fn update_me(
    State(state): Shared,
    caller: AuthUser,
    Payload(payload): Payload<UpdateProfileRequest>,
) -> Result<Json<UserView>, AppError> {
    let mut patch = UserPatch::new(Utc::now());

    if let Some(full_name) = payload.full_name {
        patch.full_name = Some(require_len("fullName", &full_name, 1, 100)?);
    }
    if let Some(organization) = payload.organization {
        patch.organization = Some(optional_len("organization", Some(&organization), 100)?);
    }
    if let Some(bio) = payload.bio {
        patch.bio = Some(optional_len("bio", Some(&bio), 1000)?);
    }

    let user = state
        .db
        .patch_user(caller.id(), &patch)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    Ok(Json(user.private()))
}

pub async fn threads(
    State(state): Shared,
    Id(id): Id,
    Params(query): Params<PageQuery>,
) -> Result<Json<Page<Thread>>, AppError> {
    user_or_404(&state, id).await?;

    let (page_number, limit, offset) = page_window(query.page, query.limit);
    let filter = ThreadFilter {
        author: Some(id),
        ..Default::default()
    };
    let (threads, total) = state
        .db
        .list_threads(&filter, offset, limit as usize)
        .await?;

    Ok(Json(page(threads, page_number, limit, total)))
}

pub async fn leaderboard(
    State(state): Shared,
    Params(query): Params<LeaderboardQuery>,
) -> Result<Json<Vec<UserView>>, AppError> {
    let limit = query.limit.unwrap_or(10).clamp(1, 100) as usize;
    let users = state.db.leaderboard(limit).await?;

    Ok(Json(users.iter().map(|user| user.public()).collect()))
}

pub async fn ban(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
    Payload(payload): Payload<BanRequest>,
) -> Result<Json<UserView>, AppError> {
    caller.require_admin()?;
    if id == caller.id() {
        return Err(AppError::validation("admins cannot ban themselves"));
    }

    let mut patch = UserPatch::new(Utc::now());
    patch.banned = Some(payload.banned);
    let user = state
        .db
        .patch_user(id, &patch)
        .await?
        .ok_or(AppError::NotFound("user"))?;

    info!("User {id} banned={} by {}", user.banned, caller.id());
    Ok(Json(user.public()))
}
