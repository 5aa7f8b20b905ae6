use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use models::{
    Role, User, UserView,
    payloads::{AuthResponse, LoginRequest, RefreshRequest, RegisterRequest},
};
use tracing::info;
use uuid::Uuid;

use super::{Payload, Shared};
use crate::{
    auth::{
        AuthUser, TokenKind, check_token, hash_password, issue_pair, start_session,
        verify_password,
    },
    error::AppError,
    utils::{normalize_email, optional_len, require_len, validate_password, validate_username},
};

pub async fn register(
    State(state): Shared,
    Payload(payload): Payload<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = normalize_email(&payload.email)?;
    let username = validate_username(&payload.username)?;
    let full_name = require_len("fullName", &payload.full_name, 1, 100)?;
    let organization = optional_len("organization", payload.organization.as_deref(), 100)?;
    validate_password(&payload.password)?;

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        email,
        username,
        full_name,
        password_hash: hash_password(&payload.password)?,
        role: Role::User,
        organization,
        bio: None,
        reputation: 0,
        banned: false,
        created_at: now,
        updated_at: now,
    };
    state.db.create_user(&user).await?;
    info!("Registered user {}", user.id);

    let tokens = start_session(&state, &user).await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: user.private(),
            tokens,
        }),
    ))
}

pub async fn login(
    State(state): Shared,
    Payload(payload): Payload<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = normalize_email(&payload.email).map_err(|_| AppError::Unauthorized)?;
    let config = &state.config;

    if state.db.login_failures(&email).await? >= config.login_max_attempts {
        return Err(AppError::TooManyRequests);
    }

    let user = state.db.find_user_by_email(&email).await?;
    let Some(user) = user.filter(|user| verify_password(&payload.password, &user.password_hash))
    else {
        state
            .db
            .record_login_failure(&email, config.login_window_secs)
            .await?;
        return Err(AppError::Unauthorized);
    };

    if user.banned {
        return Err(AppError::Forbidden);
    }

    state.db.clear_login_failures(&email).await?;
    let tokens = start_session(&state, &user).await?;

    Ok(Json(AuthResponse {
        user: user.private(),
        tokens,
    }))
}

/// Rotates the refresh token inside the same session.
pub async fn refresh(
    State(state): Shared,
    Payload(payload): Payload<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let claims = check_token(&state, &payload.refresh_token, TokenKind::Refresh).await?;

    let user = state
        .db
        .get_user(claims.sub)
        .await?
        .ok_or(AppError::Unauthorized)?;
    if user.banned {
        return Err(AppError::Forbidden);
    }

    // Racing refreshes with the same token: only the first gets a new pair.
    if !state
        .db
        .claim_token(claims.jti, claims.remaining_secs())
        .await?
    {
        return Err(AppError::Unauthorized);
    }

    Ok(Json(issue_pair(&state, &user, claims.sid)?))
}

pub async fn logout(State(state): Shared, caller: AuthUser) -> Result<StatusCode, AppError> {
    let claims = &caller.claims;

    state
        .db
        .blacklist_token(claims.jti, claims.remaining_secs())
        .await?;
    state.db.delete_session(claims.sid).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(caller: AuthUser) -> Json<UserView> {
    Json(caller.user.private())
}
