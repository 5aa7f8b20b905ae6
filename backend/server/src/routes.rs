//! HTTP surface. Everything except `/health` is nested under `/api`.
use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{
        HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
        request::Parts,
    },
    response::IntoResponse,
    routing::{delete, get, patch, post},
};
use models::{
    Attachment, Bounty, Comment, Solution, Target, TargetKind, Thread, User, payloads::Page,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;
use uuid::Uuid;

use crate::{error::AppError, state::State as AppState};

pub mod attachments;
pub mod auth;
pub mod bounties;
pub mod comments;
pub mod search;
pub mod solutions;
pub mod threads;
pub mod users;
pub mod votes;

pub type Shared = State<Arc<AppState>>;

/// Files accepted in one multipart upload.
pub const MAX_FILES_PER_UPLOAD: usize = 10;

pub fn router(state: Arc<AppState>) -> Router {
    let upload_limit = DefaultBodyLimit::max(
        state
            .config
            .max_upload_bytes
            .saturating_mul(MAX_FILES_PER_UPLOAD)
            .saturating_add(64 * 1024),
    );

    let api = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/users/me", patch(users::update_me))
        .route("/users/{id}", get(users::profile))
        .route("/users/{id}/threads", get(users::threads))
        .route("/users/{id}/ban", patch(users::ban))
        .route("/leaderboard", get(users::leaderboard))
        .route("/threads", post(threads::create).get(threads::list))
        .route(
            "/threads/{id}",
            get(threads::fetch)
                .patch(threads::update)
                .delete(threads::remove),
        )
        .route("/threads/{id}/moderation", patch(threads::moderate))
        .route(
            "/threads/{id}/solutions",
            post(solutions::create).get(solutions::list),
        )
        .route(
            "/solutions/{id}",
            get(solutions::fetch)
                .patch(solutions::update)
                .delete(solutions::remove),
        )
        .route("/solutions/{id}/accept", post(solutions::accept))
        .route("/solutions/{id}/status", patch(solutions::set_status))
        .route(
            "/threads/{id}/comments",
            post(comments::create::<OnThread>).get(comments::list::<OnThread>),
        )
        .route(
            "/solutions/{id}/comments",
            post(comments::create::<OnSolution>).get(comments::list::<OnSolution>),
        )
        .route(
            "/comments/{id}",
            patch(comments::update).delete(comments::remove),
        )
        .route(
            "/threads/{id}/vote",
            post(votes::cast::<OnThread>)
                .delete(votes::withdraw::<OnThread>)
                .get(votes::mine::<OnThread>),
        )
        .route(
            "/solutions/{id}/vote",
            post(votes::cast::<OnSolution>)
                .delete(votes::withdraw::<OnSolution>)
                .get(votes::mine::<OnSolution>),
        )
        .route(
            "/comments/{id}/vote",
            post(votes::cast::<OnComment>)
                .delete(votes::withdraw::<OnComment>)
                .get(votes::mine::<OnComment>),
        )
        .route(
            "/threads/{id}/bounties",
            post(bounties::create).get(bounties::list),
        )
        .route("/bounties/{id}/award", post(bounties::award))
        .route("/bounties/{id}/cancel", post(bounties::cancel))
        .route(
            "/threads/{id}/attachments",
            post(attachments::upload::<OnThread>)
                .layer(upload_limit.clone())
                .get(attachments::list::<OnThread>),
        )
        .route(
            "/solutions/{id}/attachments",
            post(attachments::upload::<OnSolution>)
                .layer(upload_limit)
                .get(attachments::list::<OnSolution>),
        )
        .route("/attachments/{id}/url", get(attachments::url))
        .route("/attachments/{id}", delete(attachments::remove))
        .route("/search", get(search::search));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(cors(&state.config.frontend_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors(frontend_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    match HeaderValue::from_str(frontend_url) {
        Ok(origin) => cors.allow_origin(origin),
        Err(e) => {
            warn!("Ignoring FRONTEND_URL {frontend_url}: {e}");
            cors
        }
    }
}

pub async fn health(State(state): Shared) -> Result<impl IntoResponse, AppError> {
    state.db.ping().await.map_err(|e| {
        warn!("Health check failed: {e}");
        AppError::Unavailable
    })?;

    Ok(Json(json!({ "status": "ok" })))
}

/// JSON body whose rejection is an [`AppError`].
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// Query string whose rejection is an [`AppError`].
pub struct Params<T>(pub T);

impl<S, T> FromRequestParts<S> for Params<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// The `{id}` path segment.
pub struct Id(pub Uuid);

impl<S> FromRequestParts<S> for Id
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<Uuid>::from_request_parts(parts, state).await?;
        Ok(Self(id))
    }
}

/// Which kind of record a shared handler works on.
pub trait Scope: Send + Sync + 'static {
    const KIND: TargetKind;

    fn target(id: Uuid) -> Target {
        Target {
            kind: Self::KIND,
            id,
        }
    }
}

pub struct OnThread;
pub struct OnSolution;
pub struct OnComment;

impl Scope for OnThread {
    const KIND: TargetKind = TargetKind::Thread;
}

impl Scope for OnSolution {
    const KIND: TargetKind = TargetKind::Solution;
}

impl Scope for OnComment {
    const KIND: TargetKind = TargetKind::Comment;
}

pub async fn user_or_404(state: &AppState, id: Uuid) -> Result<User, AppError> {
    state.db.get_user(id).await?.ok_or(AppError::NotFound("user"))
}

pub async fn thread_or_404(state: &AppState, id: Uuid) -> Result<Thread, AppError> {
    state
        .db
        .get_thread(id)
        .await?
        .ok_or(AppError::NotFound("thread"))
}

pub async fn solution_or_404(state: &AppState, id: Uuid) -> Result<Solution, AppError> {
    state
        .db
        .get_solution(id)
        .await?
        .ok_or(AppError::NotFound("solution"))
}

pub async fn comment_or_404(state: &AppState, id: Uuid) -> Result<Comment, AppError> {
    state
        .db
        .get_comment(id)
        .await?
        .ok_or(AppError::NotFound("comment"))
}

pub async fn bounty_or_404(state: &AppState, id: Uuid) -> Result<Bounty, AppError> {
    state
        .db
        .get_bounty(id)
        .await?
        .ok_or(AppError::NotFound("bounty"))
}

pub async fn attachment_or_404(state: &AppState, id: Uuid) -> Result<Attachment, AppError> {
    state
        .db
        .get_attachment(id)
        .await?
        .ok_or(AppError::NotFound("attachment"))
}

/// Author of the record behind `target`, 404 if it is gone.
pub async fn target_author(state: &AppState, target: Target) -> Result<Uuid, AppError> {
    Ok(match target.kind {
        TargetKind::Thread => thread_or_404(state, target.id).await?.author_id,
        TargetKind::Solution => solution_or_404(state, target.id).await?.author_id,
        TargetKind::Comment => comment_or_404(state, target.id).await?.author_id,
    })
}

/// The thread a thread or solution lives in.
pub async fn home_thread(state: &AppState, target: Target) -> Result<Thread, AppError> {
    match target.kind {
        TargetKind::Solution => {
            let solution = solution_or_404(state, target.id).await?;
            thread_or_404(state, solution.thread_id).await
        }
        _ => thread_or_404(state, target.id).await,
    }
}

/// Best effort object removal after the records are gone.
pub async fn purge_objects(state: &AppState, attachments: &[Attachment]) {
    for attachment in attachments {
        let keys = std::iter::once(&attachment.object_key).chain(&attachment.thumbnail_key);
        for key in keys {
            if let Err(e) = state.storage.delete(key).await {
                warn!("Orphaned object {key}: {e}");
            }
        }
    }
}

pub fn page<T>(items: Vec<T>, page: u32, limit: u32, total: u64) -> Page<T> {
    Page {
        items,
        page,
        limit,
        total,
    }
}
