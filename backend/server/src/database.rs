//! # Store
//!
//! Primary persistence for the forum.
//!
//! Two implementations sit behind [`Database`]:
//! - [`RedisDatabase`]: production. Records are JSON strings, counters live in
//!   per-record hashes so they can be bumped atomically, listings are sorted
//!   sets, filters are plain sets intersected on demand.
//! - [`MemoryDatabase`]: a single mutex around hash maps. Local development
//!   and tests.
//!
//! ## Redis layout
//!
//! | key | type | contents |
//! |---|---|---|
//! | `user:{id}` | string | user JSON |
//! | `user:email:{email}` / `user:username:{name}` | string | user id, set with NX for uniqueness |
//! | `users:reputation` | zset | user id by reputation, source of truth for reputation |
//! | `session:{sid}` / `blacklist:{jti}` | string + TTL | user id / marker |
//! | `login_failures:{email}` | counter + TTL | failed logins in the current window |
//! | `thread:{id}`, `solution:{id}`, `comment:{id}` | string | record JSON |
//! | `counts:{kind}:{id}` | hash | upvotes, downvotes, views, solutions, comments |
//! | `votes:{kind}:{id}` | hash | user id to `up`/`down` |
//! | `threads:created` / `threads:score` / `threads:views` | zset | thread ordering |
//! | `threads:{category,status,tag,author}:{value}` | set | filters |
//! | `thread:{id}:solutions` / `thread:{id}:solutions:score` | zset | solution ordering |
//! | `comments:{kind}:{id}` / `attachments:{kind}:{id}` | zset | children by creation time |
//! | `thread:{id}:bounties` | zset | bounties by creation time |
//! | `search:dirty` | set | threads waiting for the search sync |
//!
//! Counters stored inside the record JSON are ignored on read, the hash wins.
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use models::{
    Attachment, Bounty, BountyStatus, Category, Comment, Role, Solution, Target, TargetKind,
    Thread, ThreadStatus, User, VoteKind, VoteOutcome,
    payloads::{SolutionSort, ThreadSort},
};
use redis::{
    Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

mod memory;
mod redis_store;

pub use memory::MemoryDatabase;
pub use redis_store::RedisDatabase;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("corrupt record {0}")]
    Corrupt(String),

    #[error("{0} already taken")]
    Duplicate(&'static str),

    #[error("{0} not found")]
    Missing(&'static str),
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Corrupt(err.to_string())
    }
}

#[derive(Clone, Debug, Default)]
pub struct ThreadFilter {
    pub category: Option<Category>,
    pub status: Option<ThreadStatus>,
    pub tag: Option<String>,
    pub author: Option<Uuid>,
    pub sort: ThreadSort,
}

/// Fields to overwrite on a stored user, everything else is left as stored.
/// `Some(None)` clears an optional field.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banned: Option<bool>,
    pub updated_at: DateTime<Utc>,
}

impl UserPatch {
    pub fn new(updated_at: DateTime<Utc>) -> Self {
        Self {
            full_name: None,
            organization: None,
            bio: None,
            role: None,
            banned: None,
            updated_at,
        }
    }

    pub fn apply(&self, user: &mut User) {
        if let Some(full_name) = &self.full_name {
            user.full_name = full_name.clone();
        }
        if let Some(organization) = &self.organization {
            user.organization = organization.clone();
        }
        if let Some(bio) = &self.bio {
            user.bio = bio.clone();
        }
        if let Some(role) = self.role {
            user.role = role;
        }
        if let Some(banned) = self.banned {
            user.banned = banned;
        }
        user.updated_at = self.updated_at;
    }
}

#[async_trait]
pub trait Database: Send + Sync {
    async fn ping(&self) -> Result<(), DbError>;

    /// Fails with [`DbError::Duplicate`] when the email or username is taken.
    async fn create_user(&self, user: &User) -> Result<(), DbError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, DbError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DbError>;
    /// Applies `patch` to the stored record in one step and returns the
    /// result, `None` if the user is gone. Reputation goes through
    /// [`Database::adjust_reputation`].
    async fn patch_user(&self, id: Uuid, patch: &UserPatch) -> Result<Option<User>, DbError>;
    async fn adjust_reputation(&self, id: Uuid, delta: i64) -> Result<(), DbError>;
    async fn leaderboard(&self, limit: usize) -> Result<Vec<User>, DbError>;

    async fn create_session(&self, session_id: Uuid, user_id: Uuid, ttl_secs: u64)
    -> Result<(), DbError>;
    async fn session_user(&self, session_id: Uuid) -> Result<Option<Uuid>, DbError>;
    async fn delete_session(&self, session_id: Uuid) -> Result<(), DbError>;
    async fn blacklist_token(&self, jti: Uuid, ttl_secs: u64) -> Result<(), DbError>;
    /// Blacklists `jti` only if it is not already. Returns whether this call
    /// did it, so exactly one of several racing callers wins.
    async fn claim_token(&self, jti: Uuid, ttl_secs: u64) -> Result<bool, DbError>;
    async fn is_blacklisted(&self, jti: Uuid) -> Result<bool, DbError>;
    /// Returns the failure count inside the current window.
    async fn record_login_failure(&self, key: &str, window_secs: u64) -> Result<u64, DbError>;
    async fn login_failures(&self, key: &str) -> Result<u64, DbError>;
    async fn clear_login_failures(&self, key: &str) -> Result<(), DbError>;

    async fn insert_thread(&self, thread: &Thread) -> Result<(), DbError>;
    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>, DbError>;
    /// Rewrites the record and its filter memberships. Counters are untouched.
    async fn save_thread(&self, thread: &Thread) -> Result<(), DbError>;
    /// Removes the thread with every solution, comment, vote, bounty and
    /// attachment record under it.
    async fn delete_thread(&self, id: Uuid) -> Result<(), DbError>;
    async fn list_threads(
        &self,
        filter: &ThreadFilter,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Thread>, u64), DbError>;
    async fn record_view(&self, id: Uuid) -> Result<i64, DbError>;
    async fn take_dirty_threads(&self) -> Result<Vec<Uuid>, DbError>;
    /// Queues threads for the next search sync.
    async fn mark_dirty(&self, ids: &[Uuid]) -> Result<(), DbError>;

    /// Also bumps the thread's solution count.
    async fn insert_solution(&self, solution: &Solution) -> Result<(), DbError>;
    async fn get_solution(&self, id: Uuid) -> Result<Option<Solution>, DbError>;
    async fn save_solution(&self, solution: &Solution) -> Result<(), DbError>;
    /// Cascades to comments, votes and attachment records.
    async fn delete_solution(&self, id: Uuid) -> Result<(), DbError>;
    async fn list_solutions(
        &self,
        thread_id: Uuid,
        sort: SolutionSort,
    ) -> Result<Vec<Solution>, DbError>;

    /// Also bumps the target's comment count.
    async fn insert_comment(&self, comment: &Comment) -> Result<(), DbError>;
    async fn get_comment(&self, id: Uuid) -> Result<Option<Comment>, DbError>;
    async fn save_comment(&self, comment: &Comment) -> Result<(), DbError>;
    async fn list_comments(
        &self,
        target: Target,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Comment>, u64), DbError>;

    /// `Some(kind)` toggles towards `kind`, `None` withdraws. The vote record,
    /// the counters and the ranking move together.
    async fn apply_vote(
        &self,
        user_id: Uuid,
        target: Target,
        request: Option<VoteKind>,
    ) -> Result<VoteOutcome, DbError>;
    async fn get_vote(&self, user_id: Uuid, target: Target) -> Result<Option<VoteKind>, DbError>;
    /// Every id of a kind, for operator tooling.
    async fn list_ids(&self, kind: TargetKind) -> Result<Vec<Uuid>, DbError>;
    /// Rebuilds the counters of `target` from its vote records. Returns
    /// whether anything had drifted.
    async fn recount_votes(&self, target: Target) -> Result<bool, DbError>;

    async fn insert_bounty(&self, bounty: &Bounty) -> Result<(), DbError>;
    async fn get_bounty(&self, id: Uuid) -> Result<Option<Bounty>, DbError>;
    async fn list_bounties(&self, thread_id: Uuid) -> Result<Vec<Bounty>, DbError>;
    /// Stores `bounty` only if the stored status is still `from`.
    async fn transition_bounty(&self, from: BountyStatus, bounty: &Bounty)
    -> Result<bool, DbError>;

    async fn insert_attachment(&self, attachment: &Attachment) -> Result<(), DbError>;
    async fn get_attachment(&self, id: Uuid) -> Result<Option<Attachment>, DbError>;
    async fn list_attachments(&self, target: Target) -> Result<Vec<Attachment>, DbError>;
    async fn delete_attachment(&self, id: Uuid) -> Result<(), DbError>;
}

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, DbError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url)?;
    let connection_manager = client.get_connection_manager_with_config(config).await?;

    Ok(connection_manager)
}

/// Offset and limit from 1-based page numbers. Limit is clamped to 1..=100.
pub fn page_window(page: Option<u32>, limit: Option<u32>) -> (u32, u32, usize) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(20).clamp(1, 100);
    let offset = (page as usize - 1) * limit as usize;

    (page, limit, offset)
}

#[cfg(test)]
mod tests {
    use super::page_window;

    #[test]
    fn page_window_defaults_and_clamps() {
        assert_eq!(page_window(None, None), (1, 20, 0));
        assert_eq!(page_window(Some(0), Some(0)), (1, 1, 0));
        assert_eq!(page_window(Some(3), Some(500)), (3, 100, 200));
        assert_eq!(page_window(Some(2), Some(10)), (2, 10, 10));
    }
}
