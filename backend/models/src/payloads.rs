//! Request and response bodies.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    bounty::Bounty,
    solution::SolutionStatus,
    thread::{Category, ThreadStatus, Urgency},
    user::UserView,
    vote::VoteKind,
};

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub password: String,
    pub organization: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: UserView,
    pub tokens: TokenPair,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    pub organization: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BanRequest {
    pub banned: bool,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateThreadRequest {
    pub title: String,
    pub content: String,
    pub category: Category,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub urgency: Urgency,
    pub trl: Option<u8>,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateThreadRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<Category>,
    pub tags: Option<Vec<String>>,
    pub status: Option<ThreadStatus>,
    pub urgency: Option<Urgency>,
    pub trl: Option<u8>,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerateThreadRequest {
    pub is_pinned: Option<bool>,
    pub is_locked: Option<bool>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadSort {
    #[default]
    Newest,
    Oldest,
    Top,
    Views,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ThreadListQuery {
    pub category: Option<Category>,
    pub status: Option<ThreadStatus>,
    pub tag: Option<String>,
    pub author: Option<Uuid>,
    #[serde(default)]
    pub sort: ThreadSort,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateSolutionRequest {
    pub title: String,
    pub content: String,
    pub trl: Option<u8>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct UpdateSolutionRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub trl: Option<u8>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SolutionStatusRequest {
    pub status: SolutionStatus,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionSort {
    #[default]
    Top,
    Newest,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SolutionListQuery {
    #[serde(default)]
    pub sort: SolutionSort,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub content: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateCommentRequest {
    pub content: String,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct VoteRequest {
    #[serde(rename = "type")]
    pub kind: VoteKind,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyVote {
    pub vote: Option<VoteKind>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateBountyRequest {
    pub amount: u64,
    pub currency: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardBountyRequest {
    pub solution_id: Uuid,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BountyList {
    pub bounties: Vec<Bounty>,
    /// Sum of active bounty amounts, keyed by currency.
    pub active_total: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub category: Option<Category>,
    pub status: Option<ThreadStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LeaderboardQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUrls {
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub expires_in: u64,
}

/// One page of a listing.
#[derive(Debug, Deserialize, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            limit: self.limit,
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_request_uses_type_field() {
        let request: VoteRequest = serde_json::from_str(r#"{"type":"down"}"#).unwrap();
        assert_eq!(request.kind, VoteKind::Down);
    }

    #[test]
    fn create_thread_defaults() {
        let request: CreateThreadRequest = serde_json::from_str(
            r#"{"title":"Need a quieter prop","content":"Acoustic signature too high","category":"propulsion"}"#,
        )
        .unwrap();
        assert!(request.tags.is_empty());
        assert_eq!(request.urgency, Urgency::Medium);
        assert_eq!(request.trl, None);
    }

    #[test]
    fn unknown_category_is_rejected() {
        let result: Result<CreateThreadRequest, _> = serde_json::from_str(
            r#"{"title":"Need a quieter prop","content":"x","category":"lasers"}"#,
        );
        assert!(result.is_err());
    }
}
