use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{target::Target, vote::VoteTally};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub author_id: Uuid,
    pub target: Target,
    pub parent_id: Option<Uuid>,
    pub content: String,
    pub is_edited: bool,
    pub is_deleted: bool,
    #[serde(default)]
    pub votes: VoteTally,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
