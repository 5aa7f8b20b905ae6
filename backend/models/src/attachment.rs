use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::target::Target;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Video,
    Document,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub target: Target,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    pub checksum: String,
    pub object_key: String,
    pub thumbnail_key: Option<String>,
    pub kind: AttachmentKind,
    pub created_at: DateTime<Utc>,
}
