use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vote::VoteTally;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Propulsion,
    Sensors,
    Communications,
    Autonomy,
    Payload,
    Power,
    Materials,
    CounterUas,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Propulsion => "propulsion",
            Category::Sensors => "sensors",
            Category::Communications => "communications",
            Category::Autonomy => "autonomy",
            Category::Payload => "payload",
            Category::Power => "power",
            Category::Materials => "materials",
            Category::CounterUas => "counter_uas",
            Category::Other => "other",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    #[default]
    Open,
    InProgress,
    Solved,
    Closed,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Open => "open",
            ThreadStatus::InProgress => "in_progress",
            ThreadStatus::Solved => "solved",
            ThreadStatus::Closed => "closed",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// A posted challenge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    pub category: Category,
    pub tags: Vec<String>,
    pub status: ThreadStatus,
    pub urgency: Urgency,
    pub trl: Option<u8>,
    pub deadline: Option<DateTime<Utc>>,
    pub is_pinned: bool,
    pub is_locked: bool,
    pub accepted_solution_id: Option<Uuid>,
    #[serde(default)]
    pub votes: VoteTally,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub solution_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    /// Closed and locked threads take no new solutions.
    pub fn accepts_solutions(&self) -> bool {
        !self.is_locked && self.status != ThreadStatus::Closed
    }
}
