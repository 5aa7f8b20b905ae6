use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BountyStatus {
    #[default]
    Active,
    Awarded,
    Cancelled,
    Expired,
}

impl BountyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BountyStatus::Active => "active",
            BountyStatus::Awarded => "awarded",
            BountyStatus::Cancelled => "cancelled",
            BountyStatus::Expired => "expired",
        }
    }
}

/// Money put up against a thread. Amounts are in minor units (cents).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounty {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub sponsor_id: Uuid,
    pub amount: u64,
    pub currency: String,
    pub status: BountyStatus,
    pub deadline: Option<DateTime<Utc>>,
    pub awarded_solution_id: Option<Uuid>,
    pub awarded_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bounty {
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }
}
