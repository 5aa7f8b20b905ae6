use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a vote, comment or attachment hangs off.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Thread,
    Solution,
    Comment,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Thread => "thread",
            TargetKind::Solution => "solution",
            TargetKind::Comment => "comment",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub kind: TargetKind,
    pub id: Uuid,
}

impl Target {
    pub fn thread(id: Uuid) -> Self {
        Self {
            kind: TargetKind::Thread,
            id,
        }
    }

    pub fn solution(id: Uuid) -> Self {
        Self {
            kind: TargetKind::Solution,
            id,
        }
    }

    pub fn comment(id: Uuid) -> Self {
        Self {
            kind: TargetKind::Comment,
            id,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_kind_and_id() {
        let id = Uuid::nil();
        assert_eq!(
            Target::solution(id).to_string(),
            "solution:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&Target::comment(Uuid::nil())).unwrap();
        assert!(json.contains("\"kind\":\"comment\""));
    }
}
