use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    /// Admins can do everything moderators can.
    pub fn is_moderator(&self) -> bool {
        matches!(self, Role::Moderator | Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Stored account record. Never serialized to clients, see [`UserView`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub password_hash: String,
    pub role: Role,
    pub organization: Option<String>,
    pub bio: Option<String>,
    pub reputation: i64,
    pub banned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub organization: Option<String>,
    pub bio: Option<String>,
    pub reputation: i64,
    pub banned: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl User {
    pub fn public(&self) -> UserView {
        UserView {
            id: self.id,
            username: self.username.clone(),
            full_name: self.full_name.clone(),
            role: self.role,
            organization: self.organization.clone(),
            bio: self.bio.clone(),
            reputation: self.reputation,
            banned: self.banned,
            created_at: self.created_at,
            email: None,
        }
    }

    /// The account as its owner sees it.
    pub fn private(&self) -> UserView {
        UserView {
            email: Some(self.email.clone()),
            ..self.public()
        }
    }
}
