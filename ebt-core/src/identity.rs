use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    Customer,
    Guest,
    Admin,
}

/// Who is invoking a booking operation, as established by the HTTP layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn customer(id: impl Into<String>) -> Self {
        Self { id: id.into(), role: ActorRole::Customer }
    }

    pub fn guest(email: impl Into<String>) -> Self {
        Self { id: email.into(), role: ActorRole::Guest }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self { id: id.into(), role: ActorRole::Admin }
    }

    pub fn is_admin(&self) -> bool {
        self.role == ActorRole::Admin
    }
}
