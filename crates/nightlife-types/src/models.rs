use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The public face of a registered user. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
}

/// Who is making the current request, resolved once from the session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Authenticated(UserSummary),
    Anonymous,
}

impl Identity {
    pub fn user(&self) -> Option<&UserSummary> {
        match self {
            Self::Authenticated(user) => Some(user),
            Self::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

/// A venue as returned by the search provider.
///
/// Only `id` is interpreted locally. Every other provider field is kept in
/// `details` and passed through to the client untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub id: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl Venue {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// A provider venue plus the locally-owned attendance state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AugmentedVenue {
    #[serde(flatten)]
    pub venue: Venue,
    pub goers_count: u64,
    pub is_user_going: bool,
}
