//! Session snapshot obtained from the handshake.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

/// Identity of the local agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfIdentity {
    /// User id of the agent.
    pub id: String,
    /// Display name of the agent.
    pub name: String,
}

impl SelfIdentity {
    /// Create a new identity.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Both the id and the name are known.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.id.is_empty() && !self.name.is_empty()
    }
}

/// Extended profile of a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub first_name: String,
    pub last_name: String,
    pub real_name: String,
    pub real_name_normalized: String,
    pub title: String,
    pub email: String,
}

/// A member of the messaging service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: String,
    /// Display (handle) name.
    pub name: String,
    pub real_name: String,
    pub deleted: bool,
    pub is_admin: bool,
    pub is_owner: bool,
    pub is_primary_owner: bool,
    pub is_bot: bool,
    pub profile: UserProfile,
}

impl User {
    /// Create a user with just an id and display name.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Name to show for this user: the real name, or the handle when no real name is set.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.real_name.is_empty() {
            &self.name
        } else {
            &self.real_name
        }
    }
}

/// Channel metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub is_channel: bool,
    /// Direct-message channel.
    pub is_im: bool,
    /// Counterpart of a direct-message channel.
    pub user: String,
    pub created: i64,
    pub creator: String,
    pub is_archived: bool,
    pub is_general: bool,
    pub is_member: bool,
    pub members: Vec<String>,
}

/// Immutable record of a successful handshake.
///
/// Replaced wholesale on every (re)connect, never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    /// The local agent.
    pub self_identity: SelfIdentity,
    /// Known users keyed by id.
    pub users: HashMap<String, User>,
    /// Known channels keyed by id.
    pub channels: HashMap<String, Channel>,
    /// Websocket URL to dial.
    pub endpoint: String,
}

impl SessionSnapshot {
    /// Build a snapshot from the lists returned by the handshake.
    #[must_use]
    pub fn new(
        self_identity: SelfIdentity,
        users: impl IntoIterator<Item = User>,
        channels: impl IntoIterator<Item = Channel>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            self_identity,
            users: users.into_iter().map(|u| (u.id.clone(), u)).collect(),
            channels: channels.into_iter().map(|c| (c.id.clone(), c)).collect(),
            endpoint: endpoint.into(),
        }
    }

    /// Look up a user by id.
    #[must_use]
    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    /// Look up a channel by id.
    #[must_use]
    pub fn channel(&self, id: &str) -> Option<&Channel> {
        self.channels.get(id)
    }
}

/// The user mapping of the active session.
///
/// The one piece of session state mutated after the handshake: `user_change`
/// events insert or overwrite entries while message classification reads them.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<String, User>>,
}

impl UserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every entry with the users of `snapshot`.
    pub fn load(&self, snapshot: &SessionSnapshot) {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        users.clone_from(&snapshot.users);
    }

    /// Insert the user, or overwrite the existing entry with the same id.
    pub fn upsert(&self, user: User) {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user.id.clone(), user);
    }

    /// Get a copy of a user.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<User> {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Display name for a user id, empty when the user is unknown.
    #[must_use]
    pub fn display_name(&self, id: &str) -> String {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|u| u.display_name().to_string())
            .unwrap_or_default()
    }

    /// Number of known users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// No users are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
