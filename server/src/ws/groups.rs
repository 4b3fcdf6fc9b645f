//! Group naming: the shared broadcast group and per-user personal groups.

use std::fmt;

use crate::auth::UserId;

/// Placeholder substituted with the user id in the personal group template.
const PLACEHOLDER: &str = "{}";

/// Name of a fan-out group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupName(String);

impl GroupName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GroupConfigError {
    #[error("broadcast group name must not be empty")]
    EmptyBroadcast,
    #[error("personal group template {0:?} must contain exactly one `{{}}` placeholder")]
    BadTemplate(String),
    #[error("broadcast group {0:?} collides with the personal group template")]
    Collision(String),
}

/// Resolved group naming scheme, built once from config.
///
/// The personal group is `prefix + user_id + suffix`. Decimal formatting of
/// the id is injective and the affixes are fixed, so distinct users never
/// share a personal group.
#[derive(Debug, Clone)]
pub struct GroupNames {
    broadcast: GroupName,
    personal_prefix: String,
    personal_suffix: String,
}

impl GroupNames {
    pub fn new(broadcast: &str, personal_template: &str) -> Result<Self, GroupConfigError> {
        if broadcast.is_empty() {
            return Err(GroupConfigError::EmptyBroadcast);
        }
        if personal_template.matches(PLACEHOLDER).count() != 1 {
            return Err(GroupConfigError::BadTemplate(personal_template.to_string()));
        }
        let (prefix, suffix) = personal_template
            .split_once(PLACEHOLDER)
            .ok_or_else(|| GroupConfigError::BadTemplate(personal_template.to_string()))?;

        let names = Self {
            broadcast: GroupName::new(broadcast),
            personal_prefix: prefix.to_string(),
            personal_suffix: suffix.to_string(),
        };
        if names.is_personal(broadcast) {
            return Err(GroupConfigError::Collision(broadcast.to_string()));
        }
        Ok(names)
    }

    pub fn broadcast(&self) -> &GroupName {
        &self.broadcast
    }

    pub fn personal(&self, user_id: UserId) -> GroupName {
        GroupName(format!(
            "{}{}{}",
            self.personal_prefix, user_id, self.personal_suffix
        ))
    }

    /// Groups a connection authenticated as `user_id` belongs to.
    pub fn memberships(&self, user_id: UserId) -> [GroupName; 2] {
        [self.broadcast.clone(), self.personal(user_id)]
    }

    /// Whether `name` is shaped like some user's personal group.
    pub fn is_personal(&self, name: &str) -> bool {
        name.strip_prefix(self.personal_prefix.as_str())
            .and_then(|rest| rest.strip_suffix(self.personal_suffix.as_str()))
            .map(|id| id.parse::<UserId>().is_ok())
            .unwrap_or(false)
    }
}

impl Default for GroupNames {
    fn default() -> Self {
        Self {
            broadcast: GroupName::new("notification"),
            personal_prefix: "user_".to_string(),
            personal_suffix: String::new(),
        }
    }
}
