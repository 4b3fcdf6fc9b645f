//! Watched domain entities and the serializer table used to turn them into
//! notification payloads.
//!
//! Field sets match the public REST representation of each entity, so a
//! client can apply a pushed `obj` the same way it applies an API response.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type EntityId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: EntityId,
    pub title: String,
    pub author: EntityId,
    #[serde(default)]
    pub teachers: Vec<EntityId>,
    #[serde(default)]
    pub students: Vec<EntityId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lecture {
    pub id: EntityId,
    pub course: EntityId,
    pub topic: String,
    pub teacher: EntityId,
    #[serde(default)]
    pub presentation_file: Option<String>,
    #[serde(default)]
    pub datetime: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Homework {
    pub id: EntityId,
    pub text: String,
    pub lecture: EntityId,
    pub author: EntityId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A grade is keyed by its submission; `id` is the submission id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grade {
    pub id: EntityId,
    pub score: u16,
    pub author: EntityId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: EntityId,
    pub text: String,
    pub author: EntityId,
    pub homework: EntityId,
    #[serde(default)]
    pub grade: Option<Grade>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: EntityId,
    pub text: String,
    pub author: EntityId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Account record. Not broadcast unless a serializer is registered for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: EntityId,
    pub username: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Course,
    Lecture,
    Homework,
    Submission,
    Grade,
    Comment,
    User,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Course => "course",
            Self::Lecture => "lecture",
            Self::Homework => "homework",
            Self::Submission => "submission",
            Self::Grade => "grade",
            Self::Comment => "comment",
            Self::User => "user",
        };
        f.write_str(s)
    }
}

/// A changed entity as handed over by the data layer.
/// On the wire (event ingress) it is tagged: `{"kind": "course", "id": 7, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DomainEntity {
    Course(Course),
    Lecture(Lecture),
    Homework(Homework),
    Submission(Submission),
    Grade(Grade),
    Comment(Comment),
    User(User),
}

impl DomainEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Course(_) => EntityKind::Course,
            Self::Lecture(_) => EntityKind::Lecture,
            Self::Homework(_) => EntityKind::Homework,
            Self::Submission(_) => EntityKind::Submission,
            Self::Grade(_) => EntityKind::Grade,
            Self::Comment(_) => EntityKind::Comment,
            Self::User(_) => EntityKind::User,
        }
    }
}

/// Turns an entity into its payload document.
pub type SerializeFn = fn(&DomainEntity) -> serde_json::Result<Value>;

/// Public field set of the entity, without the `kind` tag.
pub fn public_fields(entity: &DomainEntity) -> serde_json::Result<Value> {
    match entity {
        DomainEntity::Course(c) => serde_json::to_value(c),
        DomainEntity::Lecture(l) => serde_json::to_value(l),
        DomainEntity::Homework(h) => serde_json::to_value(h),
        DomainEntity::Submission(s) => serde_json::to_value(s),
        DomainEntity::Grade(g) => serde_json::to_value(g),
        DomainEntity::Comment(c) => serde_json::to_value(c),
        DomainEntity::User(u) => serde_json::to_value(u),
    }
}

#[derive(Debug, Clone)]
pub struct SerializerEntry {
    pub object_name: String,
    pub serialize: SerializeFn,
}

/// Static mapping from entity kind to `{object_name, serializer}`, built at startup.
#[derive(Debug, Clone, Default)]
pub struct SerializerRegistry {
    entries: HashMap<EntityKind, SerializerEntry>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The six watched course entities. `user` is not registered.
    pub fn standard() -> Self {
        [
            EntityKind::Course,
            EntityKind::Lecture,
            EntityKind::Homework,
            EntityKind::Submission,
            EntityKind::Grade,
            EntityKind::Comment,
        ]
        .into_iter()
        .fold(Self::new(), |registry, kind| {
            registry.register(kind, kind.to_string(), public_fields)
        })
    }

    pub fn register(
        mut self,
        kind: EntityKind,
        object_name: impl Into<String>,
        serialize: SerializeFn,
    ) -> Self {
        self.entries.insert(
            kind,
            SerializerEntry {
                object_name: object_name.into(),
                serialize,
            },
        );
        self
    }

    pub fn get(&self, kind: EntityKind) -> Option<&SerializerEntry> {
        self.entries.get(&kind)
    }

    pub fn object_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.values().map(|e| e.object_name.as_str()).collect();
        names.sort_unstable();
        names
    }
}
