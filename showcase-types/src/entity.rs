//! Backend entity kinds and the authenticated identity.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The record tables exposed by the remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Projects,
    Profiles,
    Tags,
    Likes,
}

impl EntityKind {
    /// All kinds, in a stable order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Projects,
        EntityKind::Profiles,
        EntityKind::Tags,
        EntityKind::Likes,
    ];

    /// The backend table name.
    #[must_use]
    pub const fn table(&self) -> &'static str {
        match self {
            EntityKind::Projects => "projects",
            EntityKind::Profiles => "profiles",
            EntityKind::Tags => "tags",
            EntityKind::Likes => "likes",
        }
    }

    /// The validation entity type of a single record of this kind.
    #[must_use]
    pub const fn record_type(&self) -> &'static str {
        match self {
            EntityKind::Projects => "project",
            EntityKind::Profiles => "profile",
            EntityKind::Tags => "tag",
            EntityKind::Likes => "like",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.table() == s)
            .ok_or_else(|| Error::UnknownEntity(s.to_string()))
    }
}

/// Role of an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
    Business,
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            "business" => Ok(Role::Business),
            other => Err(Error::UnknownRole(other.to_string())),
        }
    }
}

/// The opaque identity handed to the sync layer by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    /// Creates an identity.
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    /// Whether this identity may moderate submissions.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
