//! # resource-store
//!
//! `resource-store` holds the authoritative, in-memory collection of
//! [`Resource`]s. All access goes through [`ResourceStore`], which guards a
//! single map with a read/write lock:
//!
//! - `get`, `list` and `count` take the shared lock and run concurrently
//! - `create`, `update` and `delete` take the exclusive lock
//!
//! Callers only ever receive clones, never references into the map.
//!
//! [`Resource`]: resource_store::Resource
//! [`ResourceStore`]: resource_store::ResourceStore
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory;

pub use crate::memory::ResourceStore;

/// A named record owned by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// generated on create, never reassigned
    pub id: String,
    /// always non-empty
    pub name: String,
    /// empty when not given
    #[serde(default)]
    pub description: String,
    /// set once on create
    pub created_at: DateTime<Utc>,
    /// set on create and on every update
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    fn new(name: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_owned(),
            description: description.to_owned(),
            created_at: now,
            updated_at: now,
        }
    }

    /// apply a partial update: blank or absent fields keep their value
    fn apply(&mut self, name: Option<&str>, description: Option<&str>) {
        if let Some(name) = non_blank(name) {
            self.name = name.to_owned();
        }
        if let Some(description) = non_blank(description) {
            self.description = description.to_owned();
        }
        self.updated_at = Utc::now();
    }
}

/// empty and whitespace-only values count as absent
fn non_blank(field: Option<&str>) -> Option<&str> {
    field.filter(|s| !s.trim().is_empty())
}

/// Errors produced by the store. Both are terminal for the request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// bad input, e.g. an empty required field
    #[error("validation failed: {0}")]
    Validation(String),
    /// no live resource has this id
    #[error("item not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// is this a [`StoreError::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Shorthand result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
