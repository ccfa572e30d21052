//! The tags and repositories list entities (`GET /tags/list` and
//! `GET /v2/_catalog`).

use serde::{Deserialize, Serialize};

/// The response to a tags-list request for a single repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags {
    /// The repository name these tags belong to.
    pub name: String,
    /// The tag names.
    pub tags: Vec<String>,
}

/// The response to a catalog (repository listing) request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repositories {
    /// The repository names known to the store.
    pub repositories: Vec<String>,
}
