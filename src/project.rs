//! Project reference types.

use serde::{Deserialize, Serialize};

/// Identifier of a project known to the link table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ProjectId(pub i64);

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A project as seen by the sync engine: membership is derived by matching
/// the project name against event category labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
}

impl Project {
    pub fn new(id: i64, name: &str) -> Project {
        Project {
            id: ProjectId(id),
            name: name.to_string(),
        }
    }
}
