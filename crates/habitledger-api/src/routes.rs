//! HTTP methods, endpoints, and the mutation route table

use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP method of a REST call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method and path of a REST call, relative to the API base URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub method: Method,
    pub path: String,
}

impl Endpoint {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

pub const TOGGLE_LOG_PATH: &str = "/api/logs/toggle";
pub const BULK_LOGS_PATH: &str = "/api/logs/bulk";
pub const HABITS_PATH: &str = "/api/habits";
pub const HEALTH_PATH: &str = "/api/health";

/// Kinds of mutation that can be queued while offline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationKind {
    /// `POST /api/logs/toggle`
    ToggleLog,
    /// `POST /api/logs/bulk`
    BulkLogs,
    /// `POST /api/habits`
    CreateHabit,
    /// `PUT /api/habits/:id`
    UpdateHabit,
    /// `DELETE /api/habits/:id`
    DeleteHabit,
}

impl MutationKind {
    pub const ALL: [MutationKind; 5] = [
        MutationKind::ToggleLog,
        MutationKind::BulkLogs,
        MutationKind::CreateHabit,
        MutationKind::UpdateHabit,
        MutationKind::DeleteHabit,
    ];

    /// Whether the route for this kind carries a target id in its path
    pub fn requires_target(&self) -> bool {
        matches!(self, MutationKind::UpdateHabit | MutationKind::DeleteHabit)
    }

    /// Build the endpoint for this kind.
    ///
    /// Returns `None` when the kind needs a target id and none (or an empty
    /// one) was given.
    pub fn endpoint(&self, target_id: Option<&str>) -> Option<Endpoint> {
        let endpoint = match self {
            MutationKind::ToggleLog => Endpoint::new(Method::Post, TOGGLE_LOG_PATH),
            MutationKind::BulkLogs => Endpoint::new(Method::Post, BULK_LOGS_PATH),
            MutationKind::CreateHabit => Endpoint::new(Method::Post, HABITS_PATH),
            MutationKind::UpdateHabit => {
                let id = target_id.filter(|id| is_path_segment(id))?;
                Endpoint::new(Method::Put, format!("{}/{}", HABITS_PATH, id))
            }
            MutationKind::DeleteHabit => {
                let id = target_id.filter(|id| is_path_segment(id))?;
                Endpoint::new(Method::Delete, format!("{}/{}", HABITS_PATH, id))
            }
        };
        Some(endpoint)
    }

    /// Classify a mutating call by its method and path.
    ///
    /// Paths are matched exactly (after dropping a query string and a
    /// trailing slash), so `/api/habits/7/archive` or `/api/notes` do not
    /// classify. Returns the kind and, for id-carrying routes, the target id.
    pub fn classify(method: Method, path: &str) -> Option<(MutationKind, Option<String>)> {
        let path = normalize_path(path);

        match (method, path) {
            (Method::Post, TOGGLE_LOG_PATH) => return Some((MutationKind::ToggleLog, None)),
            (Method::Post, BULK_LOGS_PATH) => return Some((MutationKind::BulkLogs, None)),
            (Method::Post, HABITS_PATH) => return Some((MutationKind::CreateHabit, None)),
            _ => {}
        }

        let id = path
            .strip_prefix(HABITS_PATH)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|id| is_path_segment(id))?;

        match method {
            Method::Put => Some((MutationKind::UpdateHabit, Some(id.to_string()))),
            Method::Delete => Some((MutationKind::DeleteHabit, Some(id.to_string()))),
            _ => None,
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationKind::ToggleLog => "toggle-log",
            MutationKind::BulkLogs => "bulk-logs",
            MutationKind::CreateHabit => "create-habit",
            MutationKind::UpdateHabit => "update-habit",
            MutationKind::DeleteHabit => "delete-habit",
        };
        f.write_str(name)
    }
}

fn normalize_path(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

fn is_path_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains('/')
}
