//! Canonical domain model
//!
//! Identifiers are opaque strings no matter what scalar the wire uses; the
//! gateway coerces them on ingestion. Counters and per-viewer flags are
//! nested. The flat, numeric-id wire schema never leaves `gateway::wire`.

use serde::{Deserialize, Serialize};

/// Minimal user descriptor attached to entities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Problem lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemStatus {
    Open,
    InProgress,
    Resolved,
}

/// Aggregate counters on a problem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemCounters {
    pub likes: u32,
    pub comments: u32,
    pub artifacts: u32,
    pub working: u32,
}

/// Flags specific to the viewing user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerFlags {
    pub has_liked: bool,
    pub is_working: bool,
}

/// A community-proposed task open for collaboration
///
/// Never deleted client-side; a backend 404 surfaces as a stale reference
/// and is repaired by the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: ProblemStatus,
    pub created_at: String,
    pub counters: ProblemCounters,
    pub viewer: ViewerFlags,
    pub working_on: Vec<Identity>,
}

/// Comment on a problem or an artifact (same shape for both parents)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub body: String,
    pub author: Identity,
    pub likes_count: u32,
    pub has_liked: bool,
    pub created_at: String,
}

/// Submitted work product attached to a problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub author: Identity,
    pub created_at: String,
}

/// License/terms text gating certain writes on a problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agreement {
    pub id: String,
    pub license_id: String,
    pub version: String,
    pub text: String,
    pub is_active: bool,
}

/// Monetary amount as reported by the backend (never parsed client-side)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: String,
    pub currency: String,
}

/// Aggregate community stats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub as_of: String,
    pub total_income: Option<Money>,
    pub contributors_reward: Option<Money>,
    pub contributor_count: u32,
}

/// Entry in a problem's activity feed, e.g. kind `problem.liked`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemEvent {
    pub id: String,
    pub kind: String,
    pub actor: Option<Identity>,
    pub created_at: String,
}

/// Server-confirmed result of a problem like toggle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeToggle {
    pub problem_id: String,
    pub has_liked: bool,
    pub likes_count: u32,
}

/// Server-confirmed result of a work-in-progress toggle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkToggle {
    pub problem_id: String,
    pub is_working: bool,
    pub working_count: u32,
}

/// Server-confirmed result of a comment like toggle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentLikeToggle {
    pub problem_id: String,
    pub comment_id: String,
    pub has_liked: bool,
    pub likes_count: u32,
}

/// Input for creating a problem
#[derive(Debug, Clone, Serialize)]
pub struct NewProblem {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Input for creating a comment
#[derive(Debug, Clone, Serialize)]
pub struct NewComment {
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl NewComment {
    pub fn body(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            parent_id: None,
        }
    }
}

/// Input for creating an artifact
#[derive(Debug, Clone, Serialize)]
pub struct NewArtifact {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}
