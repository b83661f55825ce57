//! Wire-format payloads and normalization
//!
//! The backend is loose about shapes: identifiers may arrive as numbers or
//! strings, and list endpoints may return a bare array or a `{results: [...]}`
//! envelope. Everything is normalized here, on ingestion; the rest of the
//! crate only ever sees the canonical model in [`crate::types`].

use crate::auth::CredentialBundle;
use crate::types::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Accepts a numeric or string id and yields its string form
pub(crate) fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(s) => Ok(s),
        Raw::Number(n) => Ok(n.to_string()),
    }
}

/// Unwraps a list payload into a plain sequence
///
/// Accepts a bare array or an envelope with a `results` array; anything else
/// yields an empty sequence. Rows that fail to decode are skipped with a
/// warning rather than failing the whole call.
pub(crate) fn unwrap_results<T: DeserializeOwned>(value: Value) -> Vec<T> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                tracing::warn!(%err, "skipping undecodable list row");
                None
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub(crate) struct IdentityWire {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl From<IdentityWire> for Identity {
    fn from(w: IdentityWire) -> Self {
        Identity {
            id: w.id,
            username: w.username,
            avatar_url: w.avatar_url,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProblemWire {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: ProblemStatus,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub comments_count: u32,
    #[serde(default)]
    pub likes_count: u32,
    #[serde(default)]
    pub artifacts_count: u32,
    #[serde(default)]
    pub working_count: u32,
    #[serde(default)]
    pub has_liked: bool,
    #[serde(default)]
    pub is_working: bool,
    #[serde(default)]
    pub working_on_this: Vec<IdentityWire>,
}

impl From<ProblemWire> for Problem {
    fn from(w: ProblemWire) -> Self {
        Problem {
            id: w.id,
            title: w.title,
            description: w.description,
            status: w.status,
            created_at: w.created_at,
            counters: ProblemCounters {
                likes: w.likes_count,
                comments: w.comments_count,
                artifacts: w.artifacts_count,
                working: w.working_count,
            },
            viewer: ViewerFlags {
                has_liked: w.has_liked,
                is_working: w.is_working,
            },
            working_on: w.working_on_this.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentWire {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub body: String,
    pub user: IdentityWire,
    #[serde(default)]
    pub likes_count: u32,
    #[serde(default)]
    pub has_liked: bool,
    #[serde(default)]
    pub created_at: String,
}

impl From<CommentWire> for Comment {
    fn from(w: CommentWire) -> Self {
        Comment {
            id: w.id,
            body: w.body,
            author: w.user.into(),
            likes_count: w.likes_count,
            has_liked: w.has_liked,
            created_at: w.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ArtifactWire {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    pub user: IdentityWire,
    #[serde(default)]
    pub created_at: String,
}

impl From<ArtifactWire> for Artifact {
    fn from(w: ArtifactWire) -> Self {
        Artifact {
            id: w.id,
            title: w.title,
            description: w.description,
            url: w.url,
            author: w.user.into(),
            created_at: w.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AgreementWire {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub license_spdx: String,
    pub version: String,
    pub text: String,
    #[serde(default)]
    pub is_active: bool,
}

impl From<AgreementWire> for Agreement {
    fn from(w: AgreementWire) -> Self {
        Agreement {
            id: w.id,
            license_id: w.license_spdx,
            version: w.version,
            text: w.text,
            is_active: w.is_active,
        }
    }
}

/// `GET problems/{id}/agreement/` wraps the agreement; `null` means none
/// is configured for the problem.
#[derive(Debug, Deserialize)]
pub(crate) struct AgreementEnvelope {
    #[serde(default)]
    pub agreement: Option<AgreementWire>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventWire {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub actor: Option<IdentityWire>,
    #[serde(default)]
    pub created_at: String,
}

impl From<EventWire> for ProblemEvent {
    fn from(w: EventWire) -> Self {
        ProblemEvent {
            id: w.id,
            kind: w.kind,
            actor: w.actor.map(Into::into),
            created_at: w.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LikeToggleWire {
    #[serde(deserialize_with = "id_string")]
    pub problem_id: String,
    pub has_liked: bool,
    pub likes_count: u32,
}

impl From<LikeToggleWire> for LikeToggle {
    fn from(w: LikeToggleWire) -> Self {
        LikeToggle {
            problem_id: w.problem_id,
            has_liked: w.has_liked,
            likes_count: w.likes_count,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WorkToggleWire {
    #[serde(deserialize_with = "id_string")]
    pub problem_id: String,
    pub is_working: bool,
    pub working_count: u32,
}

impl From<WorkToggleWire> for WorkToggle {
    fn from(w: WorkToggleWire) -> Self {
        WorkToggle {
            problem_id: w.problem_id,
            is_working: w.is_working,
            working_count: w.working_count,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentLikeToggleWire {
    #[serde(deserialize_with = "id_string")]
    pub problem_id: String,
    #[serde(deserialize_with = "id_string")]
    pub comment_id: String,
    pub has_liked: bool,
    pub likes_count: u32,
}

impl From<CommentLikeToggleWire> for CommentLikeToggle {
    fn from(w: CommentLikeToggleWire) -> Self {
        CommentLikeToggle {
            problem_id: w.problem_id,
            comment_id: w.comment_id,
            has_liked: w.has_liked,
            likes_count: w.likes_count,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginWire {
    pub token_type: String,
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
    #[serde(default)]
    pub user: Option<IdentityWire>,
}

impl From<LoginWire> for CredentialBundle {
    fn from(w: LoginWire) -> Self {
        CredentialBundle {
            token_type: w.token_type,
            access_token: w.access,
            refresh_token: w.refresh,
            user: w.user.map(Into::into),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContributorsWire {
    #[serde(default)]
    pub count: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SummaryWire {
    #[serde(default)]
    pub as_of: String,
    #[serde(default)]
    pub total_income: Option<Money>,
    #[serde(default)]
    pub contributors_reward: Option<Money>,
    #[serde(default)]
    pub contributors: Option<ContributorsWire>,
}

impl From<SummaryWire> for Summary {
    fn from(w: SummaryWire) -> Self {
        Summary {
            as_of: w.as_of,
            total_income: w.total_income,
            contributors_reward: w.contributors_reward,
            contributor_count: w.contributors.map(|c| c.count).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_and_bare_lists_normalize_identically() {
        let bare = json!([{"id": 1, "username": "ada"}, {"id": "2", "username": "grace"}]);
        let enveloped = json!({"results": [{"id": 1, "username": "ada"}, {"id": "2", "username": "grace"}]});

        let a: Vec<IdentityWire> = unwrap_results(bare);
        let b: Vec<IdentityWire> = unwrap_results(enveloped);

        let ids_a: Vec<_> = a.iter().map(|i| i.id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids_a, vec!["1", "2"]);
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn unrecognized_list_shapes_yield_empty() {
        let cases = [
            json!({"data": [1, 2]}),
            json!("nope"),
            json!(42),
            json!(null),
            json!({"results": "not-an-array"}),
        ];
        for case in cases {
            let rows: Vec<IdentityWire> = unwrap_results(case);
            assert!(rows.is_empty());
        }
    }

    #[test]
    fn undecodable_rows_are_skipped() {
        let value = json!([{"id": 1, "username": "ada"}, {"bogus": true}]);
        let rows: Vec<IdentityWire> = unwrap_results(value);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].username, "ada");
    }

    #[test]
    fn numeric_and_string_ids_both_coerce_to_strings() {
        let numeric: LikeToggleWire =
            serde_json::from_value(json!({"problem_id": 7, "has_liked": true, "likes_count": 3}))
                .unwrap();
        let textual: LikeToggleWire = serde_json::from_value(
            json!({"problem_id": "7", "has_liked": true, "likes_count": 3}),
        )
        .unwrap();
        assert_eq!(numeric.problem_id, "7");
        assert_eq!(textual.problem_id, "7");
    }

    #[test]
    fn flat_wire_problem_becomes_nested_canonical() {
        let wire: ProblemWire = serde_json::from_value(json!({
            "id": 42,
            "title": "Fix the roof",
            "description": "It leaks.",
            "status": "in_progress",
            "created_at": "2026-01-02T03:04:05Z",
            "comments_count": 4,
            "likes_count": 5,
            "artifacts_count": 1,
            "working_count": 2,
            "has_liked": true,
            "is_working": false,
            "working_on_this": [{"id": 9, "username": "ada"}]
        }))
        .unwrap();

        let problem: Problem = wire.into();
        assert_eq!(problem.id, "42");
        assert_eq!(problem.status, ProblemStatus::InProgress);
        assert_eq!(problem.counters.likes, 5);
        assert_eq!(problem.counters.comments, 4);
        assert!(problem.viewer.has_liked);
        assert!(!problem.viewer.is_working);
        assert_eq!(problem.working_on[0].id, "9");
    }

    #[test]
    fn agreement_envelope_allows_null() {
        let none: AgreementEnvelope = serde_json::from_value(json!({"agreement": null})).unwrap();
        assert!(none.agreement.is_none());

        let some: AgreementEnvelope = serde_json::from_value(json!({
            "agreement": {"id": 1, "license_spdx": "MIT", "version": "1.0", "text": "...", "is_active": true}
        }))
        .unwrap();
        let agreement: Agreement = some.agreement.unwrap().into();
        assert_eq!(agreement.license_id, "MIT");
        assert!(agreement.is_active);
    }

    #[test]
    fn login_wire_becomes_credential_bundle() {
        let wire: LoginWire = serde_json::from_value(json!({
            "token_type": "Token",
            "access": "a1",
            "refresh": "r1",
            "user": {"id": 3, "username": "ada"}
        }))
        .unwrap();
        let bundle: CredentialBundle = wire.into();
        assert_eq!(bundle.authorization_header(), "Token a1");
        assert_eq!(bundle.user.unwrap().id, "3");
    }
}
