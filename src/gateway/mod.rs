//! Remote data gateway
//!
//! Typed calls over the community REST contract. The gateway owns failure
//! classification: HTTP 401 invalidates the auth store synchronously in the
//! response-error path (exactly once per failing call) before the error
//! propagates, 404 maps to [`ClientError::NotFound`], and other failures carry
//! the server's machine-readable `detail` discriminator.

mod wire;

use crate::auth::{AuthStore, CredentialBundle};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::types::*;
use async_trait::async_trait;
use reqwest::{header, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Typed surface of the community backend
///
/// The reqwest [`Gateway`] is the production implementation; tests drive the
/// session with a scripted mock behind this seam.
#[async_trait]
pub trait CommunityApi: Send + Sync {
    async fn summary(&self) -> Result<Summary>;

    async fn list_problems(&self) -> Result<Vec<Problem>>;
    async fn get_problem(&self, id: &str) -> Result<Problem>;
    async fn create_problem(&self, input: &NewProblem) -> Result<Problem>;

    async fn like_problem(&self, id: &str) -> Result<LikeToggle>;
    async fn unlike_problem(&self, id: &str) -> Result<LikeToggle>;
    async fn mark_working(&self, id: &str) -> Result<WorkToggle>;
    async fn unmark_working(&self, id: &str) -> Result<WorkToggle>;

    async fn list_comments(&self, problem_id: &str) -> Result<Vec<Comment>>;
    async fn create_comment(&self, problem_id: &str, input: &NewComment) -> Result<Comment>;
    async fn like_comment(&self, problem_id: &str, comment_id: &str)
        -> Result<CommentLikeToggle>;
    async fn unlike_comment(
        &self,
        problem_id: &str,
        comment_id: &str,
    ) -> Result<CommentLikeToggle>;

    async fn get_agreement(&self, problem_id: &str) -> Result<Option<Agreement>>;
    async fn accept_agreement(&self, problem_id: &str) -> Result<()>;

    async fn list_artifacts(&self, problem_id: &str) -> Result<Vec<Artifact>>;
    async fn create_artifact(&self, problem_id: &str, input: &NewArtifact) -> Result<Artifact>;
    async fn get_artifact(&self, id: &str) -> Result<Artifact>;
    async fn list_artifact_comments(&self, artifact_id: &str) -> Result<Vec<Comment>>;
    async fn create_artifact_comment(
        &self,
        artifact_id: &str,
        input: &NewComment,
    ) -> Result<Comment>;

    async fn list_events(&self, problem_id: &str) -> Result<Vec<ProblemEvent>>;

    async fn login(&self, username: &str, password: &str) -> Result<CredentialBundle>;
    async fn me(&self) -> Result<Identity>;
    async fn logout(&self) -> Result<()>;
}

/// HTTP gateway over the community API
pub struct Gateway {
    config: ClientConfig,
    auth: Arc<AuthStore>,
    http: reqwest::Client,
}

impl Gateway {
    /// Create a gateway; the timeout comes from config, everything else is
    /// reqwest defaults.
    pub fn new(config: ClientConfig, auth: Arc<AuthStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, auth, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Build a request, attaching the credential header when a bundle exists.
    /// No bundle means an anonymous request.
    async fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        tracing::debug!(%method, path, "community api request");
        let mut request = self.http.request(method, self.url(path));
        if let Some(bundle) = self.auth.read().await {
            request = request.header(header::AUTHORIZATION, bundle.authorization_header());
        }
        request
    }

    /// Classify a response. 401 invalidates the auth store before the error
    /// is returned; this is the only place credentials are dropped on a
    /// backend signal.
    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            let detail = read_detail(response).await;
            tracing::warn!(?detail, "credential rejected by backend");
            self.auth.invalidate().await;
            return Err(ClientError::Unauthorized { detail });
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound);
        }
        if !status.is_success() {
            let detail = read_detail(response).await;
            return Err(ClientError::Api {
                status: status.as_u16(),
                detail,
            });
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = self.check(response).await?;
        Ok(response.json().await?)
    }

    async fn list<W: DeserializeOwned>(&self, response: reqwest::Response) -> Result<Vec<W>> {
        let response = self.check(response).await?;
        let value: Value = response.json().await?;
        Ok(wire::unwrap_results(value))
    }

    async fn accept(&self, response: reqwest::Response) -> Result<()> {
        self.check(response).await?;
        Ok(())
    }
}

/// Best-effort extraction of the `detail` discriminator from an error body
async fn read_detail(response: reqwest::Response) -> Option<String> {
    let value: Value = response.json().await.ok()?;
    value.get("detail")?.as_str().map(str::to_string)
}

fn encode(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

#[async_trait]
impl CommunityApi for Gateway {
    async fn summary(&self) -> Result<Summary> {
        let response = self.request(Method::GET, "summary/").await.send().await?;
        let summary: wire::SummaryWire = self.json(response).await?;
        Ok(summary.into())
    }

    async fn list_problems(&self) -> Result<Vec<Problem>> {
        let response = self.request(Method::GET, "problems/").await.send().await?;
        let rows: Vec<wire::ProblemWire> = self.list(response).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_problem(&self, id: &str) -> Result<Problem> {
        let path = format!("problems/{}/", encode(id));
        let response = self.request(Method::GET, &path).await.send().await?;
        let problem: wire::ProblemWire = self.json(response).await?;
        Ok(problem.into())
    }

    async fn create_problem(&self, input: &NewProblem) -> Result<Problem> {
        let response = self
            .request(Method::POST, "problems/")
            .await
            .json(input)
            .send()
            .await?;
        let problem: wire::ProblemWire = self.json(response).await?;
        Ok(problem.into())
    }

    async fn like_problem(&self, id: &str) -> Result<LikeToggle> {
        let path = format!("problems/{}/like/", encode(id));
        let response = self.request(Method::POST, &path).await.send().await?;
        let toggle: wire::LikeToggleWire = self.json(response).await?;
        Ok(toggle.into())
    }

    async fn unlike_problem(&self, id: &str) -> Result<LikeToggle> {
        let path = format!("problems/{}/like/", encode(id));
        let response = self.request(Method::DELETE, &path).await.send().await?;
        let toggle: wire::LikeToggleWire = self.json(response).await?;
        Ok(toggle.into())
    }

    async fn mark_working(&self, id: &str) -> Result<WorkToggle> {
        let path = format!("problems/{}/work/", encode(id));
        let response = self.request(Method::POST, &path).await.send().await?;
        let toggle: wire::WorkToggleWire = self.json(response).await?;
        Ok(toggle.into())
    }

    async fn unmark_working(&self, id: &str) -> Result<WorkToggle> {
        let path = format!("problems/{}/work/", encode(id));
        let response = self.request(Method::DELETE, &path).await.send().await?;
        let toggle: wire::WorkToggleWire = self.json(response).await?;
        Ok(toggle.into())
    }

    async fn list_comments(&self, problem_id: &str) -> Result<Vec<Comment>> {
        let path = format!("problems/{}/comments/", encode(problem_id));
        let response = self.request(Method::GET, &path).await.send().await?;
        let rows: Vec<wire::CommentWire> = self.list(response).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_comment(&self, problem_id: &str, input: &NewComment) -> Result<Comment> {
        let path = format!("problems/{}/comments/", encode(problem_id));
        let response = self
            .request(Method::POST, &path)
            .await
            .json(input)
            .send()
            .await?;
        let comment: wire::CommentWire = self.json(response).await?;
        Ok(comment.into())
    }

    async fn like_comment(
        &self,
        problem_id: &str,
        comment_id: &str,
    ) -> Result<CommentLikeToggle> {
        let path = format!(
            "problems/{}/comments/{}/like/",
            encode(problem_id),
            encode(comment_id)
        );
        let response = self.request(Method::POST, &path).await.send().await?;
        let toggle: wire::CommentLikeToggleWire = self.json(response).await?;
        Ok(toggle.into())
    }

    async fn unlike_comment(
        &self,
        problem_id: &str,
        comment_id: &str,
    ) -> Result<CommentLikeToggle> {
        let path = format!(
            "problems/{}/comments/{}/like/",
            encode(problem_id),
            encode(comment_id)
        );
        let response = self.request(Method::DELETE, &path).await.send().await?;
        let toggle: wire::CommentLikeToggleWire = self.json(response).await?;
        Ok(toggle.into())
    }

    async fn get_agreement(&self, problem_id: &str) -> Result<Option<Agreement>> {
        let path = format!("problems/{}/agreement/", encode(problem_id));
        let response = self.request(Method::GET, &path).await.send().await?;
        let envelope: wire::AgreementEnvelope = self.json(response).await?;
        Ok(envelope.agreement.map(Into::into))
    }

    async fn accept_agreement(&self, problem_id: &str) -> Result<()> {
        let path = format!("problems/{}/agreement/accept/", encode(problem_id));
        let response = self.request(Method::POST, &path).await.send().await?;
        self.accept(response).await
    }

    async fn list_artifacts(&self, problem_id: &str) -> Result<Vec<Artifact>> {
        let path = format!("problems/{}/artifacts/", encode(problem_id));
        let response = self.request(Method::GET, &path).await.send().await?;
        let rows: Vec<wire::ArtifactWire> = self.list(response).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_artifact(&self, problem_id: &str, input: &NewArtifact) -> Result<Artifact> {
        let path = format!("problems/{}/artifacts/", encode(problem_id));
        let response = self
            .request(Method::POST, &path)
            .await
            .json(input)
            .send()
            .await?;
        let artifact: wire::ArtifactWire = self.json(response).await?;
        Ok(artifact.into())
    }

    async fn get_artifact(&self, id: &str) -> Result<Artifact> {
        let path = format!("artifacts/{}/", encode(id));
        let response = self.request(Method::GET, &path).await.send().await?;
        let artifact: wire::ArtifactWire = self.json(response).await?;
        Ok(artifact.into())
    }

    async fn list_artifact_comments(&self, artifact_id: &str) -> Result<Vec<Comment>> {
        let path = format!("artifacts/{}/comments/", encode(artifact_id));
        let response = self.request(Method::GET, &path).await.send().await?;
        let rows: Vec<wire::CommentWire> = self.list(response).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_artifact_comment(
        &self,
        artifact_id: &str,
        input: &NewComment,
    ) -> Result<Comment> {
        let path = format!("artifacts/{}/comments/", encode(artifact_id));
        let response = self
            .request(Method::POST, &path)
            .await
            .json(input)
            .send()
            .await?;
        let comment: wire::CommentWire = self.json(response).await?;
        Ok(comment.into())
    }

    async fn list_events(&self, problem_id: &str) -> Result<Vec<ProblemEvent>> {
        let path = format!("problems/{}/events/", encode(problem_id));
        let response = self.request(Method::GET, &path).await.send().await?;
        let rows: Vec<wire::EventWire> = self.list(response).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn login(&self, username: &str, password: &str) -> Result<CredentialBundle> {
        let body = serde_json::json!({ "username": username, "password": password });
        let response = self
            .request(Method::POST, "auth/login/")
            .await
            .json(&body)
            .send()
            .await?;
        let login: wire::LoginWire = self.json(response).await?;
        Ok(login.into())
    }

    async fn me(&self) -> Result<Identity> {
        let response = self.request(Method::GET, "auth/me/").await.send().await?;
        let identity: wire::IdentityWire = self.json(response).await?;
        Ok(identity.into())
    }

    async fn logout(&self) -> Result<()> {
        let response = self
            .request(Method::POST, "auth/logout/")
            .await
            .send()
            .await?;
        self.accept(response).await
    }
}
