//! Session facade: consistency policies over auth, gateway, cache, and guard
//!
//! Reads go through the entity cache. Mutations go through the action guard,
//! with the cache policy (patch-in-place for toggles, staleness marks for
//! creations) applied inside the guarded action so a replay after agreement
//! acceptance repeats the whole unit. A 404 on anything problem-scoped is
//! treated as a stale reference and repaired, never surfaced as a hard error.

use crate::auth::AuthStore;
use crate::cache::{CacheKey, CacheValue, EntityCache};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::gateway::{CommunityApi, Gateway};
use crate::guard::{ActionGuard, GuardOutcome, GuardedAction};
use crate::types::{
    Agreement, Artifact, Comment, Identity, NewArtifact, NewComment, NewProblem, Problem,
    ProblemEvent, Summary,
};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Transient notice recorded when the selected problem turns out to be gone
pub const STALE_PROBLEM_NOTICE: &str = "This problem no longer exists. Select another.";

/// Client session over the community backend
pub struct CommunitySession {
    auth: Arc<AuthStore>,
    api: Arc<dyn CommunityApi>,
    cache: Arc<EntityCache>,
    guard: ActionGuard,
    selected: Arc<Mutex<Option<String>>>,
    stale_notice: Arc<Mutex<Option<String>>>,
}

impl CommunitySession {
    /// Session over the HTTP gateway, with credentials persisted to the
    /// configured file (or held in memory when no path is configured).
    pub fn new(config: ClientConfig) -> Result<Self> {
        let auth = Arc::new(match &config.credentials_path {
            Some(path) => AuthStore::new(Box::new(crate::auth::FileTokenStorage::new(path))),
            None => AuthStore::in_memory(),
        });
        let fresh_for = Duration::from_millis(config.cache_fresh_ms);
        let gateway = Gateway::new(config, auth.clone())?;
        Ok(Self::with_api(Arc::new(gateway), auth, fresh_for))
    }

    /// Session over an arbitrary [`CommunityApi`] implementation
    pub fn with_api(
        api: Arc<dyn CommunityApi>,
        auth: Arc<AuthStore>,
        fresh_for: Duration,
    ) -> Self {
        let guard = ActionGuard::new(auth.clone());
        Self {
            auth,
            api,
            cache: Arc::new(EntityCache::new(fresh_for)),
            guard,
            selected: Arc::new(Mutex::new(None)),
            stale_notice: Arc::new(Mutex::new(None)),
        }
    }

    pub fn auth(&self) -> &Arc<AuthStore> {
        &self.auth
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    // ---- selection ----

    pub async fn selected(&self) -> Option<String> {
        self.selected.lock().await.clone()
    }

    pub async fn select(&self, problem_id: &str) {
        *self.selected.lock().await = Some(problem_id.to_string());
    }

    /// Consume the stale-selection notice, if one was recorded
    pub async fn take_stale_notice(&self) -> Option<String> {
        self.stale_notice.lock().await.take()
    }

    /// Re-check the selection against the authoritative list: a vanished
    /// selection is repaired like a 404, and an empty selection falls back to
    /// the first listed problem.
    pub async fn reconcile_selection(&self, problems: &[Problem]) {
        let mut selected = self.selected.lock().await;
        match selected.as_deref() {
            Some(id) if !problems.iter().any(|p| p.id == id) => {
                tracing::info!(problem_id = id, "selected problem vanished from list");
                *selected = problems.first().map(|p| p.id.clone());
                *self.stale_notice.lock().await = Some(STALE_PROBLEM_NOTICE.to_string());
            }
            None => *selected = problems.first().map(|p| p.id.clone()),
            Some(_) => {}
        }
    }

    /// Deselect, record the notice, and mark everything scoped to the vanished
    /// problem stale, including the list it can no longer appear in.
    async fn handle_missing_problem(&self, problem_id: &str) {
        tracing::info!(problem_id, "problem no longer exists, repairing state");
        {
            let mut selected = self.selected.lock().await;
            if selected.as_deref() == Some(problem_id) {
                *selected = None;
            }
        }
        *self.stale_notice.lock().await = Some(STALE_PROBLEM_NOTICE.to_string());
        let id = problem_id.to_string();
        self.cache.invalidate(&CacheKey::ProblemList).await;
        self.cache.invalidate(&CacheKey::Problem(id.clone())).await;
        self.cache
            .invalidate(&CacheKey::ProblemComments(id.clone()))
            .await;
        self.cache.invalidate(&CacheKey::Artifacts(id.clone())).await;
        self.cache.invalidate(&CacheKey::Events(id)).await;
    }

    // ---- reads ----

    pub async fn summary(&self) -> Result<Summary> {
        let api = self.api.clone();
        self.cache
            .get_or_fetch(CacheKey::Summary, || {
                let api = api.clone();
                async move { Ok(CacheValue::Summary(api.summary().await?)) }
            })
            .await?
            .into_summary()
    }

    /// The problem list, with the selection reconciled against it
    pub async fn problems(&self) -> Result<Vec<Problem>> {
        let api = self.api.clone();
        let problems = self
            .cache
            .get_or_fetch(CacheKey::ProblemList, || {
                let api = api.clone();
                async move { Ok(CacheValue::Problems(api.list_problems().await?)) }
            })
            .await?
            .into_problems()?;
        self.reconcile_selection(&problems).await;
        Ok(problems)
    }

    /// One problem; `Ok(None)` when it no longer exists (state repaired)
    pub async fn problem(&self, problem_id: &str) -> Result<Option<Problem>> {
        let api = self.api.clone();
        let id = problem_id.to_string();
        let fetched = self
            .cache
            .get_or_fetch(CacheKey::Problem(id.clone()), || {
                let api = api.clone();
                let id = id.clone();
                async move { Ok(CacheValue::Problem(api.get_problem(&id).await?)) }
            })
            .await;
        match fetched {
            Ok(value) => Ok(Some(value.into_problem()?)),
            Err(err) if err.is_not_found() => {
                self.handle_missing_problem(problem_id).await;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Comments on a problem; empty (with state repaired) when it vanished
    pub async fn comments(&self, problem_id: &str) -> Result<Vec<Comment>> {
        let api = self.api.clone();
        let id = problem_id.to_string();
        let fetched = self
            .cache
            .get_or_fetch(CacheKey::ProblemComments(id.clone()), || {
                let api = api.clone();
                let id = id.clone();
                async move { Ok(CacheValue::Comments(api.list_comments(&id).await?)) }
            })
            .await;
        self.unwrap_problem_scoped(problem_id, fetched.map(CacheValue::into_comments))
            .await
    }

    pub async fn artifacts(&self, problem_id: &str) -> Result<Vec<Artifact>> {
        let api = self.api.clone();
        let id = problem_id.to_string();
        let fetched = self
            .cache
            .get_or_fetch(CacheKey::Artifacts(id.clone()), || {
                let api = api.clone();
                let id = id.clone();
                async move { Ok(CacheValue::Artifacts(api.list_artifacts(&id).await?)) }
            })
            .await;
        self.unwrap_problem_scoped(problem_id, fetched.map(CacheValue::into_artifacts))
            .await
    }

    /// Comments on an artifact. A 404 here means the artifact is gone, not
    /// the problem; no selection repair applies.
    pub async fn artifact_comments(&self, artifact_id: &str) -> Result<Vec<Comment>> {
        let api = self.api.clone();
        let id = artifact_id.to_string();
        self.cache
            .get_or_fetch(CacheKey::ArtifactComments(id.clone()), || {
                let api = api.clone();
                let id = id.clone();
                async move {
                    Ok(CacheValue::Comments(
                        api.list_artifact_comments(&id).await?,
                    ))
                }
            })
            .await?
            .into_comments()
    }

    pub async fn events(&self, problem_id: &str) -> Result<Vec<ProblemEvent>> {
        let api = self.api.clone();
        let id = problem_id.to_string();
        let fetched = self
            .cache
            .get_or_fetch(CacheKey::Events(id.clone()), || {
                let api = api.clone();
                let id = id.clone();
                async move { Ok(CacheValue::Events(api.list_events(&id).await?)) }
            })
            .await;
        self.unwrap_problem_scoped(problem_id, fetched.map(CacheValue::into_events))
            .await
    }

    async fn unwrap_problem_scoped<T>(
        &self,
        problem_id: &str,
        fetched: Result<Result<Vec<T>>>,
    ) -> Result<Vec<T>> {
        match fetched {
            Ok(inner) => inner,
            Err(err) if err.is_not_found() => {
                self.handle_missing_problem(problem_id).await;
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    // ---- guarded mutations ----

    /// Toggle the viewer's like on a problem, patching the cached flag and
    /// counter together from the server-confirmed result.
    pub async fn toggle_like(&self, problem_id: &str) -> Result<GuardOutcome> {
        let Some(current) = self.problem(problem_id).await? else {
            return Ok(GuardOutcome::Failed {
                message: STALE_PROBLEM_NOTICE.to_string(),
            });
        };
        let api = self.api.clone();
        let cache = self.cache.clone();
        let id = problem_id.to_string();
        let liked = current.viewer.has_liked;
        let action: GuardedAction = Arc::new(move || {
            let api = api.clone();
            let cache = cache.clone();
            let id = id.clone();
            async move {
                let toggle = if liked {
                    api.unlike_problem(&id).await?
                } else {
                    api.like_problem(&id).await?
                };
                cache
                    .patch_problem(&id, |p| {
                        p.viewer.has_liked = toggle.has_liked;
                        p.counters.likes = toggle.likes_count;
                    })
                    .await;
                Ok(())
            }
            .boxed()
        });
        Ok(self.guard.run_guarded(problem_id, action).await)
    }

    /// Toggle the viewer's work-in-progress mark on a problem
    pub async fn toggle_work(&self, problem_id: &str) -> Result<GuardOutcome> {
        let Some(current) = self.problem(problem_id).await? else {
            return Ok(GuardOutcome::Failed {
                message: STALE_PROBLEM_NOTICE.to_string(),
            });
        };
        let api = self.api.clone();
        let cache = self.cache.clone();
        let id = problem_id.to_string();
        let working = current.viewer.is_working;
        let viewer = self.auth.read().await.and_then(|b| b.user);
        let action: GuardedAction = Arc::new(move || {
            let api = api.clone();
            let cache = cache.clone();
            let id = id.clone();
            let viewer = viewer.clone();
            async move {
                let toggle = if working {
                    api.unmark_working(&id).await?
                } else {
                    api.mark_working(&id).await?
                };
                cache
                    .patch_problem(&id, |p| {
                        p.viewer.is_working = toggle.is_working;
                        p.counters.working = toggle.working_count;
                        sync_working_on(p, toggle.is_working, viewer.as_ref());
                    })
                    .await;
                Ok(())
            }
            .boxed()
        });
        Ok(self.guard.run_guarded(problem_id, action).await)
    }

    /// Post a comment on a problem; the cached comment list goes stale
    pub async fn add_comment(&self, problem_id: &str, input: NewComment) -> Result<GuardOutcome> {
        let api = self.api.clone();
        let cache = self.cache.clone();
        let id = problem_id.to_string();
        let action: GuardedAction = Arc::new(move || {
            let api = api.clone();
            let cache = cache.clone();
            let id = id.clone();
            let input = input.clone();
            async move {
                api.create_comment(&id, &input).await?;
                cache
                    .invalidate(&CacheKey::ProblemComments(id.clone()))
                    .await;
                Ok(())
            }
            .boxed()
        });
        Ok(self.guard.run_guarded(problem_id, action).await)
    }

    /// Toggle the viewer's like on one comment of a problem
    pub async fn toggle_comment_like(
        &self,
        problem_id: &str,
        comment_id: &str,
    ) -> Result<GuardOutcome> {
        let comments = self.comments(problem_id).await?;
        let Some(current) = comments.iter().find(|c| c.id == comment_id) else {
            return Ok(GuardOutcome::Failed {
                message: STALE_PROBLEM_NOTICE.to_string(),
            });
        };
        let api = self.api.clone();
        let cache = self.cache.clone();
        let pid = problem_id.to_string();
        let cid = comment_id.to_string();
        let liked = current.has_liked;
        let action: GuardedAction = Arc::new(move || {
            let api = api.clone();
            let cache = cache.clone();
            let pid = pid.clone();
            let cid = cid.clone();
            async move {
                let toggle = if liked {
                    api.unlike_comment(&pid, &cid).await?
                } else {
                    api.like_comment(&pid, &cid).await?
                };
                cache
                    .patch_comment(&CacheKey::ProblemComments(pid.clone()), &cid, |c| {
                        c.has_liked = toggle.has_liked;
                        c.likes_count = toggle.likes_count;
                    })
                    .await;
                Ok(())
            }
            .boxed()
        });
        Ok(self.guard.run_guarded(problem_id, action).await)
    }

    /// Attach an artifact; the artifact list and the problem list (its
    /// artifact counter drifted) go stale.
    pub async fn create_artifact(
        &self,
        problem_id: &str,
        input: NewArtifact,
    ) -> Result<GuardOutcome> {
        let api = self.api.clone();
        let cache = self.cache.clone();
        let id = problem_id.to_string();
        let action: GuardedAction = Arc::new(move || {
            let api = api.clone();
            let cache = cache.clone();
            let id = id.clone();
            let input = input.clone();
            async move {
                api.create_artifact(&id, &input).await?;
                cache.invalidate(&CacheKey::Artifacts(id.clone())).await;
                cache.invalidate(&CacheKey::Problem(id.clone())).await;
                cache.invalidate(&CacheKey::ProblemList).await;
                Ok(())
            }
            .boxed()
        });
        Ok(self.guard.run_guarded(problem_id, action).await)
    }

    /// Comment on an artifact; that artifact's comment list goes stale
    pub async fn add_artifact_comment(
        &self,
        problem_id: &str,
        artifact_id: &str,
        input: NewComment,
    ) -> Result<GuardOutcome> {
        let api = self.api.clone();
        let cache = self.cache.clone();
        let aid = artifact_id.to_string();
        let action: GuardedAction = Arc::new(move || {
            let api = api.clone();
            let cache = cache.clone();
            let aid = aid.clone();
            let input = input.clone();
            async move {
                api.create_artifact_comment(&aid, &input).await?;
                cache
                    .invalidate(&CacheKey::ArtifactComments(aid.clone()))
                    .await;
                Ok(())
            }
            .boxed()
        });
        Ok(self.guard.run_guarded(problem_id, action).await)
    }

    /// Propose a new problem; on success it is primed in the cache and
    /// selected, and the list goes stale.
    pub async fn create_problem(&self, input: NewProblem) -> Result<GuardOutcome> {
        let api = self.api.clone();
        let cache = self.cache.clone();
        let selected = self.selected.clone();
        let action: GuardedAction = Arc::new(move || {
            let api = api.clone();
            let cache = cache.clone();
            let selected = selected.clone();
            let input = input.clone();
            async move {
                let problem = api.create_problem(&input).await?;
                cache
                    .insert(
                        CacheKey::Problem(problem.id.clone()),
                        CacheValue::Problem(problem.clone()),
                    )
                    .await;
                cache.invalidate(&CacheKey::ProblemList).await;
                *selected.lock().await = Some(problem.id);
                Ok(())
            }
            .boxed()
        });
        // Creation is not scoped to an existing problem; the guard still
        // gates it on authentication.
        Ok(self.guard.run_guarded("", action).await)
    }

    // ---- agreement flow ----

    /// The agreement gating writes on a problem, if one is active
    pub async fn agreement(&self, problem_id: &str) -> Result<Option<Agreement>> {
        self.api.get_agreement(problem_id).await
    }

    /// Accept the agreement, then replay the parked action if there is one.
    /// `Ok(None)` means acceptance went through with nothing parked.
    pub async fn accept_agreement(&self, problem_id: &str) -> Result<Option<GuardOutcome>> {
        self.api.accept_agreement(problem_id).await?;
        Ok(self.guard.resolve_agreement().await)
    }

    /// Decline the agreement prompt, discarding the parked action
    pub async fn dismiss_agreement(&self) {
        self.guard.cancel_agreement().await;
    }

    /// Problem awaiting agreement resolution, if an action is parked
    pub async fn pending_agreement(&self) -> Option<String> {
        self.guard.pending_problem().await
    }

    // ---- auth flow ----

    /// Exchange credentials for a bundle, then hydrate the user identity
    pub async fn login(&self, username: &str, password: &str) -> Result<Identity> {
        let bundle = self.api.login(username, password).await?;
        self.auth.write(bundle).await;
        let user = self.api.me().await?;
        self.auth.update_user(user.clone()).await;
        Ok(user)
    }

    /// Re-validate a persisted bundle on startup. Returns whether the session
    /// is authenticated afterwards. A rejected bundle has already been cleared
    /// by the gateway; a transport failure keeps the bundle and assumes the
    /// session is still good.
    pub async fn bootstrap(&self) -> Result<bool> {
        if !self.auth.is_authenticated().await {
            return Ok(false);
        }
        match self.api.me().await {
            Ok(user) => {
                self.auth.update_user(user).await;
                Ok(true)
            }
            Err(err) if err.is_unauthorized() => Ok(false),
            Err(err) if err.is_network() => {
                tracing::warn!(%err, "could not re-validate credentials, keeping them");
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }

    /// Tell the backend, best-effort, then always drop local credentials
    pub async fn logout(&self) {
        if let Err(err) = self.api.logout().await {
            tracing::warn!(%err, "logout request failed, clearing locally anyway");
        }
        self.auth.clear().await;
    }
}

/// Keep the working-on roster consistent with the viewer's own toggle when
/// their identity is known; other members' entries are server-owned.
fn sync_working_on(problem: &mut Problem, is_working: bool, viewer: Option<&Identity>) {
    let Some(viewer) = viewer else { return };
    if is_working {
        if !problem.working_on.iter().any(|m| m.id == viewer.id) {
            problem.working_on.push(viewer.clone());
        }
    } else {
        problem.working_on.retain(|m| m.id != viewer.id);
    }
}
