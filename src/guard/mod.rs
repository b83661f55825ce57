//! Guarded mutation orchestration
//!
//! Every mutation runs through [`ActionGuard::run_guarded`]. An unauthenticated
//! caller is bounced to login before the backend is contacted. A backend
//! refusal pending agreement acceptance parks the action in a single pending
//! slot; resolving the agreement replays it exactly once. The slot holds at
//! most one action, last writer wins.

use crate::auth::AuthStore;
use crate::error::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shown when a failed mutation carries no server detail
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong.";

/// Shown when a replayed action is refused pending agreement again
pub const AGREEMENT_STILL_REQUIRED: &str = "Agreement still required.";

/// A retryable mutation. Must be safe to invoke twice: once on the initial
/// attempt and once on replay after agreement acceptance.
pub type GuardedAction = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// What a guarded run (or a replay) amounted to, for the caller to surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// The action ran and succeeded
    Completed,
    /// Not authenticated; nothing was attempted
    LoginRequired,
    /// The backend requires agreement acceptance first; the action is parked
    /// and will replay once [`ActionGuard::resolve_agreement`] is called
    AgreementRequired { problem_id: String },
    /// The action ran and failed for a reason the guard does not absorb
    Failed { message: String },
}

struct PendingAction {
    action: GuardedAction,
    problem_id: String,
    /// Set before the replay is invoked, so a concurrent second resolution
    /// finds nothing to run.
    consumed: bool,
}

/// Seam for the authentication check, kept narrow so tests can script it
#[async_trait::async_trait]
pub trait AuthCheck: Send + Sync {
    async fn is_authenticated(&self) -> bool;
}

#[async_trait::async_trait]
impl AuthCheck for AuthStore {
    async fn is_authenticated(&self) -> bool {
        AuthStore::is_authenticated(self).await
    }
}

/// Single-slot orchestrator for mutations that may need reauthorization
pub struct ActionGuard {
    auth: Arc<dyn AuthCheck>,
    pending: Mutex<Option<PendingAction>>,
}

impl ActionGuard {
    pub fn new(auth: Arc<dyn AuthCheck>) -> Self {
        Self {
            auth,
            pending: Mutex::new(None),
        }
    }

    /// Run a mutation through the guard.
    ///
    /// Unauthenticated callers get [`GuardOutcome::LoginRequired`] without the
    /// action being invoked. An agreement refusal parks the action (replacing
    /// any previously parked one) and reports which problem's agreement is
    /// needed. Any other failure surfaces the server detail, or the generic
    /// message when there is none.
    pub async fn run_guarded(&self, problem_id: &str, action: GuardedAction) -> GuardOutcome {
        if !self.auth.is_authenticated().await {
            tracing::debug!(problem_id, "guarded action blocked, not authenticated");
            return GuardOutcome::LoginRequired;
        }

        match action().await {
            Ok(()) => GuardOutcome::Completed,
            Err(err) if err.is_agreement_required() => {
                tracing::info!(problem_id, "action parked pending agreement");
                let mut pending = self.pending.lock().await;
                if pending.is_some() {
                    tracing::debug!(problem_id, "replacing previously parked action");
                }
                *pending = Some(PendingAction {
                    action,
                    problem_id: problem_id.to_string(),
                    consumed: false,
                });
                GuardOutcome::AgreementRequired {
                    problem_id: problem_id.to_string(),
                }
            }
            Err(err) if err.is_unauthorized() => {
                // The gateway already invalidated the bundle; the action is
                // discarded, not parked.
                GuardOutcome::LoginRequired
            }
            Err(err) => GuardOutcome::Failed {
                message: failure_message(&err),
            },
        }
    }

    /// Replay the parked action after the agreement was accepted.
    ///
    /// Returns `None` when there is nothing to replay (no parked action, or a
    /// concurrent resolution already consumed it). At most one replay happens
    /// per parked action regardless of how many resolutions race.
    pub async fn resolve_agreement(&self) -> Option<GuardOutcome> {
        let (action, problem_id) = {
            let mut pending = self.pending.lock().await;
            let slot = pending.as_mut()?;
            if slot.consumed {
                return None;
            }
            slot.consumed = true;
            (slot.action.clone(), slot.problem_id.clone())
        };

        tracing::info!(problem_id, "replaying parked action");
        let outcome = match action().await {
            Ok(()) => GuardOutcome::Completed,
            Err(err) if err.is_agreement_required() => {
                // A replay refused again does not re-park; it surfaces as a
                // failure so the caller is never stuck in a loop.
                GuardOutcome::Failed {
                    message: AGREEMENT_STILL_REQUIRED.to_string(),
                }
            }
            Err(err) => GuardOutcome::Failed {
                message: failure_message(&err),
            },
        };

        // Drop the slot only if it still holds the consumed action; a fresh
        // action parked during the replay stays.
        let mut pending = self.pending.lock().await;
        if pending.as_ref().map(|p| p.consumed).unwrap_or(false) {
            *pending = None;
        }

        Some(outcome)
    }

    /// Discard the parked action without running it
    pub async fn cancel_agreement(&self) {
        let mut pending = self.pending.lock().await;
        if pending.take().is_some() {
            tracing::debug!("parked action discarded");
        }
    }

    /// Whether an unconsumed action is parked, and for which problem
    pub async fn pending_problem(&self) -> Option<String> {
        let pending = self.pending.lock().await;
        pending
            .as_ref()
            .filter(|p| !p.consumed)
            .map(|p| p.problem_id.clone())
    }
}

fn failure_message(err: &crate::error::ClientError) -> String {
    match err.detail() {
        Some(detail) if !detail.is_empty() => detail.to_string(),
        _ => GENERIC_ERROR_MESSAGE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClientError, AGREEMENT_REQUIRED};
    use futures::FutureExt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct ScriptedAuth(AtomicBool);

    #[async_trait::async_trait]
    impl AuthCheck for ScriptedAuth {
        async fn is_authenticated(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn guard(authenticated: bool) -> ActionGuard {
        ActionGuard::new(Arc::new(ScriptedAuth(AtomicBool::new(authenticated))))
    }

    fn agreement_error() -> ClientError {
        ClientError::Api {
            status: 403,
            detail: Some(AGREEMENT_REQUIRED.to_string()),
        }
    }

    /// Action that fails with AGREEMENT_REQUIRED the first `refusals` times,
    /// then succeeds, counting every invocation.
    fn flaky_action(calls: Arc<AtomicUsize>, refusals: usize) -> GuardedAction {
        Arc::new(move || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < refusals {
                    Err(agreement_error())
                } else {
                    Ok(())
                }
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn unauthenticated_never_invokes_the_action() {
        let guard = guard(false);
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = guard.run_guarded("p1", flaky_action(calls.clone(), 0)).await;

        assert_eq!(outcome, GuardOutcome::LoginRequired);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(guard.pending_problem().await, None);
    }

    #[tokio::test]
    async fn success_passes_through_without_parking() {
        let guard = guard(true);
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = guard.run_guarded("p1", flaky_action(calls.clone(), 0)).await;

        assert_eq!(outcome, GuardOutcome::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(guard.pending_problem().await, None);
    }

    #[tokio::test]
    async fn agreement_refusal_parks_and_resolution_replays_once() {
        let guard = guard(true);
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = guard.run_guarded("p1", flaky_action(calls.clone(), 1)).await;
        assert_eq!(
            outcome,
            GuardOutcome::AgreementRequired {
                problem_id: "p1".to_string()
            }
        );
        assert_eq!(guard.pending_problem().await, Some("p1".to_string()));

        let replay = guard.resolve_agreement().await;
        assert_eq!(replay, Some(GuardOutcome::Completed));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(guard.pending_problem().await, None);

        // A second resolution finds nothing.
        assert_eq!(guard.resolve_agreement().await, None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn replay_refused_again_fails_instead_of_reparking() {
        let guard = guard(true);
        let calls = Arc::new(AtomicUsize::new(0));

        guard.run_guarded("p1", flaky_action(calls.clone(), 2)).await;
        let replay = guard.resolve_agreement().await;

        assert_eq!(
            replay,
            Some(GuardOutcome::Failed {
                message: AGREEMENT_STILL_REQUIRED.to_string()
            })
        );
        assert_eq!(guard.pending_problem().await, None);
        assert_eq!(guard.resolve_agreement().await, None);
    }

    #[tokio::test]
    async fn cancel_discards_without_running() {
        let guard = guard(true);
        let calls = Arc::new(AtomicUsize::new(0));

        guard.run_guarded("p1", flaky_action(calls.clone(), 9)).await;
        guard.cancel_agreement().await;

        assert_eq!(guard.resolve_agreement().await, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn last_parked_action_wins() {
        let guard = guard(true);
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));

        guard
            .run_guarded("p1", flaky_action(calls_a.clone(), 9))
            .await;
        guard
            .run_guarded("p2", flaky_action(calls_b.clone(), 1))
            .await;

        assert_eq!(guard.pending_problem().await, Some("p2".to_string()));
        assert_eq!(guard.resolve_agreement().await, Some(GuardOutcome::Completed));

        // Only the replacement replayed.
        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_surfaces_detail_or_generic_message() {
        let guard = guard(true);

        let with_detail: GuardedAction = Arc::new(|| {
            async {
                Err(ClientError::Api {
                    status: 422,
                    detail: Some("Title is required.".to_string()),
                })
            }
            .boxed()
        });
        assert_eq!(
            guard.run_guarded("p1", with_detail).await,
            GuardOutcome::Failed {
                message: "Title is required.".to_string()
            }
        );

        let bare: GuardedAction = Arc::new(|| {
            async {
                Err(ClientError::Api {
                    status: 500,
                    detail: None,
                })
            }
            .boxed()
        });
        assert_eq!(
            guard.run_guarded("p1", bare).await,
            GuardOutcome::Failed {
                message: GENERIC_ERROR_MESSAGE.to_string()
            }
        );
    }

    #[tokio::test]
    async fn unauthorized_during_action_bounces_to_login_and_discards() {
        let guard = guard(true);
        let action: GuardedAction =
            Arc::new(|| async { Err(ClientError::Unauthorized { detail: None }) }.boxed());

        let outcome = guard.run_guarded("p1", action).await;
        assert_eq!(outcome, GuardOutcome::LoginRequired);
        assert_eq!(guard.pending_problem().await, None);
    }
}
