//! Async client for the Commons community collaboration API.
//!
//! The crate layers four pieces and exposes them behind a session facade:
//!
//! - [`auth`]: the credential bundle, its durable storage, and a broadcast of
//!   auth transitions (login, logout, backend rejection).
//! - [`gateway`]: typed calls over the REST contract, with wire normalization
//!   and failure classification at the boundary.
//! - [`cache`]: a read-through entity cache with shared in-flight fetches and
//!   patch-in-place updates for server-confirmed toggles.
//! - [`guard`]: the guarded-mutation orchestrator that bounces anonymous
//!   callers to login and parks agreement-gated actions for a single replay.
//!
//! [`CommunitySession`] wires them together and owns the consistency
//! policies, including stale-selection repair when a problem vanishes
//! backend-side.
//!
//! ```no_run
//! use commons_client::{ClientConfig, CommunitySession, GuardOutcome};
//!
//! # async fn demo() -> commons_client::Result<()> {
//! let session = CommunitySession::new(ClientConfig::default())?;
//! session.login("ada", "hunter2").await?;
//!
//! let problems = session.problems().await?;
//! if let Some(problem) = problems.first() {
//!     match session.toggle_like(&problem.id).await? {
//!         GuardOutcome::AgreementRequired { problem_id } => {
//!             // Show the agreement, then:
//!             session.accept_agreement(&problem_id).await?;
//!         }
//!         outcome => println!("{outcome:?}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod session;
pub mod types;

pub use auth::{AuthEvent, AuthStore, CredentialBundle, FileTokenStorage, MemoryTokenStorage, TokenStorage};
pub use cache::{CacheKey, CacheStats, CacheValue, EntityCache};
pub use config::ClientConfig;
pub use error::{ClientError, Result, AGREEMENT_REQUIRED, INVALID_CREDENTIALS};
pub use gateway::{CommunityApi, Gateway};
pub use guard::{ActionGuard, GuardOutcome, GuardedAction};
pub use session::{CommunitySession, STALE_PROBLEM_NOTICE};
pub use types::*;
