//! Error types and failure classification
//!
//! Classification happens once, here and in the gateway's response handling.
//! Callers branch on the `is_*` helpers instead of inspecting raw failures;
//! every helper is a pure function of the error and returns `false`/`None`
//! for shapes it does not recognize.

use thiserror::Error;

/// Machine-readable detail sent when a write needs agreement acceptance first
pub const AGREEMENT_REQUIRED: &str = "AGREEMENT_REQUIRED";

/// Machine-readable detail sent on a rejected login
pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client error
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure (connect, timeout, TLS)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response body could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// HTTP 401; the credential bundle has already been invalidated
    #[error("unauthorized")]
    Unauthorized { detail: Option<String> },

    /// HTTP 404 (stale reference, handled as consistency repair by callers)
    #[error("not found")]
    NotFound,

    /// Any other non-success response, with the server's `detail` if present
    #[error("server error {status}")]
    Api { status: u16, detail: Option<String> },

    /// A cache entry held a payload of the wrong shape for its key
    #[error("cache shape mismatch: {0}")]
    Cache(String),
}

impl ClientError {
    /// The write was blocked pending agreement acceptance
    pub fn is_agreement_required(&self) -> bool {
        matches!(self, ClientError::Api { detail: Some(d), .. } if d == AGREEMENT_REQUIRED)
    }

    /// Login was rejected for bad credentials
    pub fn is_invalid_credentials(&self) -> bool {
        match self {
            ClientError::Unauthorized { detail: Some(d) }
            | ClientError::Api { detail: Some(d), .. } => d == INVALID_CREDENTIALS,
            _ => false,
        }
    }

    /// The backend rejected the credential on an authenticated call
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized { .. })
    }

    /// The referenced entity no longer exists
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound)
    }

    /// Transport-level failure, nothing reached the backend
    pub fn is_network(&self) -> bool {
        matches!(self, ClientError::Network(_))
    }

    /// Server-provided detail text, if the failure carried one
    pub fn detail(&self) -> Option<&str> {
        match self {
            ClientError::Unauthorized { detail } | ClientError::Api { detail, .. } => {
                detail.as_deref()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_required_is_matched_by_detail() {
        let err = ClientError::Api {
            status: 403,
            detail: Some(AGREEMENT_REQUIRED.to_string()),
        };
        assert!(err.is_agreement_required());
        assert!(!err.is_invalid_credentials());
        assert_eq!(err.detail(), Some(AGREEMENT_REQUIRED));
    }

    #[test]
    fn invalid_credentials_matched_on_unauthorized_and_api_shapes() {
        let unauthorized = ClientError::Unauthorized {
            detail: Some(INVALID_CREDENTIALS.to_string()),
        };
        let api = ClientError::Api {
            status: 401,
            detail: Some(INVALID_CREDENTIALS.to_string()),
        };
        assert!(unauthorized.is_invalid_credentials());
        assert!(api.is_invalid_credentials());
    }

    #[test]
    fn unrecognized_shapes_classify_as_nothing() {
        let err = ClientError::Api {
            status: 500,
            detail: None,
        };
        assert!(!err.is_agreement_required());
        assert!(!err.is_invalid_credentials());
        assert!(!err.is_not_found());
        assert!(!err.is_network());
        assert_eq!(err.detail(), None);

        let not_found = ClientError::NotFound;
        assert!(not_found.is_not_found());
        assert_eq!(not_found.detail(), None);
    }

    #[test]
    fn free_text_detail_passes_through() {
        let err = ClientError::Api {
            status: 422,
            detail: Some("Title is required.".to_string()),
        };
        assert!(!err.is_agreement_required());
        assert_eq!(err.detail(), Some("Title is required."));
    }
}
