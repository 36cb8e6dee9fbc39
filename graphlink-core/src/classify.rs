//! Failure classification for identity-provider and dependent-call errors.
//!
//! Every marker list used to tell a dead refresh token from a passing
//! hiccup lives here. Structured error codes are checked first; substring
//! matching on the human-readable message is the fallback for providers that
//! only return text.
//!
//! Misclassifying a permanent failure as transient makes the manager retry a
//! dead refresh token forever. The opposite mistake throws away a working
//! credential and forces the user to authorize again.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::provider::ProviderError;

/// Outcome of classifying a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The refresh token can no longer be used.
    PermanentAuthFailure,

    /// Network blip, provider hiccup, or provider-side throttling.
    TransientFailure,

    /// Malformed request or client misconfiguration.
    Unknown,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PermanentAuthFailure => "permanent_auth_failure",
            Self::TransientFailure => "transient_failure",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// OAuth error codes meaning the grant itself is gone.
///
/// The `aadsts*` entries are Microsoft identity platform codes: consent
/// needed, grant expired, refresh token expired through inactivity, grant
/// revoked.
const PERMANENT_CODES: &[&str] = &[
    "invalid_grant",
    "consent_required",
    "interaction_required",
    "aadsts65001",
    "aadsts70008",
    "aadsts700082",
    "aadsts50173",
];

/// Message fragments meaning the grant itself is gone.
const PERMANENT_MESSAGE_MARKERS: &[&str] = &[
    "invalid_grant",
    "invalid grant",
    "revoked",
    "expired_grant",
    "expired grant",
    "grant has expired",
    "refresh token has expired",
    "refresh token is expired",
    "consent_required",
    "interaction_required",
    "aadsts65001",
    "aadsts70008",
    "aadsts700082",
    "aadsts50173",
];

/// OAuth error codes for requests this client should never have sent.
const UNKNOWN_CODES: &[&str] = &[
    "invalid_request",
    "invalid_client",
    "unauthorized_client",
    "unsupported_grant_type",
    "invalid_scope",
];

const UNKNOWN_MESSAGE_MARKERS: &[&str] = &["malformed", "invalid_request", "invalid url"];

/// Message fragments that mark a dependent call as rejected for authorization.
const AUTH_FAILURE_MARKERS: &[&str] = &["unauthorized", "expired"];

/// Labels provider errors as permanent, transient, or unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify a provider error.
    pub fn classify(error: &ProviderError) -> FailureClass {
        Self::classify_parts(error.code.as_deref(), &error.message)
    }

    /// Classify from a raw code and message.
    pub fn classify_parts(code: Option<&str>, message: &str) -> FailureClass {
        if let Some(code) = code {
            let code = code.trim().to_ascii_lowercase();
            if PERMANENT_CODES.iter().any(|c| code.contains(c)) {
                return FailureClass::PermanentAuthFailure;
            }
            if UNKNOWN_CODES.iter().any(|c| code == *c) {
                return FailureClass::Unknown;
            }
        }

        let message = message.to_ascii_lowercase();
        if PERMANENT_MESSAGE_MARKERS.iter().any(|m| message.contains(m)) {
            return FailureClass::PermanentAuthFailure;
        }
        if UNKNOWN_MESSAGE_MARKERS.iter().any(|m| message.contains(m)) {
            return FailureClass::Unknown;
        }

        FailureClass::TransientFailure
    }

    /// Whether a dependent call's failure looks like an authorization rejection.
    ///
    /// HTTP 401, or a message mentioning "Unauthorized" or "expired".
    pub fn looks_like_auth_failure(status: Option<u16>, message: &str) -> bool {
        if status == Some(401) {
            return true;
        }
        let message = message.to_ascii_lowercase();
        AUTH_FAILURE_MARKERS.iter().any(|m| message.contains(m))
    }
}
