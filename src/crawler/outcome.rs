//! Fetch outcomes and the rules that produce them
//!
//! The worker pool never looks at status codes itself. A [`Classifier`] maps
//! every response to one [`FetchOutcome`], using HTTP status lists first and
//! then, if configured, a service status code found inside the JSON body.

use crate::config::ClassifyConfig;
use serde::Serialize;
use std::fmt;

/// Body and metadata of a successful fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// HTTP status code
    pub status: u16,
    /// Final URL after redirects
    pub final_url: String,
    /// Response body
    pub body: String,
}

/// Classified result of one fetch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success(Payload),

    /// The service asked us to slow down
    RateLimited,

    /// The target does not exist; never retried
    NotFound,

    /// Network failure, timeout, or an unmapped status
    TransientError(String),

    /// The signature or credentials were rejected
    FatalAuthError(String),
}

impl FetchOutcome {
    /// Drop counter charged when this outcome exhausts the retry budget
    pub fn drop_reason(&self) -> Option<DropReason> {
        match self {
            Self::Success(_) => None,
            Self::RateLimited => Some(DropReason::RateLimited),
            Self::NotFound => Some(DropReason::NotFound),
            Self::TransientError(_) => Some(DropReason::Transient),
            Self::FatalAuthError(_) => Some(DropReason::AuthRejected),
        }
    }

    /// Returns true if another attempt could change the outcome
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::TransientError(_) | Self::FatalAuthError(_)
        )
    }
}

/// Why a target was given up on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    RateLimited,
    NotFound,
    Transient,
    AuthRejected,
    Extraction,

    /// A discovered target could not be offered to the frontier
    Admission,
}

impl DropReason {
    pub const ALL: [DropReason; 6] = [
        DropReason::RateLimited,
        DropReason::NotFound,
        DropReason::Transient,
        DropReason::AuthRejected,
        DropReason::Extraction,
        DropReason::Admission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::NotFound => "not_found",
            Self::Transient => "transient",
            Self::AuthRejected => "auth_rejected",
            Self::Extraction => "extraction",
            Self::Admission => "admission",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps responses to outcomes using the configured status and code lists
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: ClassifyConfig,
}

impl Classifier {
    pub fn from_config(config: &ClassifyConfig) -> Self {
        Self {
            rules: config.clone(),
        }
    }

    /// Classifies a complete response
    ///
    /// # Order of checks
    ///
    /// 1. HTTP status lists (rate-limited, not-found, auth)
    /// 2. Any other non-2xx status → TransientError
    /// 3. Service code at `code-pointer` (when configured)
    /// 4. Otherwise → Success
    pub fn classify(&self, status: u16, final_url: &str, body: String) -> FetchOutcome {
        let rules = &self.rules;

        if rules.rate_limited_statuses.contains(&status) {
            return FetchOutcome::RateLimited;
        }
        if rules.not_found_statuses.contains(&status) {
            return FetchOutcome::NotFound;
        }
        if rules.auth_statuses.contains(&status) {
            return FetchOutcome::FatalAuthError(format!("HTTP {}", status));
        }
        if !(200..300).contains(&status) {
            return FetchOutcome::TransientError(format!("HTTP {}", status));
        }

        if let Some(pointer) = &rules.code_pointer {
            let code = match service_code(&body, pointer) {
                Some(code) => code,
                None => {
                    return FetchOutcome::TransientError(format!(
                        "no service code at {}",
                        pointer
                    ))
                }
            };

            if rules.not_found_codes.contains(&code) {
                return FetchOutcome::NotFound;
            }
            if rules.rate_limited_codes.contains(&code) {
                return FetchOutcome::RateLimited;
            }
            if rules.auth_codes.contains(&code) {
                return FetchOutcome::FatalAuthError(format!("service code {}", code));
            }
            if !rules.success_codes.contains(&code) {
                return FetchOutcome::TransientError(format!("service code {}", code));
            }
        }

        FetchOutcome::Success(Payload {
            status,
            final_url: final_url.to_string(),
            body,
        })
    }
}

/// Reads an integer status code from a JSON body
fn service_code(body: &str, pointer: &str) -> Option<i64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let code = value.pointer(pointer)?;
    code.as_i64()
        .or_else(|| code.as_str().and_then(|s| s.parse().ok()))
}
