use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use harvester_core::Stage;
use url::Url;

/// Bytes retrieved by one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub final_url: Url,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FailureKind,
    /// Response body for status failures, transport detail otherwise.
    pub message: String,
    /// Server-requested wait, from a `Retry-After` header.
    pub retry_after: Option<Duration>,
}

impl FetchError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub(crate) fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn status(&self) -> Option<u16> {
        match self.kind {
            FailureKind::HttpStatus(code) => Some(code),
            _ => None,
        }
    }

    /// 403 and 429 are how hosting APIs signal rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self.status(), Some(403 | 429))
    }

    pub fn is_transient(&self) -> bool {
        match self.kind {
            FailureKind::Timeout | FailureKind::Network => true,
            FailureKind::HttpStatus(code) => code >= 500 || self.is_rate_limited(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    RedirectLimitExceeded,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    InvalidJson,
    Io,
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::InvalidJson => write!(f, "invalid json"),
            FailureKind::Io => write!(f, "io error"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

/// Byte-level progress of one transfer. `total` is the declared content length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub url: String,
    pub bytes_so_far: u64,
    pub total: Option<u64>,
}

impl TransferProgress {
    /// Completed fraction in `0.0..=1.0`, or `None` when the length is unknown.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some((self.bytes_so_far as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }
}

/// Final state of one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Filtered out by the requested file type.
    Ineligible,
    Persisted(PathBuf),
    SkippedExisting(PathBuf),
    Failed { stage: Stage, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestEvent {
    Transfer(TransferProgress),
    CandidateFinished {
        location: String,
        outcome: CandidateOutcome,
    },
    LocationFailed {
        location: String,
        reason: String,
    },
}
