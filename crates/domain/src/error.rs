/// Shared error taxonomy used across every crate in the platform.
///
/// Variant names track the HTTP-facing taxonomy in the error handling
/// design: `InvalidInput` (400), `Unauthorized` (401), `NotFound` (404),
/// `Rejected` (429), `Unavailable` (503), `UpstreamFailure` (recovered
/// locally wherever possible), `Internal` (500).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected: {kind}")]
    Rejected { kind: RejectKind },

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("upstream failure ({service}): {message}")]
    UpstreamFailure { service: String, message: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal: {0}")]
    Internal(String),
}

/// The specific admission-control reason a call was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectKind {
    TenantConcurrency,
    TenantRate,
    Global,
}

impl std::fmt::Display for RejectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectKind::TenantConcurrency => "tenant_concurrency",
            RejectKind::TenantRate => "tenant_rate",
            RejectKind::Global => "global",
        };
        write!(f, "{s}")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
