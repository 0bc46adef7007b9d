use std::fmt;
use thiserror::Error;

/// Stable machine-readable codes for failed KV operations. The transport
/// layer forwards these verbatim so clients can tell failure shapes apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureCode {
    Connect,
    Read,
    Write,
    WriteVerification,
    MalformedPayload,
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            FailureCode::Connect => "connect",
            FailureCode::Read => "read",
            FailureCode::Write => "write",
            FailureCode::WriteVerification => "write-verification-failed",
            FailureCode::MalformedPayload => "malformed-payload",
        };
        f.write_str(code)
    }
}

/// Errors surfaced by the entry and trash stores.
///
/// `NotConfigured` is a routine condition (no durable backend; callers fall
/// back to memory semantics), while `OperationFailed` means a backend that
/// should have worked did not and maps to a 5xx-class response upstream.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("kv backend is not configured")]
    NotConfigured,
    #[error("invalid path: {0:?}")]
    InvalidPath(String),
    #[error("kv operation failed ({code}): {source}")]
    OperationFailed {
        code: FailureCode,
        #[source]
        source: anyhow::Error,
    },
}

impl StoreError {
    pub fn op(code: FailureCode, source: impl Into<anyhow::Error>) -> Self {
        Self::OperationFailed { code, source: source.into() }
    }

    /// The machine-readable code, when this is an operation failure.
    pub fn code(&self) -> Option<FailureCode> {
        match self {
            Self::OperationFailed { code, .. } => Some(*code),
            _ => None,
        }
    }
}
