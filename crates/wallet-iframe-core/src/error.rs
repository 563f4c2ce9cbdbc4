//! Closed error taxonomy shared by the router and the wallet host.
//!
//! Retry and UI-mapping decisions switch on [`ErrorKind`], never on a
//! message substring — raw error text is classified into this taxonomy
//! exactly once, at the collaborator boundary.

use thiserror::Error;

/// The closed set of error kinds a wallet operation can terminate with.
///
/// Each variant maps to a stable wire `code` (see [`ErrorKind::code`])
/// that crosses the parent/wallet boundary inside an `ERROR` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    HandshakeTimeout,
    PortMissing,
    RequestTimeout,
    Cancelled,
    UserCancelled,
    CredentialExists,
    AccountUnavailable,
    RelayerFailure,
    ContractRejection,
    VrfUnlockFailure,
    LinkSessionExpired,
    LinkRetryExhausted,
    Retryable,
    Unknown,
}

impl ErrorKind {
    /// The stable wire identifier carried in `ERROR.payload.code`.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::HandshakeTimeout => "HANDSHAKE_TIMEOUT",
            ErrorKind::PortMissing => "PORT_MISSING",
            ErrorKind::RequestTimeout => "REQUEST_TIMEOUT",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::UserCancelled => "USER_CANCELLED",
            ErrorKind::CredentialExists => "CREDENTIAL_EXISTS",
            ErrorKind::AccountUnavailable => "ACCOUNT_UNAVAILABLE",
            ErrorKind::RelayerFailure => "RELAYER_FAILURE",
            ErrorKind::ContractRejection => "CONTRACT_REJECTION",
            ErrorKind::VrfUnlockFailure => "VRF_UNLOCK_FAILURE",
            ErrorKind::LinkSessionExpired => "LINK_SESSION_EXPIRED",
            ErrorKind::LinkRetryExhausted => "LINK_RETRY_EXHAUSTED",
            ErrorKind::Retryable => "RETRYABLE",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code {
            "HANDSHAKE_TIMEOUT" => ErrorKind::HandshakeTimeout,
            "PORT_MISSING" => ErrorKind::PortMissing,
            "REQUEST_TIMEOUT" => ErrorKind::RequestTimeout,
            "CANCELLED" => ErrorKind::Cancelled,
            "USER_CANCELLED" => ErrorKind::UserCancelled,
            "CREDENTIAL_EXISTS" => ErrorKind::CredentialExists,
            "ACCOUNT_UNAVAILABLE" => ErrorKind::AccountUnavailable,
            "RELAYER_FAILURE" => ErrorKind::RelayerFailure,
            "CONTRACT_REJECTION" => ErrorKind::ContractRejection,
            "VRF_UNLOCK_FAILURE" => ErrorKind::VrfUnlockFailure,
            "LINK_SESSION_EXPIRED" => ErrorKind::LinkSessionExpired,
            "LINK_RETRY_EXHAUSTED" => ErrorKind::LinkRetryExhausted,
            "RETRYABLE" => ErrorKind::Retryable,
            _ => ErrorKind::Unknown,
        }
    }

    /// Transient conditions that a flow may retry a bounded number of
    /// times with a fixed delay.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Retryable)
    }
}

/// The router/transport/host-side error type.
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct WalletError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl WalletError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn handshake_timeout(budget_ms: u64) -> Self {
        Self::new(
            ErrorKind::HandshakeTimeout,
            format!("Wallet iframe READY timeout after {budget_ms}ms"),
        )
    }

    pub fn request_timeout(request_id: &str) -> Self {
        Self::new(
            ErrorKind::RequestTimeout,
            format!("request {request_id} timed out"),
        )
    }

    pub fn cancelled(request_id: &str) -> Self {
        Self::new(ErrorKind::Cancelled, format!("request {request_id} cancelled"))
    }
}

pub type WalletResult<T> = Result<T, WalletError>;

/// Matches the cancellation-keyword set WebAuthn ceremonies report when
/// the user dismisses the platform prompt.
const USER_CANCEL_KEYWORDS: &[&str] = &[
    "notallowederror",
    "the operation either timed out or was not allowed",
    "user cancelled",
    "user canceled",
    "the request is not allowed",
];

/// Classifies a raw ceremony/relayer error message into a [`WalletError`],
/// the one place string-matching against a message is still permitted
/// (translating an *external* collaborator's free-form error into our
/// closed taxonomy).
pub fn classify_external_error(raw_message: &str) -> WalletError {
    let lower = raw_message.to_ascii_lowercase();
    if USER_CANCEL_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return WalletError::new(ErrorKind::UserCancelled, "cancelled, please try again");
    }
    if lower.contains("already registered") || lower.contains("credential already exists") {
        return WalletError::new(
            ErrorKind::CredentialExists,
            "passkey already exists for this account, try logging in",
        );
    }
    if lower.contains("deserialize") && lower.contains("contract") {
        return WalletError::new(
            ErrorKind::ContractRejection,
            "contract state deserialization failed",
        );
    }
    const RETRYABLE_KEYWORDS: &[&str] = &[
        "operation not allowed",
        "operation-not-allowed",
        "focus lost",
        "request already pending",
        "request-already-pending",
        "network",
        "timeout",
        "timed out",
    ];
    if RETRYABLE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return WalletError::new(ErrorKind::Retryable, raw_message);
    }
    WalletError::new(ErrorKind::Unknown, raw_message)
}
