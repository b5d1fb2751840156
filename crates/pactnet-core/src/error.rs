use thiserror::Error;

/// Unified error type for the PactNet core.
///
/// Every user-visible failure maps to a short machine-readable code via
/// [`PactError::code`]; the `Display` form is the human message. Internal
/// details (paths, stack context) never cross the API boundary.
#[derive(Debug, Error)]
pub enum PactError {
    // ── Protocol errors ──────────────────────────────────────────────────────
    #[error("unsupported protocol version: {0}")]
    InvalidVersion(String),

    #[error("malformed message: {0}")]
    InvalidJson(String),

    #[error("message addressed to unknown recipient: {0}")]
    UnknownRecipient(String),

    #[error("timestamp outside the acceptance window ({skew_secs}s skew)")]
    ExpiredTimestamp { skew_secs: i64 },

    #[error("replayed nonce from sender {0}")]
    ReplayDetected(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("no public key registered for sender: {0}")]
    UnknownSender(String),

    #[error("chunk received for uninitialized transfer: {0}")]
    UnknownTransfer(String),

    #[error("message size {size} exceeds maximum {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    // ── Session errors ───────────────────────────────────────────────────────
    #[error("session expired or inactive")]
    SessionExpired,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("sequence violation: expected {expected}, got {got}")]
    SequenceError { expected: u64, got: u64 },

    // ── Wallet / ledger errors ───────────────────────────────────────────────
    #[error("insufficient funds: need {need}, have {have}")]
    InsufficientFunds { need: u64, have: u64 },

    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    #[error("invalid amount")]
    InvalidAmount,

    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(String),

    // ── Contract errors ──────────────────────────────────────────────────────
    #[error("quote expired: {0}")]
    QuoteExpired(String),

    #[error("agreement deadline passed: {0}")]
    AgreementExpired(String),

    #[error("invalid state transition: {from} -> {to}")]
    StateTransitionInvalid { from: String, to: String },

    // ── Auth errors ──────────────────────────────────────────────────────────
    #[error("authentication required")]
    Unauthenticated,

    #[error("operation not permitted for this role")]
    Forbidden,

    #[error("auth token expired")]
    TokenExpired,

    // ── Infrastructure errors ────────────────────────────────────────────────
    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("operation timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl PactError {
    /// Short wire code carried in API error responses.
    pub fn code(&self) -> &'static str {
        match self {
            PactError::InvalidVersion(_)          => "INVALID_VERSION",
            PactError::InvalidJson(_)             => "INVALID_JSON",
            PactError::UnknownRecipient(_)        => "UNKNOWN_RECIPIENT",
            PactError::ExpiredTimestamp { .. }    => "EXPIRED_TIMESTAMP",
            PactError::ReplayDetected(_)          => "REPLAY_DETECTED",
            PactError::InvalidSignature           => "INVALID_SIGNATURE",
            PactError::UnknownSender(_)           => "UNKNOWN_SENDER",
            PactError::UnknownTransfer(_)         => "UNKNOWN_TRANSFER",
            PactError::MessageTooLarge { .. }     => "MESSAGE_TOO_LARGE",
            PactError::SessionExpired             => "SESSION_EXPIRED",
            PactError::SessionNotFound(_)         => "SESSION_NOT_FOUND",
            PactError::SequenceError { .. }       => "SEQUENCE_ERROR",
            PactError::InsufficientFunds { .. }   => "INSUFFICIENT_FUNDS",
            PactError::WalletNotFound(_)          => "WALLET_NOT_FOUND",
            PactError::InvalidAmount              => "INVALID_AMOUNT",
            PactError::DuplicateTransaction(_)    => "DUPLICATE_TRANSACTION",
            PactError::QuoteExpired(_)            => "QUOTE_EXPIRED",
            PactError::AgreementExpired(_)        => "AGREEMENT_EXPIRED",
            PactError::StateTransitionInvalid { .. } => "STATE_TRANSITION_INVALID",
            PactError::Unauthenticated            => "UNAUTHENTICATED",
            PactError::Forbidden                  => "FORBIDDEN",
            PactError::TokenExpired               => "TOKEN_EXPIRED",
            PactError::Persistence(_)             => "PERSISTENCE_ERROR",
            PactError::RateLimited                => "RATE_LIMITED",
            PactError::Timeout                    => "TIMEOUT",
            PactError::Internal(_)                => "INTERNAL_ERROR",
        }
    }

    /// Whether a retry could plausibly succeed. Signature, replay and auth
    /// failures are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PactError::Persistence(_) | PactError::Timeout | PactError::RateLimited
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(PactError::ReplayDetected("a".into()).code(), "REPLAY_DETECTED");
        assert_eq!(
            PactError::InsufficientFunds { need: 10, have: 5 }.code(),
            "INSUFFICIENT_FUNDS"
        );
        assert_eq!(PactError::Timeout.code(), "TIMEOUT");
    }

    #[test]
    fn retry_policy_excludes_auth_and_signature() {
        assert!(!PactError::InvalidSignature.is_retryable());
        assert!(!PactError::Unauthenticated.is_retryable());
        assert!(PactError::Persistence("disk".into()).is_retryable());
    }
}
