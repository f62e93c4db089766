//! Transports perform exactly one send attempt per call and classify the result.

mod noop;
mod smtp;

use async_trait::async_trait;

pub use noop::NoopTransport;
pub use smtp::{RelayConfig, SmtpTimeouts, SmtpTransport, TlsMode};

use crate::{error::DeliveryError, message::Envelope, types::AttemptOutcome};

/// Classified result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The relay accepted the message (this is not an inbox delivery guarantee).
    Delivered { code: u16, message: String },
    /// Worth retrying: network trouble, timeouts, 4xx replies.
    TransientFailure { code: Option<u16>, reason: String },
    /// Never retried: 5xx replies, malformed envelopes, TLS policy violations.
    PermanentFailure { code: Option<u16>, reason: String },
}

impl Outcome {
    #[must_use]
    pub const fn kind(&self) -> AttemptOutcome {
        match self {
            Self::Delivered { .. } => AttemptOutcome::Success,
            Self::TransientFailure { .. } => AttemptOutcome::TransientFailure,
            Self::PermanentFailure { .. } => AttemptOutcome::PermanentFailure,
        }
    }

    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::Delivered { code, .. } => Some(*code),
            Self::TransientFailure { code, .. } | Self::PermanentFailure { code, .. } => *code,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Delivered { message, .. } => message,
            Self::TransientFailure { reason, .. } | Self::PermanentFailure { reason, .. } => reason,
        }
    }
}

impl From<DeliveryError> for Outcome {
    fn from(error: DeliveryError) -> Self {
        let code = error.code();
        match error {
            DeliveryError::Permanent(e) => Self::PermanentFailure {
                code,
                reason: e.to_string(),
            },
            DeliveryError::Temporary(e) => Self::TransientFailure {
                code,
                reason: e.to_string(),
            },
        }
    }
}

/// A single outbound delivery attempt.
///
/// Implementations must perform at most one network send per call and must not
/// share a connection between concurrent calls.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn attempt(&self, envelope: &Envelope) -> Outcome;
}
