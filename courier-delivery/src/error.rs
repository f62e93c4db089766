//! Typed errors for the dispatch pipeline.
//!
//! Two families live here:
//! - request errors ([`ValidationError`], [`TemplateError`], [`DispatchError`]) that
//!   are returned synchronously to the caller of the dispatcher, and
//! - transport errors ([`DeliveryError`]) that never leave the worker loop; they
//!   are classified as permanent (5xx) or temporary (4xx, network) and turned
//!   into an attempt outcome.

use courier_common::AddressError;
use courier_smtp::ClientError;
use thiserror::Error;

use crate::types::RecordId;

/// Template lookup and rendering failures.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Failed to render template '{name}': {reason}")]
    Render { name: String, reason: String },
}

/// A send request that can never be delivered as submitted.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("At least one recipient is required")]
    NoRecipients,

    #[error("Invalid {field} address '{value}': {source}")]
    InvalidAddress {
        field: &'static str,
        value: String,
        #[source]
        source: AddressError,
    },

    #[error("Neither a body nor a template was supplied")]
    MissingContent,

    #[error("Attachment filename must not be empty")]
    EmptyAttachmentName,

    #[error("Attachment '{filename}' is {size} bytes, limit is {limit}")]
    AttachmentTooLarge {
        filename: String,
        size: usize,
        limit: usize,
    },

    #[error("Attachments total {size} bytes, limit is {limit}")]
    AttachmentsTooLarge { size: usize, limit: usize },

    #[error("Invalid header '{0}'")]
    InvalidHeader(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Failed to encode message: {0}")]
    Encoding(String),
}

/// Errors returned by dispatcher operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Delivery record not found: {0}")]
    NotFound(RecordId),

    #[error("Delivery record {id} is {status} and cannot be cancelled")]
    NotCancellable { id: RecordId, status: &'static str },
}

/// Errors raised while assembling a dispatcher from configuration.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Invalid default sender '{value}': {source}")]
    InvalidSender {
        value: String,
        #[source]
        source: AddressError,
    },

    #[error("Failed to load templates: {0}")]
    Templates(#[from] TemplateError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Transport failure classification.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Never retried.
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Retried with backoff until the attempt budget runs out.
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),
}

#[derive(Debug, Error)]
pub enum PermanentError {
    /// The relay rejected the sender, a recipient, or the message (5xx).
    #[error("Message rejected: {code} {message}")]
    Rejected { code: u16, message: String },

    /// The relay refused our credentials.
    #[error("Authentication failed: {code} {message}")]
    AuthenticationFailed { code: u16, message: String },

    #[error("TLS required: {0}")]
    TlsRequired(String),

    #[error("Relay does not support {0}")]
    Unsupported(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
}

#[derive(Debug, Error)]
pub enum TemporaryError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    /// The relay deferred the message (4xx), including auth rate limits.
    #[error("Temporary SMTP error: {code} {message}")]
    Deferred { code: u16, message: String },

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl DeliveryError {
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// The SMTP reply code behind this failure, if the relay sent one.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::Permanent(
                PermanentError::Rejected { code, .. }
                | PermanentError::AuthenticationFailed { code, .. },
            )
            | Self::Temporary(TemporaryError::Deferred { code, .. }) => Some(*code),
            _ => None,
        }
    }
}

/// Classify SMTP client errors.
///
/// - **4xx replies** → Temporary
/// - **5xx replies** → Permanent
/// - **I/O, closed connections, TLS handshakes** → Temporary
/// - **Unparseable replies** → Temporary (the relay may recover)
/// - **Unrenderable message** → Permanent
impl From<ClientError> for DeliveryError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::SmtpError { code, message } if (500..600).contains(&code) => {
                Self::Permanent(PermanentError::Rejected { code, message })
            }

            ClientError::SmtpError { code, message } => {
                Self::Temporary(TemporaryError::Deferred { code, message })
            }

            ClientError::Io(e) => {
                Self::Temporary(TemporaryError::ConnectionFailed(format!("I/O error: {e}")))
            }

            ClientError::ConnectionClosed => Self::Temporary(TemporaryError::ConnectionFailed(
                "Connection closed unexpectedly".to_string(),
            )),

            ClientError::TlsError(msg) => Self::Temporary(TemporaryError::TlsHandshakeFailed(msg)),

            ClientError::Unsupported(what) => Self::Permanent(PermanentError::Unsupported(what)),

            ClientError::MessageError(msg) => {
                Self::Permanent(PermanentError::MalformedEnvelope(msg))
            }

            ClientError::ParseError(msg) => Self::Temporary(TemporaryError::Protocol(msg)),

            ClientError::Utf8Error(e) => {
                Self::Temporary(TemporaryError::Protocol(format!("UTF-8 decoding error: {e}")))
            }
        }
    }
}
