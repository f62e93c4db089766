//! Delivery pipeline: templates, message building, SMTP transport, retry policy
//! and the queue/worker pool that ties them together.

pub mod error;
pub mod events;
pub mod message;
pub mod notification;
pub mod policy;
pub mod processor;
pub mod queue;
pub mod service;
pub mod template;
pub mod transport;
pub mod types;

pub use error::{
    DeliveryError, DispatchError, PermanentError, SetupError, TemplateError, TemporaryError,
    ValidationError,
};
pub use events::{DeliveryEvent, EventSink, TracingSink};
pub use message::{Attachment, Envelope, MessageBuilder, MessageLimits, SendRequest};
pub use notification::{
    ApplicationApprovedRequest, ApplicationCreatedRequest, ApplicationDeletedRequest,
    ApplicationRejectedRequest, Notification, PaymentCreatedRequest, PaymentFailedRequest,
    PaymentSuccessRequest,
};
pub use policy::{RetryDecision, RetryPolicy};
pub use processor::{Dispatcher, DispatcherConfig, TransportKind};
pub use queue::{DeliveryQueue, StatusCounts};
pub use service::DispatchService;
pub use template::{RenderedContent, Substitutions, TemplateRenderer, TeraRenderer};
pub use transport::{NoopTransport, Outcome, RelayConfig, SmtpTimeouts, SmtpTransport, TlsMode, Transport};
pub use types::{
    AbandonCause, AttemptOutcome, DeliveryAttempt, DeliveryRecord, DeliveryStatus, RecordId,
};
