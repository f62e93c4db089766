//! Lifecycle events emitted by the dispatcher.

use std::{sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::types::{AbandonCause, RecordId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    Accepted {
        id: RecordId,
        recipients: usize,
        source_service: Option<String>,
    },
    AttemptStarted {
        id: RecordId,
        attempt: u32,
    },
    AttemptSucceeded {
        id: RecordId,
        attempt: u32,
        code: u16,
    },
    AttemptFailed {
        id: RecordId,
        attempt: u32,
        code: Option<u16>,
        permanent: bool,
        reason: String,
    },
    RetryScheduled {
        id: RecordId,
        next_attempt: u32,
        delay: Duration,
    },
    Succeeded {
        id: RecordId,
        attempts: u32,
    },
    Abandoned {
        id: RecordId,
        cause: AbandonCause,
        reason: String,
        attempts: u32,
    },
    Cancelled {
        id: RecordId,
    },
}

impl DeliveryEvent {
    #[must_use]
    pub const fn id(&self) -> RecordId {
        match self {
            Self::Accepted { id, .. }
            | Self::AttemptStarted { id, .. }
            | Self::AttemptSucceeded { id, .. }
            | Self::AttemptFailed { id, .. }
            | Self::RetryScheduled { id, .. }
            | Self::Succeeded { id, .. }
            | Self::Abandoned { id, .. }
            | Self::Cancelled { id } => *id,
        }
    }
}

/// Receiver for [`DeliveryEvent`]s. Called on the worker task; must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DeliveryEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: &DeliveryEvent) {
        (**self).emit(event);
    }
}

/// Writes every event as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &DeliveryEvent) {
        match event {
            DeliveryEvent::Accepted {
                id,
                recipients,
                source_service,
            } => info!(
                %id,
                recipients,
                source_service = source_service.as_deref().unwrap_or("-"),
                "Send request accepted"
            ),
            DeliveryEvent::AttemptStarted { id, attempt } => {
                info!(%id, attempt, "Delivery attempt started");
            }
            DeliveryEvent::AttemptSucceeded { id, attempt, code } => {
                info!(%id, attempt, code, "Delivery attempt succeeded");
            }
            DeliveryEvent::AttemptFailed {
                id,
                attempt,
                code,
                permanent,
                reason,
            } => warn!(
                %id,
                attempt,
                code = code.map(i64::from),
                permanent,
                reason = %reason,
                "Delivery attempt failed"
            ),
            DeliveryEvent::RetryScheduled {
                id,
                next_attempt,
                delay,
            } => info!(
                %id,
                next_attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Retry scheduled"
            ),
            DeliveryEvent::Succeeded { id, attempts } => {
                info!(%id, attempts, "Message delivered to relay");
            }
            DeliveryEvent::Abandoned {
                id,
                cause,
                reason,
                attempts,
            } => warn!(
                %id,
                cause = ?cause,
                attempts,
                reason = %reason,
                "Delivery abandoned"
            ),
            DeliveryEvent::Cancelled { id } => info!(%id, "Delivery cancelled"),
        }
    }
}
