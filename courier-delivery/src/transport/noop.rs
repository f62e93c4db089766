use async_trait::async_trait;
use tracing::info;

use super::{Outcome, Transport};
use crate::message::Envelope;

/// Accepts every message without touching the network.
///
/// Used when the service runs in testing mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransport;

#[async_trait]
impl Transport for NoopTransport {
    async fn attempt(&self, envelope: &Envelope) -> Outcome {
        info!(
            sender = %envelope.sender,
            recipients = envelope.recipients.len(),
            subject = %envelope.subject,
            bytes = envelope.size(),
            "Testing mode: message accepted without sending"
        );

        Outcome::Delivered {
            code: 250,
            message: "accepted (testing mode)".to_string(),
        }
    }
}
