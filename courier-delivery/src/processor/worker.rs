use std::sync::Arc;

use courier_common::{Signal, internal};
use tokio::sync::broadcast;
use tracing::debug;

use super::Inner;
use crate::{
    events::DeliveryEvent,
    policy::RetryDecision,
    transport::Outcome,
    types::RecordId,
};

/// One slot of the worker pool. Owns at most one record at a time.
pub(super) struct Worker {
    index: usize,
    inner: Arc<Inner>,
}

impl Worker {
    pub(super) const fn new(index: usize, inner: Arc<Inner>) -> Self {
        Self { index, inner }
    }

    pub(super) async fn run(self, mut shutdown: broadcast::Receiver<Signal>) {
        debug!(worker = self.index, "Worker started");

        loop {
            let id = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                id = self.inner.queue.next_due() => id,
            };

            // Shutdown is only observed between attempts.
            self.process(id).await;
        }

        internal!("Worker {} stopped", self.index);
    }

    async fn process(&self, id: RecordId) {
        let Some(claim) = self.inner.queue.claim(&id) else {
            debug!(worker = self.index, %id, "Skipping record that is no longer queued");
            return;
        };

        let events = &self.inner.events;
        events.emit(&DeliveryEvent::AttemptStarted {
            id,
            attempt: claim.attempt,
        });

        let limit = self.inner.config.attempt_timeout();
        let outcome = tokio::time::timeout(limit, self.inner.transport.attempt(&claim.envelope))
            .await
            .unwrap_or_else(|_| Outcome::TransientFailure {
                code: None,
                reason: format!("attempt timed out after {}s", limit.as_secs()),
            });
        drop(claim.envelope);

        match &outcome {
            Outcome::Delivered { code, .. } => events.emit(&DeliveryEvent::AttemptSucceeded {
                id,
                attempt: claim.attempt,
                code: *code,
            }),
            Outcome::TransientFailure { code, reason } | Outcome::PermanentFailure { code, reason } => {
                events.emit(&DeliveryEvent::AttemptFailed {
                    id,
                    attempt: claim.attempt,
                    code: *code,
                    permanent: matches!(outcome, Outcome::PermanentFailure { .. }),
                    reason: reason.clone(),
                });
            }
        }

        let decision = self.inner.config.retry.decide(&outcome, claim.attempt);
        let Some(record) = self.inner.queue.complete(&id, &outcome, &decision) else {
            return;
        };

        let attempts = record.attempt_count();
        match decision {
            RetryDecision::Complete => events.emit(&DeliveryEvent::Succeeded { id, attempts }),
            RetryDecision::Retry { delay, .. } => events.emit(&DeliveryEvent::RetryScheduled {
                id,
                next_attempt: attempts + 1,
                delay,
            }),
            RetryDecision::Abandon { cause, reason } => events.emit(&DeliveryEvent::Abandoned {
                id,
                cause,
                reason,
                attempts,
            }),
        }
    }
}
