//! Record arena and ready queue.

mod schedule;

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use self::schedule::Schedule;
use crate::{
    error::DispatchError,
    message::Envelope,
    policy::RetryDecision,
    transport::Outcome,
    types::{AbandonCause, DeliveryRecord, DeliveryStatus, RecordId},
};

/// Reason recorded on records cancelled through [`DeliveryQueue::cancel`].
pub const CANCELLED: &str = "cancelled by request";

#[derive(Debug)]
struct Entry {
    record: DeliveryRecord,
    /// Released once the record is terminal.
    envelope: Option<Arc<Envelope>>,
}

/// Work handed to a worker for a single attempt.
#[derive(Debug, Clone)]
pub struct Claim {
    pub id: RecordId,
    pub attempt: u32,
    pub envelope: Arc<Envelope>,
}

/// Number of tracked records per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub in_flight: usize,
    pub succeeded: usize,
    pub abandoned: usize,
}

impl StatusCounts {
    /// Records not yet terminal.
    #[must_use]
    pub const fn pending(&self) -> usize {
        self.queued + self.in_flight
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending() + self.succeeded + self.abandoned
    }
}

/// Tracks every accepted record and schedules its attempts.
///
/// A record id is either waiting in the ready queue or claimed by exactly one
/// worker, never both.
#[derive(Debug, Default)]
pub struct DeliveryQueue {
    records: DashMap<RecordId, Entry>,
    schedule: Schedule,
}

impl DeliveryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `record` and make it due immediately.
    pub fn insert(&self, record: DeliveryRecord, envelope: Arc<Envelope>) -> RecordId {
        let id = record.id;
        self.records.insert(
            id,
            Entry {
                record,
                envelope: Some(envelope),
            },
        );
        self.schedule.push(Instant::now(), id);
        id
    }

    /// Snapshot of a record.
    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<DeliveryRecord> {
        self.records.get(id).map(|entry| entry.record.clone())
    }

    /// Wait for the next due record id. The id may refer to a record that is no
    /// longer queued; [`Self::claim`] filters those out.
    pub async fn next_due(&self) -> RecordId {
        self.schedule.next_due().await
    }

    /// Move a queued record to in-flight and hand it to the caller.
    ///
    /// Returns `None` when the record is gone or not queued.
    pub fn claim(&self, id: &RecordId) -> Option<Claim> {
        let mut entry = self.records.get_mut(id)?;
        if entry.record.status != DeliveryStatus::Queued {
            return None;
        }
        let envelope = entry.envelope.clone()?;

        entry.record.status = DeliveryStatus::InFlight;
        entry.record.next_attempt_at = None;

        Some(Claim {
            id: *id,
            attempt: entry.record.next_attempt_number(),
            envelope,
        })
    }

    /// Record the attempt a worker just made and apply the retry decision.
    ///
    /// Returns the updated snapshot.
    pub fn complete(
        &self,
        id: &RecordId,
        outcome: &Outcome,
        decision: &RetryDecision,
    ) -> Option<DeliveryRecord> {
        let (snapshot, retry_in) = {
            let mut entry = self.records.get_mut(id)?;
            let entry = &mut *entry;
            entry
                .record
                .record_attempt(outcome.kind(), outcome.code(), outcome.message());

            let mut retry_in = None;
            match decision {
                RetryDecision::Complete => {
                    entry.record.status = DeliveryStatus::Succeeded;
                    entry.record.completed_at = Some(Utc::now());
                    entry.envelope = None;
                }
                RetryDecision::Retry { delay, .. } => {
                    entry.record.status = DeliveryStatus::Queued;
                    entry.record.next_attempt_at = Some(Utc::now() + to_delta(*delay));
                    retry_in = Some(*delay);
                }
                RetryDecision::Abandon { cause, reason } => {
                    entry.record.status = DeliveryStatus::Abandoned {
                        cause: *cause,
                        reason: reason.clone(),
                    };
                    entry.record.completed_at = Some(Utc::now());
                    entry.envelope = None;
                }
            }

            (entry.record.clone(), retry_in)
        };

        if let Some(delay) = retry_in {
            self.schedule.push(Instant::now() + delay, *id);
        }

        Some(snapshot)
    }

    /// Abandon a queued record without another attempt.
    ///
    /// # Errors
    ///
    /// [`DispatchError::NotFound`] for unknown ids, [`DispatchError::NotCancellable`]
    /// for records that are in flight or already terminal.
    pub fn cancel(&self, id: &RecordId) -> Result<DeliveryRecord, DispatchError> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or(DispatchError::NotFound(*id))?;

        if entry.record.status != DeliveryStatus::Queued {
            return Err(DispatchError::NotCancellable {
                id: *id,
                status: entry.record.status.label(),
            });
        }

        entry.record.status = DeliveryStatus::Abandoned {
            cause: AbandonCause::Cancelled,
            reason: CANCELLED.to_string(),
        };
        entry.record.next_attempt_at = None;
        entry.record.completed_at = Some(Utc::now());
        entry.envelope = None;

        Ok(entry.record.clone())
    }

    /// Snapshots of all records whose status label matches `status`, or all
    /// records when `status` is `None`, oldest first.
    #[must_use]
    pub fn list(&self, status: Option<&str>) -> Vec<DeliveryRecord> {
        let mut records: Vec<DeliveryRecord> = self
            .records
            .iter()
            .filter(|entry| status.is_none_or(|s| entry.record.status.label() == s))
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by_key(|r| (r.submitted_at, r.id));
        records
    }

    #[must_use]
    pub fn counts(&self) -> StatusCounts {
        self.records
            .iter()
            .fold(StatusCounts::default(), |mut counts, entry| {
                match entry.record.status {
                    DeliveryStatus::Queued => counts.queued += 1,
                    DeliveryStatus::InFlight => counts.in_flight += 1,
                    DeliveryStatus::Succeeded => counts.succeeded += 1,
                    DeliveryStatus::Abandoned { .. } => counts.abandoned += 1,
                }
                counts
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop terminal records completed before `cutoff`. Returns how many were removed.
    pub fn purge_terminal(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, entry| {
            !(entry.record.status.is_terminal()
                && entry.record.completed_at.is_some_and(|at| at < cutoff))
        });
        before.saturating_sub(self.records.len())
    }
}

fn to_delta(delay: Duration) -> TimeDelta {
    TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX)
}
