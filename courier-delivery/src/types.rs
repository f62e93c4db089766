//! Delivery record types exposed through status lookups.

use std::{fmt, str::FromStr};

use chrono::{DateTime, TimeDelta, Utc};
use courier_common::Address;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifier handed back by `submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Ulid);

impl RecordId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for RecordId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Result of one transport attempt, as recorded on the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    PermanentFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// Starts at 1 and increases by one per attempt.
    pub number: u32,
    pub timestamp: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    /// SMTP reply code, when the relay produced one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    pub message: String,
}

/// Why a record ended up abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbandonCause {
    PermanentFailure,
    RetriesExhausted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum DeliveryStatus {
    Queued,
    InFlight,
    Succeeded,
    Abandoned { cause: AbandonCause, reason: String },
}

impl DeliveryStatus {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Abandoned { .. })
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InFlight => "in-flight",
            Self::Succeeded => "succeeded",
            Self::Abandoned { .. } => "abandoned",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abandoned { reason, .. } => write!(f, "abandoned ({reason})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Tracked lifecycle of one accepted send request.
///
/// This is the value returned by status lookups; it is a snapshot and owns no
/// message content beyond the summary fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: RecordId,
    pub status: DeliveryStatus,
    pub attempts: Vec<DeliveryAttempt>,
    pub submitted_at: DateTime<Utc>,
    /// Wall-clock time of the next scheduled attempt while queued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub sender: Address,
    pub recipients: Vec<Address>,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_service: Option<String>,
}

impl DeliveryRecord {
    #[must_use]
    pub fn new(
        sender: Address,
        recipients: Vec<Address>,
        subject: String,
        source_service: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RecordId::generate(),
            status: DeliveryStatus::Queued,
            attempts: Vec::new(),
            submitted_at: now,
            next_attempt_at: Some(now),
            completed_at: None,
            sender,
            recipients,
            subject,
            source_service,
        }
    }

    /// Number the next attempt will carry.
    #[must_use]
    pub fn next_attempt_number(&self) -> u32 {
        self.attempt_count().saturating_add(1)
    }

    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }

    /// Append an attempt, keeping numbers contiguous and timestamps strictly increasing.
    pub fn record_attempt(
        &mut self,
        outcome: AttemptOutcome,
        code: Option<u16>,
        message: impl Into<String>,
    ) -> &DeliveryAttempt {
        let now = Utc::now();
        let timestamp = match self.attempts.last() {
            Some(last) if now <= last.timestamp => last.timestamp + TimeDelta::microseconds(1),
            _ => now,
        };

        let number = self.next_attempt_number();
        self.attempts.push(DeliveryAttempt {
            number,
            timestamp,
            outcome,
            code,
            message: message.into(),
        });

        &self.attempts[self.attempts.len() - 1]
    }
}
