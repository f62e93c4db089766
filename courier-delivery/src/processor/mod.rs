//! Dispatcher orchestration: admission, status, cancellation and the worker pool.

mod cleanup;
mod worker;

use std::{path::PathBuf, sync::Arc, time::Duration};

use courier_common::{Address, Signal, internal};
use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast, task::JoinSet};
use tracing::error;

use crate::{
    error::{DispatchError, SetupError},
    events::{DeliveryEvent, EventSink, TracingSink},
    message::{MessageBuilder, MessageLimits, SendRequest},
    policy::RetryPolicy,
    queue::{DeliveryQueue, StatusCounts},
    template::{TemplateRenderer, TeraRenderer},
    transport::{NoopTransport, RelayConfig, SmtpTransport, Transport},
    types::{DeliveryRecord, RecordId},
};

/// Which transport the dispatcher sends through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    #[default]
    Smtp,
    /// Accept every message without sending it.
    Noop,
}

/// Dispatcher settings. Read once at start-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Upper bound on concurrent attempts and therefore on relay connections.
    ///
    /// Default: 4
    #[serde(default = "defaults::worker_count")]
    pub worker_count: usize,

    /// Limit for one whole attempt; exceeding it counts as a transient failure.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// How long terminal records stay visible to status lookups.
    ///
    /// Default: 3600 seconds
    #[serde(default = "defaults::record_retention_secs")]
    pub record_retention_secs: u64,

    /// Default: 60 seconds
    #[serde(default = "defaults::cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Readiness fails while more records than this are queued or in flight.
    ///
    /// Default: 10000
    #[serde(default = "defaults::max_queue_size")]
    pub max_queue_size: usize,

    /// Sender used when a request does not name one.
    ///
    /// Default: `payment@example.com`
    #[serde(default = "defaults::default_sender")]
    pub default_sender: String,

    /// Extra templates loaded on top of the built-in ones.
    #[serde(default)]
    pub template_dir: Option<PathBuf>,

    #[serde(default)]
    pub transport: TransportKind,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub limits: MessageLimits,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: defaults::worker_count(),
            attempt_timeout_secs: defaults::attempt_timeout_secs(),
            record_retention_secs: defaults::record_retention_secs(),
            cleanup_interval_secs: defaults::cleanup_interval_secs(),
            max_queue_size: defaults::max_queue_size(),
            default_sender: defaults::default_sender(),
            template_dir: None,
            transport: TransportKind::default(),
            relay: RelayConfig::default(),
            retry: RetryPolicy::default(),
            limits: MessageLimits::default(),
        }
    }
}

impl DispatcherConfig {
    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

struct Inner {
    config: DispatcherConfig,
    builder: MessageBuilder,
    transport: Arc<dyn Transport>,
    queue: DeliveryQueue,
    events: Arc<dyn EventSink>,
}

/// Accepts send requests and drives them to a terminal status.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.inner.config.worker_count)
            .field("records", &self.inner.queue.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// # Errors
    ///
    /// Returns an error if the default sender is not a valid address or the
    /// configuration is unusable.
    pub fn new(
        config: DispatcherConfig,
        transport: Arc<dyn Transport>,
        renderer: Arc<dyn TemplateRenderer>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, SetupError> {
        if config.worker_count == 0 {
            return Err(SetupError::Invalid("worker_count must be at least 1".to_string()));
        }
        if config.retry.max_attempts == 0 {
            return Err(SetupError::Invalid("max_attempts must be at least 1".to_string()));
        }

        let default_sender: Address =
            config
                .default_sender
                .parse()
                .map_err(|source| SetupError::InvalidSender {
                    value: config.default_sender.clone(),
                    source,
                })?;
        let builder = MessageBuilder::new(renderer, default_sender, config.limits);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                builder,
                transport,
                queue: DeliveryQueue::new(),
                events,
            }),
        })
    }

    /// Build the renderer and transport named by `config`, logging events through `tracing`.
    ///
    /// # Errors
    ///
    /// Returns an error if templates fail to load or the configuration is unusable.
    pub fn from_config(config: DispatcherConfig) -> Result<Self, SetupError> {
        let renderer = match &config.template_dir {
            Some(dir) => TeraRenderer::with_directory(dir)?,
            None => TeraRenderer::builtin()?,
        };
        internal!(
            level = INFO,
            "Loaded templates: {}",
            renderer.names().join(", ")
        );

        let transport: Arc<dyn Transport> = match config.transport {
            TransportKind::Smtp => {
                internal!(level = INFO, "Relaying through {}", config.relay.address());
                Arc::new(SmtpTransport::new(config.relay.clone()))
            }
            TransportKind::Noop => {
                internal!(level = WARN, "Testing mode: messages will not be sent");
                Arc::new(NoopTransport)
            }
        };

        Self::new(config, transport, Arc::new(renderer), Arc::new(TracingSink))
    }

    /// Validate `request` and queue it for immediate delivery.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Validation`] when the request can never be sent;
    /// no record is created in that case.
    pub fn submit(&self, request: SendRequest) -> Result<RecordId, DispatchError> {
        let source_service = request.source_service.clone();
        let envelope = self.inner.builder.build(request)?;

        let record = DeliveryRecord::new(
            envelope.sender.clone(),
            envelope.recipients.clone(),
            envelope.subject.clone(),
            source_service.clone(),
        );
        let recipients = record.recipients.len();
        let id = self.inner.queue.insert(record, Arc::new(envelope));

        self.inner.events.emit(&DeliveryEvent::Accepted {
            id,
            recipients,
            source_service,
        });

        Ok(id)
    }

    /// Snapshot of the record for `id`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::NotFound`] if the id was never issued or has been purged.
    pub fn status(&self, id: &RecordId) -> Result<DeliveryRecord, DispatchError> {
        self.inner
            .queue
            .get(id)
            .ok_or(DispatchError::NotFound(*id))
    }

    /// Abandon a queued record before its next attempt.
    ///
    /// # Errors
    ///
    /// [`DispatchError::NotFound`] for unknown ids and
    /// [`DispatchError::NotCancellable`] for in-flight or terminal records.
    pub fn cancel(&self, id: &RecordId) -> Result<DeliveryRecord, DispatchError> {
        let record = self.inner.queue.cancel(id)?;
        self.inner.events.emit(&DeliveryEvent::Cancelled { id: *id });
        Ok(record)
    }

    /// Snapshots of tracked records, optionally filtered by status label.
    #[must_use]
    pub fn list(&self, status: Option<&str>) -> Vec<DeliveryRecord> {
        self.inner.queue.list(status)
    }

    #[must_use]
    pub fn counts(&self) -> StatusCounts {
        self.inner.queue.counts()
    }

    /// Whether the backlog is within `max_queue_size`.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.counts().pending() <= self.inner.config.max_queue_size
    }

    /// Run the worker pool and the retention janitor until shutdown.
    ///
    /// On [`Signal::Shutdown`] workers stop taking new records and finish the
    /// attempt they are running. Queued records are not persisted.
    pub async fn serve(&self, shutdown: broadcast::Receiver<Signal>) {
        let workers = self.inner.config.worker_count;
        internal!(level = INFO, "Dispatcher starting with {workers} workers");

        let mut tasks = JoinSet::new();
        for index in 0..workers {
            let worker = worker::Worker::new(index, self.inner.clone());
            tasks.spawn(worker.run(shutdown.resubscribe()));
        }
        tasks.spawn(cleanup::run(self.inner.clone(), shutdown.resubscribe()));
        drop(shutdown);

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Dispatcher task ended abnormally");
            }
        }

        let counts = self.counts();
        internal!(
            level = INFO,
            "Dispatcher stopped ({} queued records discarded)",
            counts.queued
        );
    }
}

mod defaults {
    pub const fn worker_count() -> usize {
        4
    }

    pub const fn attempt_timeout_secs() -> u64 {
        30
    }

    pub const fn record_retention_secs() -> u64 {
        3_600
    }

    pub const fn cleanup_interval_secs() -> u64 {
        60
    }

    pub const fn max_queue_size() -> usize {
        10_000
    }

    pub fn default_sender() -> String {
        "payment@example.com".to_string()
    }
}
