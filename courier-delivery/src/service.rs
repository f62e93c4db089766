//! Dispatch operations as seen by ingress layers.
//!
//! The HTTP API depends on this trait rather than on [`Dispatcher`] so that
//! handlers can be exercised against a stub.

use crate::{
    Dispatcher,
    error::DispatchError,
    message::SendRequest,
    queue::StatusCounts,
    types::{DeliveryRecord, RecordId},
};

pub trait DispatchService: Send + Sync {
    /// Validate and queue a request.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the request can never be sent.
    fn submit(&self, request: SendRequest) -> Result<RecordId, DispatchError>;

    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] for unknown ids.
    fn status(&self, id: &RecordId) -> Result<DeliveryRecord, DispatchError>;

    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] or [`DispatchError::NotCancellable`].
    fn cancel(&self, id: &RecordId) -> Result<DeliveryRecord, DispatchError>;

    fn list(&self, status: Option<&str>) -> Vec<DeliveryRecord>;

    fn counts(&self) -> StatusCounts;

    /// Whether the backlog allows accepting more work.
    fn is_ready(&self) -> bool;
}

impl DispatchService for Dispatcher {
    fn submit(&self, request: SendRequest) -> Result<RecordId, DispatchError> {
        Self::submit(self, request)
    }

    fn status(&self, id: &RecordId) -> Result<DeliveryRecord, DispatchError> {
        Self::status(self, id)
    }

    fn cancel(&self, id: &RecordId) -> Result<DeliveryRecord, DispatchError> {
        Self::cancel(self, id)
    }

    fn list(&self, status: Option<&str>) -> Vec<DeliveryRecord> {
        Self::list(self, status)
    }

    fn counts(&self) -> StatusCounts {
        Self::counts(self)
    }

    fn is_ready(&self) -> bool {
        Self::is_ready(self)
    }
}
