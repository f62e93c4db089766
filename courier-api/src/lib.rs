//! HTTP ingress for the courier dispatch service.
//!
//! # Endpoints
//!
//! - **`GET /`** - Service banner
//! - **`POST /emails`** - Validate and queue a send request, returns `202` with the record id
//! - **`GET /emails`** - List tracked records, optionally filtered by `?status=`
//! - **`GET /emails/{id}`** - Snapshot of one record
//! - **`DELETE /emails/{id}`** - Cancel a record that has not started its next attempt
//! - **`GET /health/live`**, **`GET /health/ready`** - Probes; readiness fails while the
//!   backlog exceeds the configured maximum
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use courier_api::{ApiConfig, ApiServer};
//! use courier_delivery::{Dispatcher, DispatcherConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = Dispatcher::from_config(DispatcherConfig::default())?;
//! let server = ApiServer::new(ApiConfig::default(), Arc::new(dispatcher.clone())).await?;
//!
//! // server.serve(shutdown_receiver).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod handlers;
mod server;

pub use config::ApiConfig;
pub use error::{ApiError, ServerError};
pub use server::{ApiServer, router};
