//! API HTTP server

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    routing::{get, post},
};
use courier_common::Signal;
use courier_delivery::{
    ApplicationApprovedRequest, ApplicationCreatedRequest, ApplicationDeletedRequest,
    ApplicationRejectedRequest, DispatchService, PaymentCreatedRequest, PaymentFailedRequest,
    PaymentSuccessRequest,
};
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::{ApiConfig, ServerError, handlers};

/// Build the application router over `service`.
pub fn router(service: Arc<dyn DispatchService>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/emails", post(handlers::submit).get(handlers::list))
        .route(
            "/emails/{id}",
            get(handlers::status).delete(handlers::cancel),
        )
        .route(
            "/notifications/application-created",
            post(handlers::notify::<ApplicationCreatedRequest>),
        )
        .route(
            "/notifications/application-approved",
            post(handlers::notify::<ApplicationApprovedRequest>),
        )
        .route(
            "/notifications/application-rejected",
            post(handlers::notify::<ApplicationRejectedRequest>),
        )
        .route(
            "/notifications/application-deleted",
            post(handlers::notify::<ApplicationDeletedRequest>),
        )
        .route(
            "/notifications/payment-created",
            post(handlers::notify::<PaymentCreatedRequest>),
        )
        .route(
            "/notifications/payment-success",
            post(handlers::notify::<PaymentSuccessRequest>),
        )
        .route(
            "/notifications/payment-failed",
            post(handlers::notify::<PaymentFailedRequest>),
        )
        .route("/health/live", get(handlers::liveness))
        .route("/health/ready", get(handlers::readiness))
        .with_state(service)
        .layer(TimeoutLayer::new(request_timeout))
}

pub struct ApiServer {
    listener: TcpListener,
    router: Router,
}

impl ApiServer {
    /// Bind the listener and build the router.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the configured address fails.
    pub async fn new(
        config: ApiConfig,
        service: Arc<dyn DispatchService>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| ServerError::BindError {
                address: config.listen_address.clone(),
                source: e,
            })?;

        tracing::info!(address = %config.listen_address, "API server bound successfully");

        let router = router(service, Duration::from_secs(config.request_timeout_secs));
        Ok(Self { listener, router })
    }

    /// Serve requests until a shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), ServerError> {
        tracing::info!("API server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("API server received shutdown signal");
            })
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}
