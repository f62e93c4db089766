//! Runs the dispatcher and the API server until told to stop.

use std::sync::Arc;

use courier_api::ApiServer;
use courier_common::{Signal, internal};
use courier_delivery::Dispatcher;
use tokio::{
    sync::broadcast,
    task::{JoinError, JoinSet},
};

use crate::Config;

pub struct Courier {
    config: Config,
}

impl Courier {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until SIGINT or SIGTERM.
    ///
    /// # Errors
    ///
    /// See [`Self::run_until`].
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `stop` resolves or a component exits on its own.
    ///
    /// Workers finish the attempt they are running before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher cannot be built from the
    /// configuration, the API listener cannot bind, or a component fails.
    pub async fn run_until(
        self,
        stop: impl Future<Output = anyhow::Result<()>>,
    ) -> anyhow::Result<()> {
        let dispatcher = Dispatcher::from_config(self.config.dispatcher)?;
        let server = ApiServer::new(self.config.api, Arc::new(dispatcher.clone())).await?;
        let (shutdown, _) = broadcast::channel(16);

        let mut tasks = JoinSet::new();
        {
            let receiver = shutdown.subscribe();
            tasks.spawn(async move {
                dispatcher.serve(receiver).await;
                Ok::<_, anyhow::Error>(())
            });
        }
        {
            let receiver = shutdown.subscribe();
            tasks.spawn(async move { server.serve(receiver).await.map_err(anyhow::Error::from) });
        }

        internal!(level = INFO, "Courier running");

        let mut result = tokio::select! {
            r = stop => r,
            Some(joined) = tasks.join_next() => {
                internal!(level = WARN, "A component stopped unexpectedly");
                flatten(joined)
            }
        };

        internal!(level = INFO, "Shutting down...");
        let _ = shutdown.send(Signal::Shutdown);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = flatten(joined) {
                result = result.and(Err(e));
            }
        }

        internal!(level = INFO, "Shutdown complete");
        result
    }
}

fn flatten(joined: Result<anyhow::Result<()>, JoinError>) -> anyhow::Result<()> {
    joined?
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down");
        }
    }

    Ok(())
}
