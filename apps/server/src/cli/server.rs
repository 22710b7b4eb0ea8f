use std::time::Duration;

use echomesh_core::StreamServer;
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServerConfig;
use crate::handlers;

const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Owns the running relay and the thin async shell around it: the reactor
/// engine itself is synchronous OS threads (see `echomesh-core`), so this
/// struct's only job is signal handling and bounding how long shutdown
/// waits for those threads to drain.
pub struct Relay {
    config: ServerConfig,
    server: StreamServer,
    cancellation: CancellationToken,
}

impl Relay {
    pub fn start(config: ServerConfig) -> eyre::Result<Self> {
        let server_config = config.listen.to_server_config()?;
        let server = StreamServer::start(server_config)?;
        handlers::register_all(&server.dispatcher, &server.users, &server.rooms);

        Ok(Self {
            config,
            server,
            cancellation: CancellationToken::new(),
        })
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn request_shutdown(&self) {
        self.cancellation.cancel();
    }

    pub async fn shutdown(self) {
        info!("shutting down relay, stopping reactors...");

        let timeout = self
            .config
            .shutdown_timeout
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS);
        let server = self.server;

        select! {
            result = tokio::task::spawn_blocking(move || server.shutdown()) => {
                if let Err(err) = result {
                    tracing::error!(%err, "reactor shutdown task panicked");
                }
            }
            _ = sleep(Duration::from_secs(timeout)) => {
                info!("shutdown timeout reached, exiting without waiting for reactor threads");
            }
        }
    }
}
