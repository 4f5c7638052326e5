//! WebSocket broker server using Axum.
//!
//! Lifecycle: [`BrokerServer::new`] → [`BrokerServer::bind`] → either
//! [`BoundServer::serve`] with a shutdown future, or [`BoundServer::start`]
//! followed by [`RunningServer::shutdown`].

pub mod router;
pub mod socket;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::broker::Broker;
use crate::config::Settings;
use crate::error::{Error, Result};

pub use router::create_app_router;

/// An unbound broker server.
pub struct BrokerServer {
    broker: Arc<Broker>,
    settings: Settings,
}

impl BrokerServer {
    pub fn new(settings: Settings) -> Self {
        let broker = Arc::new(Broker::new(settings.broker.clone()));
        Self { broker, settings }
    }

    /// Use an existing broker, e.g. one with a custom clock.
    pub fn with_broker(settings: Settings, broker: Arc<Broker>) -> Self {
        Self { broker, settings }
    }

    pub fn broker(&self) -> Arc<Broker> {
        self.broker.clone()
    }

    /// Bind the listening socket.
    pub async fn bind(self) -> Result<BoundServer> {
        let host = self.settings.server.host.as_str();
        let port = self.settings.server.port;

        let listener = TcpListener::bind((host, port)).await.map_err(|e| {
            Error::Server(format!("Failed to bind {}:{}: {}", host, port, e))
        })?;
        let local_addr = listener.local_addr()?;

        Ok(BoundServer {
            listener,
            local_addr,
            broker: self.broker,
            sweep_interval: self.settings.broker.sweep_interval(),
        })
    }
}

/// A server with its listener bound, not yet accepting.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    broker: Arc<Broker>,
    sweep_interval: Duration,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn broker(&self) -> Arc<Broker> {
        self.broker.clone()
    }

    /// Serve until `signal` resolves, then close every socket.
    pub async fn serve<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = create_app_router(self.broker.clone());
        let sweeper = tokio::spawn(run_expiry_sweeper(self.broker.clone(), self.sweep_interval));

        tracing::info!("Broker running on ws://{}", self.local_addr);

        let broker = self.broker.clone();
        let result = axum::serve(self.listener, router)
            .with_graceful_shutdown(async move {
                signal.await;
                broker.shutdown().await;
            })
            .await;

        sweeper.abort();
        result?;

        tracing::info!("Server closed");
        Ok(())
    }

    /// Serve on a background task.
    pub fn start(self) -> RunningServer {
        let (trigger, stop) = oneshot::channel::<()>();
        let local_addr = self.local_addr;
        let broker = self.broker.clone();
        let task = tokio::spawn(self.serve(async move {
            let _ = stop.await;
        }));

        RunningServer {
            local_addr,
            broker,
            trigger: Some(trigger),
            task,
        }
    }
}

/// A server serving on a background task.
pub struct RunningServer {
    local_addr: SocketAddr,
    broker: Arc<Broker>,
    trigger: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn broker(&self) -> Arc<Broker> {
        self.broker.clone()
    }

    /// Stop accepting, close all sockets and wait for the server task.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(trigger) = self.trigger.take() {
            let _ = trigger.send(());
        }
        self.task
            .await
            .map_err(|e| Error::Server(format!("Server task failed: {}", e)))?
    }
}

/// Periodically drop expired messages until the broker shuts down.
async fn run_expiry_sweeper(broker: Arc<Broker>, every: Duration) {
    let mut shutdown = broker.subscribe_shutdown();
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    while !broker.is_shut_down() {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = broker.sweep_expired().await;
                if removed > 0 {
                    tracing::info!("Swept {} expired messages", removed);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Run the broker with the given settings until Ctrl+C.
pub async fn run_server(settings: Settings) -> Result<()> {
    let server = BrokerServer::new(settings).bind().await?;

    server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down...");
        })
        .await
}
