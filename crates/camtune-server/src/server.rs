//! Composition root: binds both channels and runs the multiplexer.

use crate::config::ServerConfig;
use crate::events::{EventSink, TuningEvent};
use crate::multiplexer::{ConnectionMultiplexer, SessionLimits};
use camtune_core::{Collaborator, TuneError, TuneResult};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

/// Buffered events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 256;

/// The tuning server, ready to start.
pub struct TuningServer<C: Collaborator> {
    config: ServerConfig,
    pipeline: C,
}

impl<C: Collaborator> TuningServer<C> {
    pub fn new(config: ServerConfig, pipeline: C) -> Self {
        Self { config, pipeline }
    }

    /// Bind both listening sockets and spawn the control loop.
    pub async fn start(self) -> TuneResult<ServerHandle<C>> {
        let command_listener = bind(self.config.bind, self.config.command_port).await?;
        let preview_listener = bind(self.config.bind, self.config.preview_port).await?;
        let command_addr = command_listener.local_addr()?;
        let preview_addr = preview_listener.local_addr()?;

        let events = EventSink::new(EVENT_CAPACITY);
        let limits = SessionLimits {
            max_payload: self.config.max_payload,
            max_chunk_size: self.config.max_chunk_size,
            idle_timeout: self.config.client_idle_timeout,
            write_timeout: self.config.write_timeout,
        };
        let multiplexer = ConnectionMultiplexer::new(
            command_listener,
            preview_listener,
            self.pipeline,
            limits,
            events.clone(),
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(multiplexer.run(shutdown_rx));

        info!(
            command = %command_addr,
            preview = %preview_addr,
            max_payload = limits.max_payload,
            idle_timeout = ?limits.idle_timeout,
            "camtune-server ready"
        );

        Ok(ServerHandle {
            command_addr,
            preview_addr,
            events,
            shutdown_tx,
            task,
        })
    }
}

async fn bind(ip: std::net::IpAddr, port: u16) -> TuneResult<TcpListener> {
    let addr = SocketAddr::new(ip, port);
    TcpListener::bind(addr)
        .await
        .map_err(|e| TuneError::Transport(format!("bind {addr} failed: {e}")))
}

/// A running server.
pub struct ServerHandle<C: Collaborator> {
    command_addr: SocketAddr,
    preview_addr: SocketAddr,
    events: EventSink,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<C>,
}

impl<C: Collaborator> ServerHandle<C> {
    pub fn command_addr(&self) -> SocketAddr {
        self.command_addr
    }

    pub fn preview_addr(&self) -> SocketAddr {
        self.preview_addr
    }

    /// Subscribe to connect/disconnect/violation/dispatch-error events.
    pub fn subscribe(&self) -> broadcast::Receiver<TuningEvent> {
        self.events.subscribe()
    }

    /// Stop the control loop, closing every client and the imaging session.
    /// Returns the pipeline once the loop has exited.
    pub async fn stop(self) -> TuneResult<C> {
        // The loop may already be gone; joining reports that.
        let _ = self.shutdown_tx.send(());
        let pipeline = self
            .task
            .await
            .map_err(|e| TuneError::Other(format!("control loop failed: {e}")))?;
        info!("camtune-server stopped");
        Ok(pipeline)
    }
}
