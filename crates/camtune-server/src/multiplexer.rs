//! Single control loop over both listeners and at most one client per channel.
//!
//! One `tokio::select!` waits on readiness of: the two listeners, the current
//! command client, the current preview client, an optional idle sweep, and
//! the shutdown signal. Each client read is sized to exactly what its session
//! expects next, so reassembly never depends on transport fragmentation.
//! Writes run inside a handler, so each one is bounded by the write timeout;
//! a peer that stops reading loses its own session and nothing else.
//!
//! Pipeline calls run on this loop. A slow pipeline stalls both channels;
//! that is the accepted trade-off for a low-traffic diagnostic service, and
//! it keeps every pipeline call serialized without locking.

use crate::dispatch::CommandDispatcher;
use crate::events::{DisconnectReason, EventSink, TuningEvent};
use camtune_core::codec::encode_connect_ack;
use camtune_core::messages::LENGTH_HEADER_LEN;
use camtune_core::{
    AckStatus, ChannelKind, Collaborator, CommandSession, PreviewSession, TuneError, TuneResult,
};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Upper bound on a single command-channel read.
const READ_CHUNK: usize = 64 * 1024;

/// How often idle clients are looked for when an idle timeout is set.
const IDLE_SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Per-session limits applied by the multiplexer.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub max_payload: usize,
    pub max_chunk_size: u32,
    pub idle_timeout: Option<Duration>,
    /// Longest a single response may take to reach the socket.
    pub write_timeout: Duration,
}

/// Which channels currently have a client. Descriptive only: both listeners
/// accept in every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplexerState {
    Idle,
    CommandOnly,
    PreviewOnly,
    Both,
}

struct CommandClient {
    stream: TcpStream,
    peer: SocketAddr,
    session: CommandSession,
    last_activity: Instant,
}

struct PreviewClient {
    stream: TcpStream,
    peer: SocketAddr,
    session: PreviewSession,
    last_activity: Instant,
}

/// Owns the listeners, the current clients, and the imaging pipeline.
pub struct ConnectionMultiplexer<C: Collaborator> {
    command_listener: TcpListener,
    preview_listener: TcpListener,
    command: Option<CommandClient>,
    preview: Option<PreviewClient>,
    pipeline: C,
    /// Imaging session shared by both channels, open while any client needs it.
    handle: Option<C::Handle>,
    limits: SessionLimits,
    events: EventSink,
    command_buf: Vec<u8>,
    preview_buf: [u8; LENGTH_HEADER_LEN],
}

impl<C: Collaborator> ConnectionMultiplexer<C> {
    pub fn new(
        command_listener: TcpListener,
        preview_listener: TcpListener,
        pipeline: C,
        limits: SessionLimits,
        events: EventSink,
    ) -> Self {
        Self {
            command_listener,
            preview_listener,
            command: None,
            preview: None,
            pipeline,
            handle: None,
            limits,
            events,
            command_buf: vec![0u8; READ_CHUNK],
            preview_buf: [0u8; LENGTH_HEADER_LEN],
        }
    }

    pub fn state(&self) -> MultiplexerState {
        match (self.command.is_some(), self.preview.is_some()) {
            (false, false) => MultiplexerState::Idle,
            (true, false) => MultiplexerState::CommandOnly,
            (false, true) => MultiplexerState::PreviewOnly,
            (true, true) => MultiplexerState::Both,
        }
    }

    /// Drive the loop until `shutdown` fires (or its sender is dropped), then
    /// drop all clients, close the imaging session, and hand the pipeline back.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> C {
        let mut idle_sweep = tokio::time::interval(IDLE_SWEEP_PERIOD);
        let sweep_idle = self.limits.idle_timeout.is_some();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.command_listener.accept() => match accepted {
                    Ok((stream, peer)) => self.accept_command(stream, peer).await,
                    Err(e) => warn!(channel = %ChannelKind::Command, error = %e, "accept failed"),
                },
                accepted = self.preview_listener.accept() => match accepted {
                    Ok((stream, peer)) => self.accept_preview(stream, peer).await,
                    Err(e) => warn!(channel = %ChannelKind::Preview, error = %e, "accept failed"),
                },
                read = read_command(&mut self.command, &mut self.command_buf), if self.command.is_some() => {
                    self.on_command_read(read).await;
                }
                read = read_preview(&mut self.preview, &mut self.preview_buf), if self.preview.is_some() => {
                    self.on_preview_read(read).await;
                }
                _ = idle_sweep.tick(), if sweep_idle => self.drop_idle_clients(),
            }
        }

        self.shutdown();
        self.pipeline
    }

    async fn accept_command(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        if let Some(old) = self.command.take() {
            self.retire_command(old, DisconnectReason::Replaced);
        }

        let status = match self.ensure_handle() {
            Ok(()) => AckStatus::Success,
            Err(e) => {
                warn!(peer = %peer, error = %e, "imaging session unavailable for command client");
                AckStatus::Failure
            }
        };

        let ack = bounded_write(self.limits.write_timeout, async {
            stream
                .write_all(&encode_connect_ack(status))
                .await
                .map_err(|e| TuneError::Transport(e.to_string()))
        });
        if let Err(e) = ack.await {
            warn!(peer = %peer, error = %e, "failed to send connect ack");
            self.events.emit(TuningEvent::Disconnected {
                channel: ChannelKind::Command,
                peer,
                reason: DisconnectReason::Transport,
            });
            self.release_handle_if_idle();
            return;
        }
        if status == AckStatus::Failure {
            self.events.emit(TuningEvent::Disconnected {
                channel: ChannelKind::Command,
                peer,
                reason: DisconnectReason::PipelineUnavailable,
            });
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
        }
        self.command = Some(CommandClient {
            stream,
            peer,
            session: CommandSession::new(self.limits.max_payload),
            last_activity: Instant::now(),
        });
        self.events.emit(TuningEvent::Connected {
            channel: ChannelKind::Command,
            peer,
        });
    }

    async fn accept_preview(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Some(old) = self.preview.take() {
            self.retire_preview(old, DisconnectReason::Replaced);
        }

        let (frame_size, chunk_size) = match self.preview_geometry() {
            Ok(geometry) => geometry,
            Err(e) => {
                warn!(peer = %peer, error = %e, "preview frame size unavailable");
                self.events.emit(TuningEvent::Disconnected {
                    channel: ChannelKind::Preview,
                    peer,
                    reason: DisconnectReason::PipelineUnavailable,
                });
                self.release_handle_if_idle();
                return;
            }
        };

        let session = PreviewSession::new(frame_size, chunk_size, self.limits.max_chunk_size);
        debug!(
            peer = %peer,
            frame_size,
            chunk_size = session.chunk_size(),
            tiles = session.tiles_per_frame(),
            "preview session sized"
        );
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
        }
        self.preview = Some(PreviewClient {
            stream,
            peer,
            session,
            last_activity: Instant::now(),
        });
        self.events.emit(TuningEvent::Connected {
            channel: ChannelKind::Preview,
            peer,
        });
    }

    async fn on_command_read(&mut self, read: io::Result<usize>) {
        let Some(client) = self.command.as_mut() else {
            return;
        };
        let n = match read {
            Ok(0) => return self.drop_command(DisconnectReason::OrderlyClose),
            Ok(n) => n,
            Err(e) => {
                debug!(peer = %client.peer, error = %e, "command read failed");
                return self.drop_command(DisconnectReason::Transport);
            }
        };
        client.last_activity = Instant::now();

        let request = match client.session.feed(&self.command_buf[..n]) {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => return self.violation(ChannelKind::Command, e),
        };

        let (Some(client), Some(handle)) = (self.command.as_mut(), self.handle.as_ref()) else {
            return self.drop_command(DisconnectReason::PipelineUnavailable);
        };
        let result = bounded_write(
            self.limits.write_timeout,
            CommandDispatcher::dispatch_command(
                &mut self.pipeline,
                handle,
                &request,
                &mut client.stream,
            ),
        )
        .await;

        match result {
            Ok(report) => {
                if let Some(e) = report.handler_error {
                    self.events.emit(TuningEvent::DispatchError {
                        channel: ChannelKind::Command,
                        command: request.command,
                        detail: e.to_string(),
                    });
                }
            }
            Err(e) => {
                debug!(error = %e, "command response not delivered");
                self.drop_command(DisconnectReason::Transport);
            }
        }
    }

    async fn on_preview_read(&mut self, read: io::Result<usize>) {
        let Some(client) = self.preview.as_mut() else {
            return;
        };
        let n = match read {
            Ok(0) => return self.drop_preview(DisconnectReason::OrderlyClose),
            Ok(n) => n,
            Err(e) => {
                debug!(peer = %client.peer, error = %e, "preview read failed");
                return self.drop_preview(DisconnectReason::Transport);
            }
        };
        client.last_activity = Instant::now();

        let request = match client.session.feed(&self.preview_buf[..n]) {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => return self.violation(ChannelKind::Preview, e),
        };

        let (Some(client), Some(handle)) = (self.preview.as_mut(), self.handle.as_ref()) else {
            return self.drop_preview(DisconnectReason::PipelineUnavailable);
        };
        let result = bounded_write(
            self.limits.write_timeout,
            CommandDispatcher::dispatch_preview(
                &mut self.pipeline,
                handle,
                &request,
                &mut client.stream,
            ),
        )
        .await;

        match result {
            Ok(_) => {}
            Err(TuneError::Transport(detail)) => {
                debug!(detail = %detail, "preview response not delivered");
                self.drop_preview(DisconnectReason::Transport);
            }
            // No ack step exists to absorb a handler failure here.
            Err(e) => {
                self.events.emit(TuningEvent::DispatchError {
                    channel: ChannelKind::Preview,
                    command: request.command.to_wire(),
                    detail: e.to_string(),
                });
                self.violation(ChannelKind::Preview, e);
            }
        }
    }

    fn violation(&mut self, channel: ChannelKind, error: TuneError) {
        let peer = match channel {
            ChannelKind::Command => self.command.as_ref().map(|c| c.peer),
            ChannelKind::Preview => self.preview.as_ref().map(|c| c.peer),
        };
        if let Some(peer) = peer {
            self.events.emit(TuningEvent::ProtocolViolation {
                channel,
                peer,
                detail: error.to_string(),
            });
        }
        match channel {
            ChannelKind::Command => self.drop_command(DisconnectReason::ProtocolViolation),
            ChannelKind::Preview => self.drop_preview(DisconnectReason::ProtocolViolation),
        }
    }

    fn drop_idle_clients(&mut self) {
        let Some(timeout) = self.limits.idle_timeout else {
            return;
        };
        if self
            .command
            .as_ref()
            .is_some_and(|c| c.last_activity.elapsed() >= timeout)
        {
            self.drop_command(DisconnectReason::IdleTimeout);
        }
        if self
            .preview
            .as_ref()
            .is_some_and(|c| c.last_activity.elapsed() >= timeout)
        {
            self.drop_preview(DisconnectReason::IdleTimeout);
        }
    }

    fn drop_command(&mut self, reason: DisconnectReason) {
        if let Some(client) = self.command.take() {
            self.retire_command(client, reason);
        }
        self.release_handle_if_idle();
    }

    fn drop_preview(&mut self, reason: DisconnectReason) {
        if let Some(client) = self.preview.take() {
            self.retire_preview(client, reason);
        }
        self.release_handle_if_idle();
    }

    /// Release a command client's in-flight state; the socket closes on drop.
    fn retire_command(&self, mut client: CommandClient, reason: DisconnectReason) {
        let discarded = client.session.close();
        if discarded > 0 {
            debug!(peer = %client.peer, discarded, "dropped partial payload");
        }
        self.events.emit(TuningEvent::Disconnected {
            channel: ChannelKind::Command,
            peer: client.peer,
            reason,
        });
    }

    fn retire_preview(&self, client: PreviewClient, reason: DisconnectReason) {
        self.events.emit(TuningEvent::Disconnected {
            channel: ChannelKind::Preview,
            peer: client.peer,
            reason,
        });
    }

    fn ensure_handle(&mut self) -> TuneResult<()> {
        if self.handle.is_none() {
            self.handle = Some(self.pipeline.open_imaging_session()?);
            info!("imaging session opened");
        }
        Ok(())
    }

    /// Frame size and initial chunk size for a new preview session.
    fn preview_geometry(&mut self) -> TuneResult<(usize, u32)> {
        self.ensure_handle()?;
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| TuneError::Collaborator("imaging session not open".into()))?;
        let frame_size = self.pipeline.preview_frame_size(handle)?;
        if frame_size == 0 {
            return Err(TuneError::Collaborator("pipeline reported an empty frame".into()));
        }
        Ok((frame_size, self.pipeline.preview_chunk_size(handle)))
    }

    fn release_handle_if_idle(&mut self) {
        if self.state() != MultiplexerState::Idle {
            return;
        }
        if let Some(handle) = self.handle.take() {
            self.pipeline.close_imaging_session(handle);
            info!("imaging session closed");
        }
    }

    fn shutdown(&mut self) {
        if let Some(client) = self.command.take() {
            self.retire_command(client, DisconnectReason::Shutdown);
        }
        if let Some(client) = self.preview.take() {
            self.retire_preview(client, DisconnectReason::Shutdown);
        }
        self.release_handle_if_idle();
    }
}

/// Run a response write, failing with a transport error if the peer does not
/// drain it within `limit`.
async fn bounded_write<T>(
    limit: Duration,
    write: impl Future<Output = TuneResult<T>>,
) -> TuneResult<T> {
    tokio::time::timeout(limit, write)
        .await
        .map_err(|_| TuneError::Transport(format!("peer stopped reading for {limit:?}")))?
}

/// Read at most what the command session expects. Pending forever without a client.
async fn read_command(client: &mut Option<CommandClient>, buf: &mut [u8]) -> io::Result<usize> {
    match client {
        Some(c) => {
            let want = c.session.expected().min(buf.len());
            c.stream.read(&mut buf[..want]).await
        }
        None => std::future::pending().await,
    }
}

async fn read_preview(client: &mut Option<PreviewClient>, buf: &mut [u8]) -> io::Result<usize> {
    match client {
        Some(c) => {
            let want = c.session.expected().min(buf.len());
            c.stream.read(&mut buf[..want]).await
        }
        None => std::future::pending().await,
    }
}
