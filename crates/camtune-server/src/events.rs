//! Structured event stream for operators and telemetry.
//!
//! Every session lifecycle change is logged through `tracing` and published on
//! a broadcast channel. Slow subscribers lag and lose events; the control loop
//! never blocks on them.

use camtune_core::ChannelKind;
use serde::Serialize;
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Peer closed its end (zero-byte read).
    OrderlyClose,
    ProtocolViolation,
    /// Read or write failure on the socket.
    Transport,
    /// A newer client was accepted on the same channel.
    Replaced,
    IdleTimeout,
    Shutdown,
    /// The imaging pipeline could not be opened or queried on accept.
    PipelineUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TuningEvent {
    Connected {
        channel: ChannelKind,
        peer: SocketAddr,
    },
    Disconnected {
        channel: ChannelKind,
        peer: SocketAddr,
        reason: DisconnectReason,
    },
    ProtocolViolation {
        channel: ChannelKind,
        peer: SocketAddr,
        detail: String,
    },
    DispatchError {
        channel: ChannelKind,
        command: u16,
        detail: String,
    },
}

/// Publishing side of the event stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<TuningEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TuningEvent> {
        self.tx.subscribe()
    }

    /// Log the event and hand it to any subscribers.
    pub fn emit(&self, event: TuningEvent) {
        match &event {
            TuningEvent::Connected { channel, peer } => {
                info!(channel = %channel, peer = %peer, "client connected");
            }
            TuningEvent::Disconnected {
                channel,
                peer,
                reason,
            } => match reason {
                DisconnectReason::OrderlyClose | DisconnectReason::Shutdown => {
                    info!(channel = %channel, peer = %peer, ?reason, "client disconnected");
                }
                DisconnectReason::Replaced => {
                    debug!(channel = %channel, peer = %peer, "client replaced by new connection");
                }
                _ => {
                    warn!(channel = %channel, peer = %peer, ?reason, "client dropped");
                }
            },
            TuningEvent::ProtocolViolation {
                channel,
                peer,
                detail,
            } => {
                warn!(channel = %channel, peer = %peer, detail = %detail, "protocol violation");
            }
            TuningEvent::DispatchError {
                channel,
                command,
                detail,
            } => {
                warn!(channel = %channel, command, detail = %detail, "command handler failed");
            }
        }
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let sink = EventSink::new(8);
        let mut rx = sink.subscribe();
        sink.emit(TuningEvent::Connected {
            channel: ChannelKind::Command,
            peer: peer(),
        });
        sink.emit(TuningEvent::Disconnected {
            channel: ChannelKind::Command,
            peer: peer(),
            reason: DisconnectReason::OrderlyClose,
        });

        assert!(matches!(rx.recv().await.unwrap(), TuningEvent::Connected { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            TuningEvent::Disconnected {
                reason: DisconnectReason::OrderlyClose,
                ..
            }
        ));
    }

    #[test]
    fn emit_without_subscribers_does_not_fail() {
        let sink = EventSink::new(1);
        sink.emit(TuningEvent::DispatchError {
            channel: ChannelKind::Command,
            command: 1016,
            detail: "boom".into(),
        });
    }

    #[test]
    fn events_serialize_as_tagged_json() {
        let event = TuningEvent::Disconnected {
            channel: ChannelKind::Preview,
            peer: peer(),
            reason: DisconnectReason::IdleTimeout,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "disconnected");
        assert_eq!(json["channel"], "preview");
        assert_eq!(json["reason"], "idle_timeout");
        assert_eq!(json["peer"], "127.0.0.1:40000");
    }
}
