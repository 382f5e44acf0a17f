//! camtune-server: camera tuning protocol server.
//!
//! Serves two independent TCP channels: the command channel for reading and
//! writing pipeline parameters, and the preview channel for pulling preview
//! frames in tiles. Both run on one control loop; see [`multiplexer`].

pub mod config;
pub mod dispatch;
pub mod events;
pub mod multiplexer;
pub mod server;
pub mod simulated;

pub use config::{ConfigOverrides, ServerConfig};
pub use dispatch::CommandDispatcher;
pub use events::{DisconnectReason, EventSink, TuningEvent};
pub use multiplexer::{ConnectionMultiplexer, MultiplexerState, SessionLimits};
pub use server::{ServerHandle, TuningServer};
pub use simulated::SimulatedPipeline;
