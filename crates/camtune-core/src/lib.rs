//! camtune-core: shared protocol library for the camera tuning server.
//!
//! Provides the wire codec for the command and preview channels, the
//! per-connection receive state machines, command identifiers, and the
//! capability trait through which the server reaches the imaging pipeline.

pub mod codec;
pub mod error;
pub mod messages;
pub mod pipeline;
pub mod session;

// Re-export commonly used items at crate root.
pub use error::{TuneError, TuneResult};
pub use messages::{AckStatus, ChannelKind, CommandId, PreviewCommand, COMMAND_PORT, PREVIEW_PORT};
pub use pipeline::{Collaborator, FrameTiles, PreviewInfo, TileStream};
pub use session::{CommandRequest, CommandSession, PreviewRequest, PreviewSession};
