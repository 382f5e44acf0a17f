//! Per-connection receive state machines, one per channel kind.
//!
//! Both machines are byte-exact: callers ask how many bytes are expected,
//! read at most that many, and feed them back. Completed units come out as
//! requests for the dispatcher.

pub mod command;
pub mod preview;

pub use command::{CommandRecv, CommandRequest, CommandSession};
pub use preview::{PreviewRecv, PreviewRequest, PreviewSession};
