//! CLI subcommand implementations.

pub mod misc;
pub mod params;
pub mod preview;
