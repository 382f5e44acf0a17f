//! Command identifiers and wire constants for both tuning channels.
//!
//! All multi-byte integers on the wire are little-endian.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// Well-known port of the command (parameter tuning) channel.
pub const COMMAND_PORT: u16 = 55555;
/// Well-known port of the preview channel.
pub const PREVIEW_PORT: u16 = 55556;

/// Sentinel stored in a session while no command is in progress.
pub const NO_COMMAND: u16 = 0xFFFF;

/// Code word leading the connection-accept acknowledgement.
pub const CONNECT_ACK_CODE: u16 = 1;

/// Size of a command id header.
pub const COMMAND_HEADER_LEN: usize = 2;
/// Size of every length header (payload size, response length, chunk size).
pub const LENGTH_HEADER_LEN: usize = 4;
/// Size of the connection-accept acknowledgement.
pub const CONNECT_ACK_LEN: usize = COMMAND_HEADER_LEN + LENGTH_HEADER_LEN;

/// Default cap on a single command-channel payload (1 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 1 << 20;

/// Body of the single response element sent for legacy preview commands.
pub const NOT_SUPPORTED: u8 = 0x00;

/// Command ids forwarded verbatim to the pipeline as vendor verbs.
pub const MISC_COMMAND_RANGE: RangeInclusive<u16> = 1021..=1029;

/// Which of the two independent sessions a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Command,
    Preview,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Command => f.write_str("command"),
            ChannelKind::Preview => f.write_str("preview"),
        }
    }
}

/// One-byte status used by the per-command ack and the connect ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AckStatus {
    Success = 1,
    Failure = 2,
}

impl AckStatus {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(AckStatus::Success),
            2 => Some(AckStatus::Failure),
            _ => None,
        }
    }
}

/// Command-channel verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandId {
    GetParameterList,
    GetParameters,
    SetParameters,
    /// Vendor-specific verb, carried with its raw id.
    Misc(u16),
}

impl CommandId {
    /// Map a raw wire id to a known command. `None` means unknown, which the
    /// command channel tolerates.
    pub fn from_wire(id: u16) -> Option<Self> {
        match id {
            1014 => Some(CommandId::GetParameterList),
            1015 => Some(CommandId::GetParameters),
            1016 => Some(CommandId::SetParameters),
            id if MISC_COMMAND_RANGE.contains(&id) => Some(CommandId::Misc(id)),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u16 {
        match self {
            CommandId::GetParameterList => 1014,
            CommandId::GetParameters => 1015,
            CommandId::SetParameters => 1016,
            CommandId::Misc(id) => id,
        }
    }
}

/// Preview-channel verbs. Any id outside this set is a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewCommand {
    GetInfo,
    ChangeChunkSize,
    GetFrame,
    JpegSnapshot,
    RawSnapshot,
    RawPreview,
    GetChunkSize,
}

impl PreviewCommand {
    pub fn from_wire(id: u16) -> Option<Self> {
        match id {
            0x0001 => Some(PreviewCommand::GetInfo),
            0x0002 => Some(PreviewCommand::ChangeChunkSize),
            0x0003 => Some(PreviewCommand::GetFrame),
            0x0004 => Some(PreviewCommand::JpegSnapshot),
            0x0005 => Some(PreviewCommand::RawSnapshot),
            0x0006 => Some(PreviewCommand::RawPreview),
            0x0007 => Some(PreviewCommand::GetChunkSize),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u16 {
        match self {
            PreviewCommand::GetInfo => 0x0001,
            PreviewCommand::ChangeChunkSize => 0x0002,
            PreviewCommand::GetFrame => 0x0003,
            PreviewCommand::JpegSnapshot => 0x0004,
            PreviewCommand::RawSnapshot => 0x0005,
            PreviewCommand::RawPreview => 0x0006,
            PreviewCommand::GetChunkSize => 0x0007,
        }
    }

    /// Snapshot variants kept only so old clients get a clean "not supported".
    pub fn is_legacy(self) -> bool {
        matches!(
            self,
            PreviewCommand::JpegSnapshot | PreviewCommand::RawSnapshot | PreviewCommand::RawPreview
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_ids_map_both_ways() {
        for id in [1014u16, 1015, 1016, 1021, 1029] {
            let cmd = CommandId::from_wire(id).unwrap();
            assert_eq!(cmd.to_wire(), id);
        }
        assert_eq!(CommandId::from_wire(1021), Some(CommandId::Misc(1021)));
    }

    #[test]
    fn unknown_command_ids() {
        assert_eq!(CommandId::from_wire(0), None);
        assert_eq!(CommandId::from_wire(1017), None);
        assert_eq!(CommandId::from_wire(1030), None);
        assert_eq!(CommandId::from_wire(NO_COMMAND), None);
    }

    #[test]
    fn preview_ids() {
        for id in 1u16..=7 {
            assert_eq!(PreviewCommand::from_wire(id).unwrap().to_wire(), id);
        }
        assert_eq!(PreviewCommand::from_wire(0), None);
        assert_eq!(PreviewCommand::from_wire(8), None);
        assert!(PreviewCommand::RawSnapshot.is_legacy());
        assert!(!PreviewCommand::GetFrame.is_legacy());
    }

    #[test]
    fn ack_status_bytes() {
        assert_eq!(AckStatus::from_byte(1), Some(AckStatus::Success));
        assert_eq!(AckStatus::from_byte(2), Some(AckStatus::Failure));
        assert_eq!(AckStatus::from_byte(0), None);
        assert_eq!(AckStatus::Failure as u8, 2);
    }
}
