//! Receive state machine for the preview channel.

use crate::codec::{decode_command_header, decode_length, HeaderBuf};
use crate::error::{TuneError, TuneResult};
use crate::messages::{PreviewCommand, COMMAND_HEADER_LEN, LENGTH_HEADER_LEN, NO_COMMAND};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewRecv {
    AwaitingCommand,
    AwaitingChunkSize,
}

/// A preview command ready for dispatch, with the chunk size in force for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewRequest {
    pub command: PreviewCommand,
    pub chunk_size: u32,
}

/// Per-connection state of a preview-channel client.
///
/// Created only once the frame size is known, since the chunk size is
/// bounded by it.
#[derive(Debug)]
pub struct PreviewSession {
    current_command: u16,
    next_receive: PreviewRecv,
    header: HeaderBuf,
    chunk_size: u32,
    frame_size: usize,
    max_chunk_size: u32,
}

impl PreviewSession {
    pub fn new(frame_size: usize, initial_chunk_size: u32, max_chunk_size: u32) -> Self {
        let mut session = Self {
            current_command: NO_COMMAND,
            next_receive: PreviewRecv::AwaitingCommand,
            header: HeaderBuf::new(COMMAND_HEADER_LEN),
            chunk_size: 1,
            frame_size,
            max_chunk_size,
        };
        session.chunk_size = session.bound_chunk_size(initial_chunk_size.max(1));
        session
    }

    pub fn state(&self) -> PreviewRecv {
        self.next_receive
    }

    pub fn current_command(&self) -> Option<u16> {
        (self.current_command != NO_COMMAND).then_some(self.current_command)
    }

    /// Currently negotiated tile size.
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Number of tiles a frame is currently split into.
    pub fn tiles_per_frame(&self) -> usize {
        self.frame_size.div_ceil(self.chunk_size as usize)
    }

    pub fn expected(&self) -> usize {
        self.header.remaining()
    }

    /// Feed the next slice of the stream (at most [`expected`](Self::expected)
    /// bytes). Unknown command ids and a zero chunk size are protocol
    /// violations.
    pub fn feed(&mut self, data: &[u8]) -> TuneResult<Option<PreviewRequest>> {
        if data.len() > self.expected() {
            return Err(TuneError::Other(format!(
                "fed {} bytes while {} were expected",
                data.len(),
                self.expected()
            )));
        }
        self.header.push(data);
        if !self.header.is_full() {
            return Ok(None);
        }

        match self.next_receive {
            PreviewRecv::AwaitingCommand => {
                let id = decode_command_header(self.header.as_slice())?;
                let command = PreviewCommand::from_wire(id).ok_or_else(|| {
                    TuneError::ProtocolViolation(format!("unknown preview command {id:#06x}"))
                })?;
                trace!(?command, "preview command");
                if command == PreviewCommand::ChangeChunkSize {
                    self.current_command = id;
                    self.next_receive = PreviewRecv::AwaitingChunkSize;
                    self.header = HeaderBuf::new(LENGTH_HEADER_LEN);
                    return Ok(None);
                }
                self.header = HeaderBuf::new(COMMAND_HEADER_LEN);
                Ok(Some(PreviewRequest {
                    command,
                    chunk_size: self.chunk_size,
                }))
            }
            PreviewRecv::AwaitingChunkSize => {
                let requested = decode_length(self.header.as_slice())?;
                if requested == 0 {
                    return Err(TuneError::violation("chunk size of zero"));
                }
                self.chunk_size = self.bound_chunk_size(requested);
                debug!(requested, accepted = self.chunk_size, "preview chunk size changed");
                self.current_command = NO_COMMAND;
                self.next_receive = PreviewRecv::AwaitingCommand;
                self.header = HeaderBuf::new(COMMAND_HEADER_LEN);
                Ok(Some(PreviewRequest {
                    command: PreviewCommand::ChangeChunkSize,
                    chunk_size: self.chunk_size,
                }))
            }
        }
    }

    /// Clamp a requested tile size to `[1, min(max_chunk_size, frame_size)]`.
    fn bound_chunk_size(&self, requested: u32) -> u32 {
        let frame = u32::try_from(self.frame_size).unwrap_or(u32::MAX);
        requested.min(self.max_chunk_size).min(frame).max(1)
    }
}
