//! Capability interface onto the imaging pipeline.
//!
//! The tuning server never talks to camera hardware directly. Everything it
//! needs (opening the pipeline, reading and writing parameters, producing
//! preview frames) goes through [`Collaborator`]. All calls are made from the
//! server's single control loop, so implementations need not be thread-safe
//! beyond being `Send`.

use crate::error::TuneResult;

/// Identity and capability records returned for the preview `GetInfo` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewInfo {
    /// Fixed-format version/identity record, sent first.
    pub version: Vec<u8>,
    /// Capabilities record, sent second.
    pub capabilities: Vec<u8>,
}

/// Lazy, finite, non-restartable sequence of tiles covering one frame.
pub type TileStream = Box<dyn Iterator<Item = Vec<u8>> + Send>;

/// The external imaging pipeline, reached through an explicit session handle.
pub trait Collaborator: Send + 'static {
    /// Token proving the imaging session is open.
    type Handle: Send + Sync + 'static;

    fn open_imaging_session(&mut self) -> TuneResult<Self::Handle>;

    fn close_imaging_session(&mut self, handle: Self::Handle);

    fn parameter_list(&mut self, handle: &Self::Handle) -> Vec<u8>;

    fn parameters(&mut self, handle: &Self::Handle, request: &[u8]) -> Vec<u8>;

    fn set_parameters(&mut self, handle: &Self::Handle, request: &[u8]) -> TuneResult<Vec<u8>>;

    /// Run a vendor-specific verb identified by its raw command id.
    fn misc_command(&mut self, handle: &Self::Handle, id: u16, request: &[u8]) -> Vec<u8>;

    fn preview_info(&mut self, handle: &Self::Handle) -> PreviewInfo;

    /// The pipeline's preferred preview tile size.
    fn preview_chunk_size(&mut self, handle: &Self::Handle) -> u32;

    /// Size in bytes of one preview frame at the current sensor mode.
    fn preview_frame_size(&mut self, handle: &Self::Handle) -> TuneResult<usize>;

    /// Capture one preview frame, split into tiles of at most `chunk_size` bytes.
    fn preview_frame(&mut self, handle: &Self::Handle, chunk_size: u32) -> TuneResult<TileStream>;
}

/// Splits an owned frame into consecutive tiles of `chunk_size` bytes; the
/// last tile carries the remainder.
#[derive(Debug)]
pub struct FrameTiles {
    frame: Vec<u8>,
    chunk_size: usize,
    offset: usize,
}

impl FrameTiles {
    /// A `chunk_size` of 0 is treated as 1 so the sequence always terminates.
    pub fn new(frame: Vec<u8>, chunk_size: usize) -> Self {
        Self {
            frame,
            chunk_size: chunk_size.max(1),
            offset: 0,
        }
    }

    /// Total number of tiles this frame splits into.
    pub fn tile_count(&self) -> usize {
        self.frame.len().div_ceil(self.chunk_size)
    }

    pub fn into_stream(self) -> TileStream {
        Box::new(self)
    }
}

impl Iterator for FrameTiles {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if self.offset >= self.frame.len() {
            return None;
        }
        let end = (self.offset + self.chunk_size).min(self.frame.len());
        let tile = self.frame[self.offset..end].to_vec();
        self.offset = end;
        Some(tile)
    }
}
