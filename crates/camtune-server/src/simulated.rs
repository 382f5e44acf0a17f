//! A software stand-in for the camera pipeline.
//!
//! Serves a small parameter table and synthetic NV21 preview frames so the
//! server can run, and be exercised end to end, without camera hardware.
//!
//! Binary layouts (little-endian):
//! - parameter list: `u16 count`, then `u16 id, u8 name_len, name` per entry
//! - get request: `u16 count, u16 id...`; response: `u16 count, (u16 id, i32 value)...`
//! - set request: `u16 count, (u16 id, i32 value)...`; response: `u16 applied`
//! - misc response: `u16 id` followed by the request bytes

use crate::config::PipelineSection;
use camtune_core::{Collaborator, FrameTiles, PreviewInfo, TileStream, TuneError, TuneResult};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Preferred preview tile size.
const DEFAULT_CHUNK_SIZE: u32 = 8192;
/// Pixel format tag carried in the capabilities record.
const FORMAT_NV21: u8 = 1;
const IDENTITY: &[u8] = b"camtune-sim";
const IDENTITY_LEN: usize = 16;
const VERSION: (u16, u16) = (1, 0);

const DEFAULT_PARAMETERS: &[(u16, &str, i32)] = &[
    (1, "exposure_us", 10_000),
    (2, "analog_gain", 100),
    (3, "awb_mode", 0),
    (4, "sharpness", 50),
    (5, "saturation", 50),
    (6, "contrast", 50),
    (7, "denoise_level", 2),
];

#[derive(Debug, Clone)]
struct Parameter {
    name: &'static str,
    value: i32,
}

/// Proof that [`SimulatedPipeline::open_imaging_session`] succeeded.
#[derive(Debug)]
pub struct SimulatedHandle {
    id: u64,
}

#[derive(Debug)]
pub struct SimulatedPipeline {
    geometry: PipelineSection,
    params: BTreeMap<u16, Parameter>,
    frame_counter: u8,
    next_handle: u64,
    open_sessions: usize,
    fail_open: bool,
    fail_frames: bool,
}

impl SimulatedPipeline {
    pub fn new(geometry: PipelineSection) -> Self {
        let params = DEFAULT_PARAMETERS
            .iter()
            .map(|&(id, name, value)| (id, Parameter { name, value }))
            .collect();
        Self {
            geometry,
            params,
            frame_counter: 0,
            next_handle: 1,
            open_sessions: 0,
            fail_open: false,
            fail_frames: false,
        }
    }

    /// Make every open attempt fail, as a missing sensor would.
    pub fn with_open_failure(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Make every frame capture fail, as a stalled sensor would.
    pub fn with_frame_failure(mut self) -> Self {
        self.fail_frames = true;
        self
    }

    /// Number of imaging sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions
    }

    pub fn parameter(&self, id: u16) -> Option<i32> {
        self.params.get(&id).map(|p| p.value)
    }

    pub fn frame_size(&self) -> usize {
        usize::from(self.geometry.width) * usize::from(self.geometry.height) * 3 / 2
    }

    /// Frame size as carried on the wire.
    fn wire_frame_size(&self) -> TuneResult<u32> {
        u32::try_from(self.geometry.frame_size()).map_err(|_| {
            TuneError::Collaborator(format!(
                "{}x{} frames do not fit a u32 size",
                self.geometry.width, self.geometry.height
            ))
        })
    }

    fn render_frame(&mut self) -> Vec<u8> {
        let width = usize::from(self.geometry.width);
        let height = usize::from(self.geometry.height);
        let luma = width * height;
        let shift = usize::from(self.frame_counter);
        self.frame_counter = self.frame_counter.wrapping_add(1);

        let mut frame = vec![128u8; self.frame_size()];
        for (i, px) in frame[..luma].iter_mut().enumerate() {
            let (x, y) = (i % width, i / width);
            *px = ((x + y + shift) & 0xFF) as u8;
        }
        frame
    }
}

impl Collaborator for SimulatedPipeline {
    type Handle = SimulatedHandle;

    fn open_imaging_session(&mut self) -> TuneResult<SimulatedHandle> {
        if self.fail_open {
            return Err(TuneError::Collaborator("sensor not present".into()));
        }
        let handle = SimulatedHandle { id: self.next_handle };
        self.next_handle += 1;
        self.open_sessions += 1;
        info!(handle = handle.id, "simulated imaging session opened");
        Ok(handle)
    }

    fn close_imaging_session(&mut self, handle: SimulatedHandle) {
        self.open_sessions = self.open_sessions.saturating_sub(1);
        info!(handle = handle.id, "simulated imaging session closed");
    }

    fn parameter_list(&mut self, _handle: &SimulatedHandle) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.params.len() as u16).to_le_bytes());
        for (id, param) in &self.params {
            out.extend_from_slice(&id.to_le_bytes());
            out.push(param.name.len() as u8);
            out.extend_from_slice(param.name.as_bytes());
        }
        out
    }

    fn parameters(&mut self, _handle: &SimulatedHandle, request: &[u8]) -> Vec<u8> {
        let ids = Reader::new(request).ids();
        let known: Vec<(u16, i32)> = ids
            .into_iter()
            .filter_map(|id| self.params.get(&id).map(|p| (id, p.value)))
            .collect();

        let mut out = Vec::with_capacity(2 + known.len() * 6);
        out.extend_from_slice(&(known.len() as u16).to_le_bytes());
        for (id, value) in known {
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    fn set_parameters(&mut self, _handle: &SimulatedHandle, request: &[u8]) -> TuneResult<Vec<u8>> {
        let updates = Reader::new(request).assignments()?;
        // Validate everything before applying anything.
        if let Some((id, _)) = updates.iter().find(|(id, _)| !self.params.contains_key(id)) {
            return Err(TuneError::Collaborator(format!("unknown parameter {id}")));
        }
        for &(id, value) in &updates {
            if let Some(param) = self.params.get_mut(&id) {
                debug!(id, name = param.name, value, "parameter set");
                param.value = value;
            }
        }
        Ok((updates.len() as u16).to_le_bytes().to_vec())
    }

    fn misc_command(&mut self, _handle: &SimulatedHandle, id: u16, request: &[u8]) -> Vec<u8> {
        let mut out = id.to_le_bytes().to_vec();
        out.extend_from_slice(request);
        out
    }

    fn preview_info(&mut self, _handle: &SimulatedHandle) -> PreviewInfo {
        let mut version = Vec::with_capacity(4 + IDENTITY_LEN);
        version.extend_from_slice(&VERSION.0.to_le_bytes());
        version.extend_from_slice(&VERSION.1.to_le_bytes());
        let mut identity = [0u8; IDENTITY_LEN];
        identity[..IDENTITY.len()].copy_from_slice(IDENTITY);
        version.extend_from_slice(&identity);

        let mut capabilities = Vec::with_capacity(9);
        capabilities.extend_from_slice(&self.geometry.width.to_le_bytes());
        capabilities.extend_from_slice(&self.geometry.height.to_le_bytes());
        let frame_size = self.wire_frame_size().unwrap_or(u32::MAX);
        capabilities.extend_from_slice(&frame_size.to_le_bytes());
        capabilities.push(FORMAT_NV21);

        PreviewInfo {
            version,
            capabilities,
        }
    }

    fn preview_chunk_size(&mut self, _handle: &SimulatedHandle) -> u32 {
        DEFAULT_CHUNK_SIZE
    }

    fn preview_frame_size(&mut self, _handle: &SimulatedHandle) -> TuneResult<usize> {
        self.wire_frame_size()?;
        Ok(self.frame_size())
    }

    fn preview_frame(&mut self, _handle: &SimulatedHandle, chunk_size: u32) -> TuneResult<TileStream> {
        if self.fail_frames {
            return Err(TuneError::Collaborator("frame capture failed".into()));
        }
        self.wire_frame_size()?;
        let frame = self.render_frame();
        Ok(FrameTiles::new(frame, chunk_size as usize).into_stream())
    }
}

/// Little-endian cursor over a request payload.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn u16(&mut self) -> Option<u16> {
        let (head, rest) = self.data.split_first_chunk::<2>()?;
        self.data = rest;
        Some(u16::from_le_bytes(*head))
    }

    fn i32(&mut self) -> Option<i32> {
        let (head, rest) = self.data.split_first_chunk::<4>()?;
        self.data = rest;
        Some(i32::from_le_bytes(*head))
    }

    /// `u16 count, u16 id...`; a short request yields the ids that are complete.
    fn ids(mut self) -> Vec<u16> {
        let count = self.u16().unwrap_or(0);
        (0..count).map_while(|_| self.u16()).collect()
    }

    fn assignments(mut self) -> TuneResult<Vec<(u16, i32)>> {
        let malformed = || TuneError::Collaborator("malformed set request".into());
        let count = self.u16().ok_or_else(malformed)?;
        (0..count)
            .map(|_| {
                let id = self.u16().ok_or_else(malformed)?;
                let value = self.i32().ok_or_else(malformed)?;
                Ok((id, value))
            })
            .collect()
    }
}
