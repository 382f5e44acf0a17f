//! Pure encode/decode of the two tuning wire framings.
//!
//! Command channel:
//! `[u16 cmd][u32 payload_len][payload][u32 response_len]` from the client,
//! `[u8 ack][response_len bytes]` back from the server. On accept the server
//! first sends `[u16 CONNECT_ACK_CODE][u32 status]`.
//!
//! Preview channel:
//! `[u16 cmd]` (plus `[u32 chunk_size]` after `ChangeChunkSize`) from the
//! client, raw response buffers back-to-back from the server.

use crate::error::{TuneError, TuneResult};
use crate::messages::{
    AckStatus, PreviewCommand, COMMAND_HEADER_LEN, CONNECT_ACK_CODE, CONNECT_ACK_LEN,
    LENGTH_HEADER_LEN,
};

/// Encode the acknowledgement sent once when a command client is accepted.
pub fn encode_connect_ack(status: AckStatus) -> [u8; CONNECT_ACK_LEN] {
    let mut out = [0u8; CONNECT_ACK_LEN];
    out[..COMMAND_HEADER_LEN].copy_from_slice(&CONNECT_ACK_CODE.to_le_bytes());
    out[COMMAND_HEADER_LEN..].copy_from_slice(&(status as u32).to_le_bytes());
    out
}

/// Decode a connection-accept acknowledgement.
pub fn decode_connect_ack(data: &[u8]) -> TuneResult<AckStatus> {
    if data.len() != CONNECT_ACK_LEN {
        return Err(TuneError::violation(format!(
            "connect ack must be {CONNECT_ACK_LEN} bytes, got {}",
            data.len()
        )));
    }
    let code = decode_command_header(&data[..COMMAND_HEADER_LEN])?;
    if code != CONNECT_ACK_CODE {
        return Err(TuneError::violation(format!("bad connect ack code {code}")));
    }
    let status = decode_length(&data[COMMAND_HEADER_LEN..])?;
    u8::try_from(status)
        .ok()
        .and_then(AckStatus::from_byte)
        .ok_or_else(|| TuneError::violation(format!("bad connect ack status {status}")))
}

/// Encode the per-command ack byte.
pub fn encode_ack(status: AckStatus) -> [u8; 1] {
    [status as u8]
}

pub fn decode_ack(byte: u8) -> TuneResult<AckStatus> {
    AckStatus::from_byte(byte).ok_or_else(|| TuneError::violation(format!("bad ack byte {byte}")))
}

pub fn encode_command_header(id: u16) -> [u8; COMMAND_HEADER_LEN] {
    id.to_le_bytes()
}

pub fn decode_command_header(data: &[u8]) -> TuneResult<u16> {
    let bytes: [u8; COMMAND_HEADER_LEN] = data.try_into().map_err(|_| {
        TuneError::violation(format!("command header must be 2 bytes, got {}", data.len()))
    })?;
    Ok(u16::from_le_bytes(bytes))
}

pub fn encode_length(len: u32) -> [u8; LENGTH_HEADER_LEN] {
    len.to_le_bytes()
}

pub fn decode_length(data: &[u8]) -> TuneResult<u32> {
    let bytes: [u8; LENGTH_HEADER_LEN] = data.try_into().map_err(|_| {
        TuneError::violation(format!("length header must be 4 bytes, got {}", data.len()))
    })?;
    Ok(u32::from_le_bytes(bytes))
}

/// Encode a length-prefixed payload: `[u32 len][bytes]`.
pub fn encode_payload(payload: &[u8]) -> TuneResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| TuneError::Other(format!("payload too large: {} bytes", payload.len())))?;
    let mut out = Vec::with_capacity(LENGTH_HEADER_LEN + payload.len());
    out.extend_from_slice(&encode_length(len));
    out.extend_from_slice(payload);
    Ok(out)
}

/// Split a complete length-prefixed payload frame, returning the body.
pub fn decode_payload(frame: &[u8]) -> TuneResult<&[u8]> {
    if frame.len() < LENGTH_HEADER_LEN {
        return Err(TuneError::violation("payload frame shorter than its header"));
    }
    let len = decode_length(&frame[..LENGTH_HEADER_LEN])? as usize;
    let body = &frame[LENGTH_HEADER_LEN..];
    if body.len() != len {
        return Err(TuneError::violation(format!(
            "payload declares {len} bytes, frame carries {}",
            body.len()
        )));
    }
    Ok(body)
}

/// Encode a full client-side command request.
pub fn encode_command_request(id: u16, payload: &[u8], response_len: u32) -> TuneResult<Vec<u8>> {
    let mut out = Vec::with_capacity(COMMAND_HEADER_LEN + 2 * LENGTH_HEADER_LEN + payload.len());
    out.extend_from_slice(&encode_command_header(id));
    out.extend(encode_payload(payload)?);
    out.extend_from_slice(&encode_length(response_len));
    Ok(out)
}

/// Encode a client-side preview request. `chunk_size` is only written for
/// `ChangeChunkSize`.
pub fn encode_preview_request(cmd: PreviewCommand, chunk_size: Option<u32>) -> Vec<u8> {
    let mut out = encode_command_header(cmd.to_wire()).to_vec();
    if cmd == PreviewCommand::ChangeChunkSize {
        out.extend_from_slice(&encode_length(chunk_size.unwrap_or(0)));
    }
    out
}

/// Size a command-channel response body to exactly `len` bytes: longer
/// output is truncated, shorter output is zero-padded.
pub fn fit_response(mut body: Vec<u8>, len: usize) -> Vec<u8> {
    body.resize(len, 0);
    body
}

/// Fixed-size accumulator for 2- and 4-byte headers that may arrive split
/// across several reads.
#[derive(Debug, Clone)]
pub struct HeaderBuf {
    bytes: [u8; LENGTH_HEADER_LEN],
    len: usize,
    filled: usize,
}

impl HeaderBuf {
    /// Start accumulating a header of `len` bytes (at most 4).
    pub fn new(len: usize) -> Self {
        debug_assert!(len <= LENGTH_HEADER_LEN);
        Self {
            bytes: [0u8; LENGTH_HEADER_LEN],
            len: len.min(LENGTH_HEADER_LEN),
            filled: 0,
        }
    }

    /// Bytes still missing.
    pub fn remaining(&self) -> usize {
        self.len - self.filled
    }

    /// Copy as much of `data` as fits, returning the number of bytes taken.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let take = data.len().min(self.remaining());
        self.bytes[self.filled..self.filled + take].copy_from_slice(&data[..take]);
        self.filled += take;
        take
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.len
    }

    /// The header bytes collected so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.filled]
    }
}
