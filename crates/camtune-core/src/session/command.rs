//! Receive state machine for the command (parameter tuning) channel.

use crate::codec::{decode_command_header, decode_length, HeaderBuf};
use crate::error::{TuneError, TuneResult};
use crate::messages::{COMMAND_HEADER_LEN, LENGTH_HEADER_LEN, NO_COMMAND};
use tracing::trace;

/// What the command session expects to receive next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRecv {
    AwaitingCommand,
    AwaitingPayloadSize,
    AwaitingPayload,
    AwaitingResponseLength,
}

/// One fully assembled command cycle, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Raw command id as received (may be unknown).
    pub command: u16,
    pub payload: Vec<u8>,
    /// Number of response bytes the client is prepared to receive.
    pub response_len: u32,
}

/// Per-connection state of a command-channel client.
///
/// `max_payload` bounds both the declared payload length and the declared
/// response length. Bytes are fed in pieces no larger than [`expected`](Self::expected); a
/// [`CommandRequest`] pops out once the response-length header completes.
#[derive(Debug)]
pub struct CommandSession {
    current_command: u16,
    next_receive: CommandRecv,
    next_receive_len: usize,
    header: HeaderBuf,
    pending_payload: Option<Vec<u8>>,
    max_payload: usize,
}

impl CommandSession {
    pub fn new(max_payload: usize) -> Self {
        Self {
            current_command: NO_COMMAND,
            next_receive: CommandRecv::AwaitingCommand,
            next_receive_len: COMMAND_HEADER_LEN,
            header: HeaderBuf::new(COMMAND_HEADER_LEN),
            pending_payload: None,
            max_payload,
        }
    }

    pub fn state(&self) -> CommandRecv {
        self.next_receive
    }

    /// The command being assembled, if any.
    pub fn current_command(&self) -> Option<u16> {
        (self.current_command != NO_COMMAND).then_some(self.current_command)
    }

    /// Bytes still needed to complete the current receive step.
    pub fn expected(&self) -> usize {
        self.next_receive_len
    }

    /// Payload bytes held for a command that has not been dispatched yet.
    pub fn buffered_bytes(&self) -> usize {
        self.pending_payload.as_ref().map_or(0, Vec::capacity)
    }

    /// Feed the next slice of the stream. `data` must not exceed
    /// [`expected`](Self::expected).
    ///
    /// Any error leaves the session reset with no payload retained; the caller
    /// is expected to tear the connection down.
    pub fn feed(&mut self, data: &[u8]) -> TuneResult<Option<CommandRequest>> {
        if data.len() > self.next_receive_len {
            let err = TuneError::Other(format!(
                "fed {} bytes while {} were expected",
                data.len(),
                self.next_receive_len
            ));
            self.close();
            return Err(err);
        }
        if data.is_empty() {
            return Ok(None);
        }
        match self.step(data) {
            Ok(done) => Ok(done),
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    fn step(&mut self, data: &[u8]) -> TuneResult<Option<CommandRequest>> {
        match self.next_receive {
            CommandRecv::AwaitingCommand => {
                self.header.push(data);
                self.next_receive_len = self.header.remaining();
                if self.header.is_full() {
                    self.current_command = decode_command_header(self.header.as_slice())?;
                    trace!(command = self.current_command, "command header");
                    self.expect_header(CommandRecv::AwaitingPayloadSize);
                }
                Ok(None)
            }
            CommandRecv::AwaitingPayloadSize => {
                self.header.push(data);
                self.next_receive_len = self.header.remaining();
                if self.header.is_full() {
                    let len = decode_length(self.header.as_slice())? as usize;
                    if len > self.max_payload {
                        return Err(TuneError::ProtocolViolation(format!(
                            "payload of {len} bytes exceeds limit of {}",
                            self.max_payload
                        )));
                    }
                    if len == 0 {
                        self.expect_header(CommandRecv::AwaitingResponseLength);
                    } else {
                        self.pending_payload = Some(Vec::with_capacity(len));
                        self.next_receive = CommandRecv::AwaitingPayload;
                        self.next_receive_len = len;
                    }
                }
                Ok(None)
            }
            CommandRecv::AwaitingPayload => {
                let payload = self.pending_payload.as_mut().ok_or_else(|| {
                    TuneError::violation("payload bytes arrived with no payload in flight")
                })?;
                payload.extend_from_slice(data);
                self.next_receive_len -= data.len();
                if self.next_receive_len == 0 {
                    self.expect_header(CommandRecv::AwaitingResponseLength);
                }
                Ok(None)
            }
            CommandRecv::AwaitingResponseLength => {
                self.header.push(data);
                self.next_receive_len = self.header.remaining();
                if !self.header.is_full() {
                    return Ok(None);
                }
                let response_len = decode_length(self.header.as_slice())?;
                if response_len as usize > self.max_payload {
                    return Err(TuneError::ProtocolViolation(format!(
                        "response length of {response_len} bytes exceeds limit of {}",
                        self.max_payload
                    )));
                }
                let request = CommandRequest {
                    command: self.current_command,
                    payload: self.pending_payload.take().unwrap_or_default(),
                    response_len,
                };
                self.current_command = NO_COMMAND;
                self.expect_header(CommandRecv::AwaitingCommand);
                Ok(Some(request))
            }
        }
    }

    fn expect_header(&mut self, next: CommandRecv) {
        let len = match next {
            CommandRecv::AwaitingCommand => COMMAND_HEADER_LEN,
            _ => LENGTH_HEADER_LEN,
        };
        self.next_receive = next;
        self.next_receive_len = len;
        self.header = HeaderBuf::new(len);
    }

    /// Drop any in-flight payload and return to the initial state. Returns the
    /// number of payload bytes that were discarded.
    pub fn close(&mut self) -> usize {
        let discarded = self.pending_payload.take().map_or(0, |p| p.len());
        self.current_command = NO_COMMAND;
        self.expect_header(CommandRecv::AwaitingCommand);
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_command_request;

    /// Feed `stream` in pieces of at most `step` bytes, never more than the
    /// session expects.
    fn drive(session: &mut CommandSession, stream: &[u8], step: usize) -> Vec<CommandRequest> {
        let mut out = Vec::new();
        let mut rest = stream;
        while !rest.is_empty() {
            let n = rest.len().min(step).min(session.expected());
            if let Some(req) = session.feed(&rest[..n]).unwrap() {
                out.push(req);
            }
            rest = &rest[n..];
        }
        out
    }

    fn sample_stream() -> Vec<u8> {
        let mut stream = Vec::new();
        stream.extend(encode_command_request(1014, &[], 128).unwrap());
        stream.extend(encode_command_request(1015, &[1, 0, 7, 0], 16).unwrap());
        stream.extend(encode_command_request(4242, &[0xAA; 300], 0).unwrap());
        stream.extend(encode_command_request(1016, &[5; 9], 2).unwrap());
        stream
    }

    #[test]
    fn framing_is_boundary_insensitive() {
        let stream = sample_stream();

        let one_shot = drive(&mut CommandSession::new(1024), &stream, usize::MAX);
        let byte_wise = drive(&mut CommandSession::new(1024), &stream, 1);
        let odd = drive(&mut CommandSession::new(1024), &stream, 3);

        assert_eq!(one_shot.len(), 4);
        assert_eq!(one_shot, byte_wise);
        assert_eq!(one_shot, odd);
        assert_eq!(one_shot[0].command, 1014);
        assert!(one_shot[0].payload.is_empty());
        assert_eq!(one_shot[0].response_len, 128);
        assert_eq!(one_shot[2].payload, vec![0xAA; 300]);
    }

    #[test]
    fn transitions_follow_the_wire_order() {
        let mut s = CommandSession::new(64);
        assert_eq!(s.state(), CommandRecv::AwaitingCommand);
        assert_eq!(s.expected(), 2);
        assert_eq!(s.current_command(), None);

        s.feed(&1015u16.to_le_bytes()).unwrap();
        assert_eq!(s.state(), CommandRecv::AwaitingPayloadSize);
        assert_eq!(s.expected(), 4);
        assert_eq!(s.current_command(), Some(1015));

        s.feed(&3u32.to_le_bytes()).unwrap();
        assert_eq!(s.state(), CommandRecv::AwaitingPayload);
        assert_eq!(s.expected(), 3);

        s.feed(&[1, 2]).unwrap();
        assert_eq!(s.expected(), 1);
        s.feed(&[3]).unwrap();
        assert_eq!(s.state(), CommandRecv::AwaitingResponseLength);

        let req = s.feed(&8u32.to_le_bytes()).unwrap().unwrap();
        assert_eq!(req.payload, vec![1, 2, 3]);
        assert_eq!(req.response_len, 8);
        assert_eq!(s.state(), CommandRecv::AwaitingCommand);
        assert_eq!(s.current_command(), None);
        assert_eq!(s.buffered_bytes(), 0);
    }

    #[test]
    fn zero_length_payload_skips_to_response_length() {
        let mut s = CommandSession::new(64);
        s.feed(&1014u16.to_le_bytes()).unwrap();
        s.feed(&0u32.to_le_bytes()).unwrap();
        assert_eq!(s.state(), CommandRecv::AwaitingResponseLength);
        assert_eq!(s.buffered_bytes(), 0);
    }

    #[test]
    fn oversized_payload_is_a_violation() {
        for len in [65u32, 1000, u32::MAX] {
            let mut s = CommandSession::new(64);
            s.feed(&1016u16.to_le_bytes()).unwrap();
            let err = s.feed(&len.to_le_bytes()).unwrap_err();
            assert!(err.is_protocol_violation(), "{err}");
            assert_eq!(s.buffered_bytes(), 0);
            assert_eq!(s.state(), CommandRecv::AwaitingCommand);
        }
    }

    #[test]
    fn oversized_response_length_is_a_violation() {
        let mut s = CommandSession::new(64);
        let stream = encode_command_request(1014, &[], 65).unwrap();
        let (head, tail) = stream.split_at(stream.len() - 4);
        assert!(drive(&mut s, head, usize::MAX).is_empty());
        assert!(s.feed(tail).unwrap_err().is_protocol_violation());
        assert_eq!(s.state(), CommandRecv::AwaitingCommand);
    }

    #[test]
    fn payload_at_limit_is_accepted() {
        let mut s = CommandSession::new(64);
        let stream = encode_command_request(1016, &[1; 64], 4).unwrap();
        let reqs = drive(&mut s, &stream, usize::MAX);
        assert_eq!(reqs[0].payload.len(), 64);
    }

    #[test]
    fn close_mid_payload_releases_buffer() {
        let mut s = CommandSession::new(4096);
        s.feed(&1016u16.to_le_bytes()).unwrap();
        s.feed(&2048u32.to_le_bytes()).unwrap();
        s.feed(&[9; 100]).unwrap();
        assert_eq!(s.state(), CommandRecv::AwaitingPayload);
        assert!(s.buffered_bytes() >= 2048);

        assert_eq!(s.close(), 100);
        assert_eq!(s.buffered_bytes(), 0);
        assert_eq!(s.current_command(), None);
        assert_eq!(s.state(), CommandRecv::AwaitingCommand);
    }

    #[test]
    fn overfeeding_is_rejected() {
        let mut s = CommandSession::new(64);
        assert!(s.feed(&[1, 2, 3]).is_err());
        assert_eq!(s.state(), CommandRecv::AwaitingCommand);
    }

    #[test]
    fn empty_feed_is_a_no_op() {
        let mut s = CommandSession::new(64);
        assert!(s.feed(&[]).unwrap().is_none());
        assert_eq!(s.expected(), 2);
    }
}
