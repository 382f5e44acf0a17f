//! Raw protocol connections to a camtune-server.
//!
//! One type per channel. Both speak the shared codec from camtune-core and
//! read responses with exact lengths, since neither channel carries a
//! response length on the wire.

use anyhow::{bail, Context, Result};
use camtune_core::codec::{
    decode_ack, decode_connect_ack, encode_command_request, encode_preview_request,
};
use camtune_core::messages::CONNECT_ACK_LEN;
use camtune_core::{AckStatus, PreviewCommand};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Version record served by camtune-server: u16 major, u16 minor, 16-byte identity.
pub const VERSION_RECORD_LEN: usize = 20;
/// Capabilities record: u16 width, u16 height, u32 frame size, u8 format.
pub const CAPS_RECORD_LEN: usize = 9;

async fn connect(addr: SocketAddr) -> Result<TcpStream> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .with_context(|| format!("timed out connecting to {addr}"))?
        .with_context(|| format!("failed to connect to {addr}"))?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// A connected command-channel client.
pub struct CommandConnection {
    stream: TcpStream,
}

impl CommandConnection {
    /// Connect and wait for the server's connect ack.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let mut stream = connect(addr).await?;
        let mut ack = [0u8; CONNECT_ACK_LEN];
        stream
            .read_exact(&mut ack)
            .await
            .context("server closed before acknowledging the connection")?;
        match decode_connect_ack(&ack)? {
            AckStatus::Success => {
                debug!(%addr, "command channel ready");
                Ok(Self { stream })
            }
            AckStatus::Failure => bail!("server could not open the imaging pipeline"),
        }
    }

    /// Send one request. Returns `None` if the server did not recognise the
    /// command, otherwise exactly `response_len` bytes.
    pub async fn request(
        &mut self,
        command: u16,
        payload: &[u8],
        response_len: u32,
    ) -> Result<Option<Vec<u8>>> {
        let frame = encode_command_request(command, payload, response_len)?;
        self.stream
            .write_all(&frame)
            .await
            .context("failed to send command")?;

        let mut ack = [0u8; 1];
        self.stream
            .read_exact(&mut ack)
            .await
            .context("connection closed before ack")?;
        if decode_ack(ack[0])? == AckStatus::Failure {
            return Ok(None);
        }

        let mut body = vec![0u8; response_len as usize];
        self.stream
            .read_exact(&mut body)
            .await
            .context("connection closed mid-response")?;
        debug!(command, response_len, "command answered");
        Ok(Some(body))
    }
}

/// Geometry reported by the preview capabilities record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub width: u16,
    pub height: u16,
    pub frame_size: u32,
    pub format: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub major: u16,
    pub minor: u16,
    pub identity: String,
    pub caps: Capabilities,
}

/// A connected preview-channel client.
pub struct PreviewConnection {
    stream: TcpStream,
}

impl PreviewConnection {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            stream: connect(addr).await?,
        })
    }

    async fn send(&mut self, command: PreviewCommand, chunk_size: Option<u32>) -> Result<()> {
        self.stream
            .write_all(&encode_preview_request(command, chunk_size))
            .await
            .with_context(|| format!("failed to send {command:?}"))
    }

    async fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.stream
            .read_exact(&mut buf)
            .await
            .context("preview channel closed")?;
        Ok(buf)
    }

    pub async fn info(&mut self) -> Result<ServerInfo> {
        self.send(PreviewCommand::GetInfo, None).await?;
        let version = self.read(VERSION_RECORD_LEN).await?;
        let caps = self.read(CAPS_RECORD_LEN).await?;

        let identity = version[4..]
            .split(|&b| b == 0)
            .next()
            .unwrap_or_default();
        Ok(ServerInfo {
            major: u16::from_le_bytes([version[0], version[1]]),
            minor: u16::from_le_bytes([version[2], version[3]]),
            identity: String::from_utf8_lossy(identity).into_owned(),
            caps: Capabilities {
                width: u16::from_le_bytes([caps[0], caps[1]]),
                height: u16::from_le_bytes([caps[2], caps[3]]),
                frame_size: u32::from_le_bytes([caps[4], caps[5], caps[6], caps[7]]),
                format: caps[8],
            },
        })
    }

    pub async fn chunk_size(&mut self) -> Result<u32> {
        self.send(PreviewCommand::GetChunkSize, None).await?;
        let bytes = self.read(4).await?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Request a new tile size; returns the size the server accepted.
    pub async fn change_chunk_size(&mut self, requested: u32) -> Result<u32> {
        if requested == 0 {
            bail!("chunk size must be at least 1");
        }
        self.send(PreviewCommand::ChangeChunkSize, Some(requested))
            .await?;
        let reply = self.read(5).await?;
        if reply[0] != AckStatus::Success as u8 {
            bail!("server rejected chunk size {requested} (status {})", reply[0]);
        }
        Ok(u32::from_le_bytes([reply[1], reply[2], reply[3], reply[4]]))
    }

    /// Pull one frame of `frame_size` bytes.
    pub async fn frame(&mut self, frame_size: usize) -> Result<Vec<u8>> {
        self.send(PreviewCommand::GetFrame, None).await?;
        self.read(frame_size).await
    }
}
