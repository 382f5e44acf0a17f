#![allow(dead_code)]
//! Test harness utilities for camtune-server integration tests.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use camtune_core::codec::{
    decode_ack, decode_connect_ack, encode_command_request, encode_preview_request,
};
use camtune_core::messages::CONNECT_ACK_LEN;
use camtune_core::{AckStatus, PreviewCommand};
use camtune_server::config::PipelineSection;
use camtune_server::{ServerConfig, ServerHandle, SimulatedPipeline, TuningEvent, TuningServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// 100x40 NV21 frames are 6000 bytes.
pub const GEOMETRY: PipelineSection = PipelineSection {
    width: 100,
    height: 40,
};

pub fn test_config() -> ServerConfig {
    ServerConfig {
        bind: [127, 0, 0, 1].into(),
        command_port: 0,
        preview_port: 0,
        pipeline: GEOMETRY,
        ..ServerConfig::default()
    }
}

pub fn test_pipeline() -> SimulatedPipeline {
    SimulatedPipeline::new(GEOMETRY)
}

pub async fn start_server(
    config: ServerConfig,
    pipeline: SimulatedPipeline,
) -> ServerHandle<SimulatedPipeline> {
    TuningServer::new(config, pipeline)
        .start()
        .await
        .expect("server should start")
}

/// Await `fut`, failing the test if it takes longer than [`TIMEOUT`].
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, fut)
        .await
        .expect("timed out")
}

/// Wait for the first event matching `pred`.
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<TuningEvent>,
    pred: impl Fn(&TuningEvent) -> bool,
) -> TuningEvent {
    within(async {
        loop {
            let event = rx.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
}

/// Assert the server has closed (or reset) this connection.
pub async fn expect_closed(stream: &mut TcpStream) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match within(stream.read(&mut buf)).await {
            Ok(0) | Err(_) => return,
            // Drain anything queued before the close.
            Ok(_) => continue,
        }
    }
}

/// A raw command-channel client.
pub struct CommandClient {
    pub stream: TcpStream,
}

impl CommandClient {
    /// Connect and read the connect ack.
    pub async fn connect(addr: SocketAddr) -> (Self, AckStatus) {
        let mut stream = within(TcpStream::connect(addr)).await.expect("connect");
        let mut ack = [0u8; CONNECT_ACK_LEN];
        within(stream.read_exact(&mut ack)).await.expect("connect ack");
        let status = decode_connect_ack(&ack).expect("valid connect ack");
        (Self { stream }, status)
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write");
    }

    /// Send one command and read its ack, plus `response_len` bytes on success.
    pub async fn request(
        &mut self,
        command: u16,
        payload: &[u8],
        response_len: u32,
    ) -> (AckStatus, Vec<u8>) {
        let frame = encode_command_request(command, payload, response_len).unwrap();
        self.send_raw(&frame).await;
        self.read_response(response_len).await
    }

    pub async fn read_response(&mut self, response_len: u32) -> (AckStatus, Vec<u8>) {
        let mut ack = [0u8; 1];
        within(self.stream.read_exact(&mut ack)).await.expect("ack");
        let ack = decode_ack(ack[0]).expect("valid ack");
        if ack == AckStatus::Failure {
            return (ack, Vec::new());
        }
        let mut body = vec![0u8; response_len as usize];
        within(self.stream.read_exact(&mut body)).await.expect("body");
        (ack, body)
    }
}

/// A raw preview-channel client.
pub struct PreviewClient {
    pub stream: TcpStream,
}

impl PreviewClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = within(TcpStream::connect(addr)).await.expect("connect");
        Self { stream }
    }

    pub async fn send(&mut self, command: PreviewCommand, chunk_size: Option<u32>) {
        let frame = encode_preview_request(command, chunk_size);
        self.stream.write_all(&frame).await.expect("write");
    }

    pub async fn read_exact(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        within(self.stream.read_exact(&mut buf)).await.expect("read");
        buf
    }

    pub async fn chunk_size(&mut self) -> u32 {
        self.send(PreviewCommand::GetChunkSize, None).await;
        let bytes = self.read_exact(4).await;
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// Encode a SetParameters request for the simulated pipeline.
pub fn set_request(pairs: &[(u16, i32)]) -> Vec<u8> {
    let mut out = (pairs.len() as u16).to_le_bytes().to_vec();
    for (id, value) in pairs {
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Encode a GetParameters request for the simulated pipeline.
pub fn get_request(ids: &[u16]) -> Vec<u8> {
    let mut out = (ids.len() as u16).to_le_bytes().to_vec();
    for id in ids {
        out.extend_from_slice(&id.to_le_bytes());
    }
    out
}
