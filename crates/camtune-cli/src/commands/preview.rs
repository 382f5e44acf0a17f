//! `camtune info`, `camtune chunk-size`, `camtune frame`.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::client::PreviewConnection;

pub async fn run_info(addr: SocketAddr) -> Result<()> {
    let mut conn = PreviewConnection::connect(addr).await?;
    let server = conn.info().await?;
    let chunk = conn.chunk_size().await?;

    println!("server:      {} {}.{}", server.identity, server.major, server.minor);
    println!("resolution:  {}x{}", server.caps.width, server.caps.height);
    println!("frame size:  {} bytes", server.caps.frame_size);
    println!("format:      {}", format_name(server.caps.format));
    println!("chunk size:  {chunk} bytes");
    Ok(())
}

pub async fn run_chunk_size(addr: SocketAddr, new: Option<u32>) -> Result<()> {
    let mut conn = PreviewConnection::connect(addr).await?;
    let size = match new {
        Some(requested) => {
            let accepted = conn.change_chunk_size(requested).await?;
            if accepted != requested {
                eprintln!("camtune: server clamped {requested} to {accepted}");
            }
            accepted
        }
        None => conn.chunk_size().await?,
    };
    println!("{size}");
    Ok(())
}

pub async fn run_frame(addr: SocketAddr, out: &Path, chunk_size: Option<u32>) -> Result<()> {
    let written = capture(addr, out, chunk_size).await?;
    println!("wrote {written} bytes to {}", out.display());
    Ok(())
}

/// Pull one frame and write it raw to `out`. Returns the byte count.
pub async fn capture(addr: SocketAddr, out: &Path, chunk_size: Option<u32>) -> Result<usize> {
    let mut conn = PreviewConnection::connect(addr).await?;
    let caps = conn.info().await?.caps;
    if let Some(requested) = chunk_size {
        conn.change_chunk_size(requested).await?;
    }
    let frame = conn.frame(caps.frame_size as usize).await?;
    info!(
        width = caps.width,
        height = caps.height,
        bytes = frame.len(),
        "frame captured"
    );
    tokio::fs::write(out, &frame)
        .await
        .with_context(|| format!("failed to write {}", out.display()))?;
    Ok(frame.len())
}

fn format_name(tag: u8) -> String {
    match tag {
        1 => "NV21".into(),
        other => format!("unknown ({other})"),
    }
}
