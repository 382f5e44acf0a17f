//! `camtune misc <id> [hex]`: pass-through vendor commands.

use anyhow::{bail, Context, Result};
use camtune_core::messages::MISC_COMMAND_RANGE;
use std::net::SocketAddr;

use crate::client::CommandConnection;

pub async fn run(addr: SocketAddr, id: u16, payload_hex: Option<&str>, response_len: u32) -> Result<()> {
    let payload = parse_payload(payload_hex)?;
    let mut conn = CommandConnection::connect(addr).await?;
    let body = send(&mut conn, id, &payload, response_len).await?;
    println!("{}", hex::encode(body));
    Ok(())
}

pub async fn send(
    conn: &mut CommandConnection,
    id: u16,
    payload: &[u8],
    response_len: u32,
) -> Result<Vec<u8>> {
    if !MISC_COMMAND_RANGE.contains(&id) {
        bail!(
            "misc command ids are {}..={}, got {id}",
            MISC_COMMAND_RANGE.start(),
            MISC_COMMAND_RANGE.end()
        );
    }
    conn.request(id, payload, response_len)
        .await?
        .with_context(|| format!("server rejected misc command {id}"))
}

fn parse_payload(payload_hex: Option<&str>) -> Result<Vec<u8>> {
    match payload_hex {
        Some(text) => hex::decode(text.trim_start_matches("0x"))
            .with_context(|| format!("payload is not valid hex: '{text}'")),
        None => Ok(Vec::new()),
    }
}
