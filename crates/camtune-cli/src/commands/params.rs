//! `camtune list`, `camtune get`, `camtune set`: the parameter table.
//!
//! Request and response bodies follow the layout of the simulated pipeline:
//! counts and ids are u16, values are i32, all little-endian.

use anyhow::{bail, Context, Result};
use camtune_core::CommandId;
use std::net::SocketAddr;

use crate::client::CommandConnection;

/// Response length asked for when listing; the reply is zero-padded past the table.
pub const LIST_RESPONSE_LEN: u32 = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterEntry {
    pub id: u16,
    pub name: String,
}

pub async fn run_list(addr: SocketAddr) -> Result<()> {
    let mut conn = CommandConnection::connect(addr).await?;
    let entries = list(&mut conn).await?;

    println!("{:<6} {}", "ID", "NAME");
    for entry in &entries {
        println!("{:<6} {}", entry.id, entry.name);
    }
    println!("\n{} parameter(s).", entries.len());
    Ok(())
}

pub async fn run_get(addr: SocketAddr, ids: &[u16]) -> Result<()> {
    let mut conn = CommandConnection::connect(addr).await?;
    let values = get(&mut conn, ids).await?;
    if values.len() < ids.len() {
        eprintln!(
            "camtune: {} of {} id(s) unknown to the server",
            ids.len() - values.len(),
            ids.len()
        );
    }
    for (id, value) in values {
        println!("{id}={value}");
    }
    Ok(())
}

pub async fn run_set(addr: SocketAddr, assignments: &[String]) -> Result<()> {
    let pairs = assignments
        .iter()
        .map(|a| parse_assignment(a))
        .collect::<Result<Vec<_>>>()?;
    let mut conn = CommandConnection::connect(addr).await?;
    let applied = set(&mut conn, &pairs).await?;
    println!("{applied} parameter(s) applied.");
    Ok(())
}

pub async fn list(conn: &mut CommandConnection) -> Result<Vec<ParameterEntry>> {
    let body = send(conn, CommandId::GetParameterList, &[], LIST_RESPONSE_LEN).await?;
    let mut cursor = Cursor::new(&body);
    let count = cursor.u16()?;
    (0..count)
        .map(|_| {
            let id = cursor.u16()?;
            let len = usize::from(cursor.u8()?);
            let name = String::from_utf8_lossy(cursor.take(len)?).into_owned();
            Ok(ParameterEntry { id, name })
        })
        .collect()
}

/// Values for the ids the server knows, in the order it returned them.
pub async fn get(conn: &mut CommandConnection, ids: &[u16]) -> Result<Vec<(u16, i32)>> {
    let mut request = (ids.len() as u16).to_le_bytes().to_vec();
    for id in ids {
        request.extend_from_slice(&id.to_le_bytes());
    }
    let response_len = 2 + 6 * ids.len() as u32;
    let body = send(conn, CommandId::GetParameters, &request, response_len).await?;

    let mut cursor = Cursor::new(&body);
    let count = cursor.u16()?;
    (0..count)
        .map(|_| Ok((cursor.u16()?, cursor.i32()?)))
        .collect()
}

/// Returns the number of parameters the server applied. A rejected request
/// comes back as an all-zero body, so it reads as zero applied.
pub async fn set(conn: &mut CommandConnection, pairs: &[(u16, i32)]) -> Result<u16> {
    let mut request = (pairs.len() as u16).to_le_bytes().to_vec();
    for (id, value) in pairs {
        request.extend_from_slice(&id.to_le_bytes());
        request.extend_from_slice(&value.to_le_bytes());
    }
    let body = send(conn, CommandId::SetParameters, &request, 2).await?;
    let applied = Cursor::new(&body).u16()?;
    if applied == 0 && !pairs.is_empty() {
        bail!("server applied none of the {} assignment(s)", pairs.len());
    }
    Ok(applied)
}

async fn send(
    conn: &mut CommandConnection,
    command: CommandId,
    payload: &[u8],
    response_len: u32,
) -> Result<Vec<u8>> {
    conn.request(command.to_wire(), payload, response_len)
        .await?
        .with_context(|| format!("server does not support {command:?}"))
}

/// Parse `id=value`.
pub fn parse_assignment(text: &str) -> Result<(u16, i32)> {
    let (id, value) = text
        .split_once('=')
        .with_context(|| format!("expected id=value, got '{text}'"))?;
    let id = id
        .trim()
        .parse()
        .with_context(|| format!("invalid parameter id in '{text}'"))?;
    let value = value
        .trim()
        .parse()
        .with_context(|| format!("invalid value in '{text}'"))?;
    Ok((id, value))
}

struct Cursor<'a> {
    data: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.data.len() < len {
            bail!("response truncated");
        }
        let (head, rest) = self.data.split_at(len);
        self.data = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;

    #[test]
    fn assignments_parse() {
        assert_eq!(parse_assignment("4=10").unwrap(), (4, 10));
        assert_eq!(parse_assignment(" 1 = -5 ").unwrap(), (1, -5));
        assert!(parse_assignment("4").is_err());
        assert!(parse_assignment("x=1").is_err());
        assert!(parse_assignment("70000=1").is_err());
    }

    #[tokio::test]
    async fn list_reads_the_whole_table() {
        let server = testing::server().await;
        let mut conn = CommandConnection::connect(server.command_addr())
            .await
            .unwrap();

        let entries = list(&mut conn).await.unwrap();
        assert_eq!(entries.len(), 7);
        assert_eq!(
            entries[0],
            ParameterEntry {
                id: 1,
                name: "exposure_us".into()
            }
        );
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn set_then_get() {
        let server = testing::server().await;
        let mut conn = CommandConnection::connect(server.command_addr())
            .await
            .unwrap();

        assert_eq!(set(&mut conn, &[(2, 800), (5, 70)]).await.unwrap(), 2);
        let values = get(&mut conn, &[2, 5, 99]).await.unwrap();
        assert_eq!(values, vec![(2, 800), (5, 70)]);

        // Unknown id rejects the whole request; the session stays usable.
        assert!(set(&mut conn, &[(99, 1)]).await.is_err());
        assert_eq!(get(&mut conn, &[2]).await.unwrap(), vec![(2, 800)]);

        server.stop().await.unwrap();
    }
}
