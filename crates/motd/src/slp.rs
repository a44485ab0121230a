//! Minecraft Server List Ping (the legacy-free, 1.7+ handshake/status
//! variant): a varint-framed, two-packet exchange over a plain TCP
//! connection. Kept intentionally minimal — only the fields the status
//! probe needs are decoded, everything else in the JSON payload is ignored.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{MotdError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Guards against a malicious or buggy peer claiming an absurd packet
/// length; real status payloads are a few KiB at most.
const MAX_PACKET_LEN: usize = 1 << 20;

#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub motd: String,
    pub online: u32,
    pub max: u32,
    pub version: String,
}

/// Connects to `(host, port)`, performs the handshake + status request, and
/// decodes the JSON status response. Treated as an opaque probe by callers —
/// any failure collapses to a single error value, distinguishing success from
/// failure rather than diagnosing exactly which wire step misbehaved.
pub async fn fetch_status(host: &str, port: u16) -> Result<ServerStatus> {
    let addr = format!("{host}:{port}");

    let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .map_err(|_| MotdError::Timeout { addr: addr.clone() })?
        .map_err(|source| MotdError::Connect { addr: addr.clone(), source })?;

    write_handshake(&mut stream, host, port).await?;
    write_status_request(&mut stream).await?;

    let payload = timeout(READ_TIMEOUT, read_framed_packet(&mut stream, &addr))
        .await
        .map_err(|_| MotdError::Timeout { addr: addr.clone() })??;

    decode_status_packet(&addr, &payload)
}

async fn write_handshake(stream: &mut TcpStream, host: &str, port: u16) -> Result<()> {
    let addr = format!("{host}:{port}");
    let mut body = Vec::new();
    write_varint(&mut body, 0x00); // packet id: handshake
    write_varint(&mut body, 0); // protocol version: unspecified, server replies with its own
    write_string(&mut body, host);
    body.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut body, 1); // next state: status

    write_framed_packet(stream, &body).await.map_err(|source| MotdError::Io { addr, source })
}

async fn write_status_request(stream: &mut TcpStream) -> Result<()> {
    let mut body = Vec::new();
    write_varint(&mut body, 0x00); // packet id: status request, empty body
    write_framed_packet(stream, &body).await.map_err(|source| MotdError::Io {
        addr: peer_addr_or_unknown(stream),
        source,
    })
}

fn peer_addr_or_unknown(stream: &TcpStream) -> String {
    stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string())
}

async fn write_framed_packet(stream: &mut TcpStream, body: &[u8]) -> std::io::Result<()> {
    let mut framed = Vec::with_capacity(body.len() + 5);
    write_varint(&mut framed, body.len() as i32);
    framed.extend_from_slice(body);
    stream.write_all(&framed).await
}

async fn read_framed_packet(stream: &mut TcpStream, addr: &str) -> Result<Vec<u8>> {
    let len = read_varint(stream, addr).await? as usize;
    if len == 0 || len > MAX_PACKET_LEN {
        return Err(MotdError::PacketTooLarge { addr: addr.to_string() });
    }
    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|source| MotdError::Io { addr: addr.to_string(), source })?;
    Ok(buf)
}

fn decode_status_packet(addr: &str, packet: &[u8]) -> Result<ServerStatus> {
    let mut cursor = std::io::Cursor::new(packet);
    let packet_id = read_varint_sync(&mut cursor).map_err(|reason| MotdError::MalformedResponse {
        addr: addr.to_string(),
        reason,
    })?;
    if packet_id != 0x00 {
        return Err(MotdError::MalformedResponse {
            addr: addr.to_string(),
            reason: format!("unexpected packet id {packet_id}"),
        });
    }

    let json_str = read_string_sync(&mut cursor).map_err(|reason| MotdError::MalformedResponse {
        addr: addr.to_string(),
        reason,
    })?;

    parse_status_json(addr, &json_str)
}

fn parse_status_json(addr: &str, json_str: &str) -> Result<ServerStatus> {
    let value: serde_json::Value =
        serde_json::from_str(json_str).map_err(|e| MotdError::MalformedResponse {
            addr: addr.to_string(),
            reason: format!("invalid JSON: {e}"),
        })?;

    let motd = value
        .get("description")
        .map(description_to_plain_text)
        .unwrap_or_default();
    let online = value
        .get("players")
        .and_then(|p| p.get("online"))
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0) as u32;
    let max = value
        .get("players")
        .and_then(|p| p.get("max"))
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0) as u32;
    let version = value
        .get("version")
        .and_then(|v| v.get("name"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    Ok(ServerStatus { motd, online, max, version })
}

/// `description` is either a plain string or a Minecraft "chat component"
/// object/array; only the `text` fields are concatenated, formatting codes
/// and nested `extra` arrays are flattened in document order.
fn description_to_plain_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(_) => {
            let mut out = String::new();
            flatten_chat_component(value, &mut out);
            out
        },
        serde_json::Value::Array(items) => {
            let mut out = String::new();
            for item in items {
                flatten_chat_component(item, &mut out);
            }
            out
        },
        _ => String::new(),
    }
}

fn flatten_chat_component(value: &serde_json::Value, out: &mut String) {
    if let Some(text) = value.get("text").and_then(serde_json::Value::as_str) {
        out.push_str(text);
    }
    if let Some(extra) = value.get("extra").and_then(serde_json::Value::as_array) {
        for item in extra {
            flatten_chat_component(item, out);
        }
    }
}

fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut v = value as u32;
    loop {
        let mut byte = (v & 0x7F) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if v == 0 {
            break;
        }
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_varint(buf, s.len() as i32);
    buf.extend_from_slice(s.as_bytes());
}

async fn read_varint(stream: &mut TcpStream, addr: &str) -> Result<i32> {
    let mut result: i32 = 0;
    let mut shift = 0;
    loop {
        let mut byte = [0u8; 1];
        stream
            .read_exact(&mut byte)
            .await
            .map_err(|source| MotdError::Io { addr: addr.to_string(), source })?;
        result |= ((byte[0] & 0x7F) as i32) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 35 {
            return Err(MotdError::MalformedResponse {
                addr: addr.to_string(),
                reason: "varint too long".to_string(),
            });
        }
    }
    Ok(result)
}

fn read_varint_sync(cursor: &mut std::io::Cursor<&[u8]>) -> std::result::Result<i32, String> {
    use std::io::Read;
    let mut result: i32 = 0;
    let mut shift = 0;
    loop {
        let mut byte = [0u8; 1];
        cursor.read_exact(&mut byte).map_err(|_| "unexpected end of packet reading varint".to_string())?;
        result |= ((byte[0] & 0x7F) as i32) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 35 {
            return Err("varint too long".to_string());
        }
    }
    Ok(result)
}

fn read_string_sync(cursor: &mut std::io::Cursor<&[u8]>) -> std::result::Result<String, String> {
    use std::io::Read;
    let len = read_varint_sync(cursor)? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).map_err(|_| "unexpected end of packet reading string".to_string())?;
    String::from_utf8(buf).map_err(|e| format!("invalid UTF-8 in string: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trips_small_and_large_values() {
        for value in [0, 1, 127, 128, 255, 2097151, i32::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let mut cursor = std::io::Cursor::new(buf.as_slice());
            assert_eq!(read_varint_sync(&mut cursor).unwrap(), value);
        }
    }

    #[test]
    fn description_plain_string_passes_through() {
        let value = serde_json::json!("A Minecraft Server");
        assert_eq!(description_to_plain_text(&value), "A Minecraft Server");
    }

    #[test]
    fn description_chat_component_flattens_extras() {
        let value = serde_json::json!({
            "text": "Hello ",
            "extra": [{"text": "World"}, {"text": "!"}]
        });
        assert_eq!(description_to_plain_text(&value), "Hello World!");
    }

    #[test]
    fn parse_status_json_extracts_expected_fields() {
        let json = serde_json::json!({
            "version": {"name": "1.20.4", "protocol": 765},
            "players": {"max": 20, "online": 3, "sample": []},
            "description": {"text": "Welcome"}
        })
        .to_string();

        let status = parse_status_json("127.0.0.1:25565", &json).unwrap();
        assert_eq!(status.motd, "Welcome");
        assert_eq!(status.online, 3);
        assert_eq!(status.max, 20);
        assert_eq!(status.version, "1.20.4");
    }

    #[test]
    fn parse_status_json_rejects_invalid_json() {
        let err = parse_status_json("127.0.0.1:25565", "not json").unwrap_err();
        assert!(matches!(err, MotdError::MalformedResponse { .. }));
    }
}
