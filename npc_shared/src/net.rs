//! Framed networking primitives.
//!
//! Goals:
//! - Carry logical route exchanges over one TCP connection.
//! - Keep serialization explicit: 4-byte big-endian length, then a JSON body.
//! - Mirror HTTP status semantics in replies so a client can treat the framed
//!   backend and an HTTP backend the same way.

use std::net::SocketAddr;

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

/// Largest frame either side accepts.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Client -> backend: one route exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteRequest {
    /// Route path, e.g. `npc/guard`.
    pub route: String,
    #[serde(default)]
    pub payload: Value,
}

/// Backend -> client: reply to a `RouteRequest`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteReply {
    /// HTTP-style status code.
    pub status: u16,
    #[serde(default)]
    pub body: Value,
}

impl RouteReply {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// Error reply carrying `{ "detail": ... }`.
    pub fn error(status: u16, detail: impl Into<String>) -> Self {
        Self {
            status,
            body: serde_json::json!({ "detail": detail.into() }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Length-prefixed JSON connection over TCP.
#[derive(Debug)]
pub struct FramedConn {
    stream: TcpStream,
}

impl FramedConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok(Self::new(stream))
    }

    pub async fn send<T: Serialize>(&mut self, msg: &T) -> anyhow::Result<()> {
        let buf = encode_frame(msg)?;
        self.stream.write_all(&buf).await.context("tcp write")?;
        Ok(())
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> anyhow::Result<T> {
        let mut len_buf = [0u8; 4];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .context("tcp read len")?;
        let len = u32::from_be_bytes(len_buf) as usize;
        anyhow::ensure!(len <= MAX_FRAME_BYTES, "frame too large: {len} bytes");
        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .await
            .context("tcp read payload")?;
        decode_body(&payload)
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }
}

/// TCP listener handing out framed connections.
pub struct FramedListener {
    listener: TcpListener,
}

impl FramedListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(FramedConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((FramedConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Encodes a message as a complete frame (length prefix included).
pub fn encode_frame<T: Serialize>(msg: &T) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize frame")?;
    anyhow::ensure!(
        payload.len() <= MAX_FRAME_BYTES,
        "frame too large: {} bytes",
        payload.len()
    );
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

/// Decodes a frame body (length prefix already stripped).
pub fn decode_body<T: DeserializeOwned>(b: &[u8]) -> anyhow::Result<T> {
    serde_json::from_slice(b).context("deserialize frame")
}
