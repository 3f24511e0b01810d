//! Framed TCP transport.
//!
//! One persistent connection to the development backend. Each exchange sends
//! a `RouteRequest` frame and waits for the matching `RouteReply`; the
//! connection is locked for the duration so replies cannot interleave.
//!
//! The connection is taken out of its slot while an exchange runs and only
//! put back once a reply has been read. An exchange that fails or is dropped
//! midway (for example by a caller's timeout) therefore discards the
//! connection along with any reply still owed on it, and the next exchange
//! dials a fresh one.

use std::net::SocketAddr;

use async_trait::async_trait;
use npc_shared::{
    net::{FramedConn, RouteReply, RouteRequest},
    protocol::Route,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::transport::{error_detail, Transport, TransportError};

/// Transport over a single framed TCP connection.
pub struct FramedTransport {
    conn: Mutex<Option<FramedConn>>,
    peer: SocketAddr,
}

impl FramedTransport {
    /// Connects to a framed backend.
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let conn = FramedConn::connect(addr).await?;
        info!(backend = %addr, "Connected to framed NPC backend");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            peer: addr,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl Transport for FramedTransport {
    async fn exchange(&self, route: &Route, payload: Value) -> Result<Value, TransportError> {
        let request = RouteRequest {
            route: route.path(),
            payload,
        };

        let raw: Value = {
            let mut slot = self.conn.lock().await;
            let mut conn = match slot.take() {
                Some(conn) => conn,
                None => {
                    debug!(backend = %self.peer, "Reconnecting to framed NPC backend");
                    FramedConn::connect(self.peer)
                        .await
                        .map_err(|e| TransportError::connection(route, format!("{e:#}")))?
                }
            };
            conn.send(&request)
                .await
                .map_err(|e| TransportError::connection(route, format!("{e:#}")))?;
            let raw = conn
                .recv()
                .await
                .map_err(|e| TransportError::connection(route, format!("{e:#}")))?;
            *slot = Some(conn);
            raw
        };

        let reply: RouteReply =
            serde_json::from_value(raw).map_err(|e| TransportError::decode(route, e))?;
        debug!(route = %route, status = reply.status, "Framed exchange complete");

        if !reply.is_success() {
            return Err(TransportError::status(
                route,
                reply.status,
                error_detail(&reply.body),
            ));
        }
        Ok(reply.body)
    }
}
