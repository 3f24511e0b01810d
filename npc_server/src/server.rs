//! Framed route server.
//!
//! Accepts framed TCP connections and answers `RouteRequest`s from a shared
//! `NpcWorld`. Each connection gets its own task; requests on one connection
//! are handled strictly in order. Status codes follow HTTP:
//! - 200 with the route's response body
//! - 404 for unknown routes and unknown NPCs
//! - 422 for payloads that do not decode

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use npc_shared::{
    config::ServerConfig,
    net::{FramedConn, FramedListener, RouteReply, RouteRequest},
    protocol::{InteractRequest, Route, SyncRequest},
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::world::NpcWorld;

pub type SharedWorld = Arc<Mutex<NpcWorld>>;

/// Development NPC backend.
pub struct BackendServer {
    listener: FramedListener,
    world: SharedWorld,
}

impl BackendServer {
    /// Binds `cfg.listen_addr`.
    pub async fn bind(cfg: ServerConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.listen_addr.parse().context("parse listen_addr")?;
        let listener = FramedListener::bind(addr).await?;
        Ok(Self {
            listener,
            world: Arc::new(Mutex::new(NpcWorld::new(cfg))),
        })
    }

    /// Helper for tests: bind to an ephemeral localhost port.
    pub async fn bind_ephemeral(cfg: ServerConfig) -> anyhow::Result<Self> {
        Self::bind(ServerConfig {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string(),
            ..cfg
        })
        .await
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn world(&self) -> SharedWorld {
        self.world.clone()
    }

    /// Accepts connections until the task is dropped.
    pub async fn serve(self) -> anyhow::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((conn, peer)) => {
                    info!(%peer, "Client connected");
                    let world = self.world.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, world).await {
                            warn!(%peer, error = %e, "Connection closed with error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Accept failed"),
            }
        }
    }
}

async fn handle_connection(mut conn: FramedConn, world: SharedWorld) -> anyhow::Result<()> {
    loop {
        let req: RouteRequest = match conn.recv().await {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, "Client disconnected");
                return Ok(());
            }
        };
        let reply = {
            let mut world = world.lock().await;
            dispatch(&mut world, req)
        };
        conn.send(&reply).await.context("send reply")?;
    }
}

fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, RouteReply> {
    serde_json::from_value(payload).map_err(|e| RouteReply::error(422, e.to_string()))
}

fn encode<T: Serialize>(body: &T) -> RouteReply {
    match serde_json::to_value(body) {
        Ok(body) => RouteReply::ok(body),
        Err(e) => RouteReply::error(500, e.to_string()),
    }
}

/// Answers one request against the world.
pub fn dispatch(world: &mut NpcWorld, req: RouteRequest) -> RouteReply {
    let Some(route) = Route::parse(&req.route) else {
        debug!(route = %req.route, "Unknown route");
        return RouteReply::error(404, format!("no route: {}", req.route));
    };

    let reply = match &route {
        Route::World => Ok(encode(&world.world_state())),
        Route::Npc(id) => Ok(match world.npc_data(id) {
            Some(data) => encode(&data),
            None => RouteReply::error(404, "npc not found"),
        }),
        Route::Sync => decode::<SyncRequest>(req.payload).map(|r| encode(&world.update(&r))),
        Route::Interact => {
            decode::<InteractRequest>(req.payload).map(|r| encode(&world.interact(&r)))
        }
    };
    let reply = reply.unwrap_or_else(|rejected| rejected);
    debug!(%route, status = reply.status, "Handled route");
    reply
}
