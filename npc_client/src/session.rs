//! Session owner.
//!
//! `NpcSession` holds the transport, the shared registry and the config for
//! one connection to the backend, and sequences the phases: bootstrap once,
//! then sync. Player interactions go through here as well.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use npc_shared::{
    config::{ClientConfig, TransportKind},
    protocol::{ActorId, InteractRequest},
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    bootstrap::{BootstrapError, BootstrapOptions, BootstrapSequencer, ProgressSink, Ready},
    controller::ActorHost,
    framed::FramedTransport,
    http::HttpTransport,
    registry::{ActorRegistry, SharedRegistry},
    sync::SyncLoop,
    transport::{self, Transport, TransportError},
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InteractError {
    /// No such actor in the registry; nothing was sent.
    #[error("unknown npc: {id}")]
    UnknownActor { id: ActorId },
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The backend answered but refused the interaction.
    #[error("interaction with {id} rejected: {reason}")]
    Rejected { id: ActorId, reason: String },
}

pub struct NpcSession {
    transport: Arc<dyn Transport>,
    registry: SharedRegistry,
    config: ClientConfig,
    bootstrapped: bool,
}

impl NpcSession {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            transport,
            registry: ActorRegistry::shared(),
            config,
            bootstrapped: false,
        }
    }

    /// Builds the transport named by `config.transport`.
    pub async fn connect(config: ClientConfig) -> anyhow::Result<Self> {
        let transport: Arc<dyn Transport> = match config.transport {
            TransportKind::Http => {
                info!(api_url = %config.api_url, "Using HTTP NPC backend");
                Arc::new(HttpTransport::from_config(&config)?)
            }
            TransportKind::Framed => {
                let addr: SocketAddr = config
                    .backend_addr
                    .parse()
                    .with_context(|| format!("invalid backend_addr {:?}", config.backend_addr))?;
                Arc::new(FramedTransport::connect(addr).await?)
            }
        };
        Ok(Self::new(transport, config))
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Runs bootstrap. A session bootstraps at most once, whether or not the
    /// first attempt succeeded.
    pub async fn bootstrap(
        &mut self,
        host: &mut dyn ActorHost,
        sink: &mut dyn ProgressSink,
    ) -> Result<Ready, BootstrapError> {
        if self.bootstrapped {
            return Err(BootstrapError::AlreadyRan);
        }
        self.bootstrapped = true;
        BootstrapSequencer::new(
            self.transport.clone(),
            self.registry.clone(),
            BootstrapOptions::from_config(&self.config),
        )
        .run(host, sink)
        .await
    }

    /// Starts the sync loop at the configured update interval.
    pub fn start_sync(&self, ready: Ready) -> SyncLoop {
        SyncLoop::new(
            ready,
            self.transport.clone(),
            self.registry.clone(),
            self.config.update_interval(),
        )
    }

    /// Sends a player interaction for `id` and returns the backend's data.
    pub async fn interact(
        &self,
        id: &ActorId,
        action: &str,
        data: Value,
    ) -> Result<Value, InteractError> {
        if !self.registry.lock().await.contains(id) {
            return Err(InteractError::UnknownActor { id: id.clone() });
        }
        let request = InteractRequest {
            npc_id: id.clone(),
            action: action.to_string(),
            data,
        };
        let response = transport::interact(self.transport.as_ref(), &request).await?;
        if !response.success {
            return Err(InteractError::Rejected {
                id: id.clone(),
                reason: response
                    .error
                    .unwrap_or_else(|| "no reason given".to_string()),
            });
        }
        debug!(npc_id = %id, action, "Interaction accepted");
        Ok(response.data)
    }
}
