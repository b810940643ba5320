//! All links of one node

use crate::callback::TransportCallback;
use crate::error::{TransportError, TransportResult};
use crate::signal::Signal;
use crate::transporter::{SendStatus, Transporter};
use crate::watchdog::{ConnectWatchdog, SharedTransporter};
use ndb_common::config::{ConfigError, NodeTransportConfig};
use ndb_common::ids::NodeId;
use ndb_common::link::{ConnectPolicy, TransporterConfig};
use ndb_malloc::PageArena;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Owns every transporter of the local node and the shared page arena.
pub struct TransporterRegistry {
    local: NodeId,
    arena: Arc<PageArena>,
    callback: Arc<dyn TransportCallback>,
    links: HashMap<NodeId, SharedTransporter>,
}

impl TransporterRegistry {
    /// Empty registry for `local`.
    pub fn new(local: NodeId, arena: Arc<PageArena>, callback: Arc<dyn TransportCallback>) -> Self {
        Self {
            local,
            arena,
            callback,
            links: HashMap::new(),
        }
    }

    /// Registry with the arena and every link of a node configuration.
    pub fn from_config(
        config: &NodeTransportConfig,
        callback: Arc<dyn TransportCallback>,
    ) -> TransportResult<Self> {
        config.validate()?;
        let arena = PageArena::new(&config.arena)?;
        let mut registry = Self::new(config.node_id, arena, callback);
        for link in &config.links {
            registry.register(link.clone())?;
        }
        info!(
            "Registered {} links for {}",
            registry.links.len(),
            registry.local
        );
        Ok(registry)
    }

    /// Local node.
    pub fn local_node(&self) -> NodeId {
        self.local
    }

    /// Page arena shared by the links.
    pub fn arena(&self) -> &Arc<PageArena> {
        &self.arena
    }

    /// Add a link; the transporter starts `Idle`.
    pub fn register(&mut self, config: TransporterConfig) -> TransportResult<SharedTransporter> {
        if config.local_node != self.local {
            return Err(ConfigError::ValidationError(format!(
                "link local node {} is not {}",
                config.local_node, self.local
            ))
            .into());
        }
        let node = config.remote_node;
        if self.links.contains_key(&node) {
            return Err(TransportError::AlreadyRegistered { node });
        }
        let transporter = Transporter::new(config, &self.arena, Arc::clone(&self.callback))?;
        let shared = Arc::new(Mutex::new(transporter));
        self.links.insert(node, Arc::clone(&shared));
        debug!("Registered link to {}", node);
        Ok(shared)
    }

    /// Disconnect and drop the link to `node`.
    pub fn remove(&mut self, node: NodeId) -> TransportResult<()> {
        let link = self
            .links
            .remove(&node)
            .ok_or(TransportError::NotRegistered { node })?;
        link.lock().disconnect();
        debug!("Removed link to {}", node);
        Ok(())
    }

    /// Handle of the link to `node`.
    pub fn get(&self, node: NodeId) -> Option<SharedTransporter> {
        self.links.get(&node).cloned()
    }

    /// Registered peers, ascending.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<_> = self.links.keys().copied().collect();
        nodes.sort_unstable();
        nodes
    }

    /// Send on the link to `node`.
    pub fn send(&self, node: NodeId, signal: &Signal) -> TransportResult<SendStatus> {
        let link = self
            .links
            .get(&node)
            .ok_or(TransportError::NotRegistered { node })?;
        Ok(link.lock().send(signal))
    }

    /// Flush every connected link; returns the links torn down doing so.
    pub fn perform_send(&self) -> Vec<NodeId> {
        self.links
            .iter()
            .filter_map(|(node, link)| link.lock().perform_send().err().map(|_| *node))
            .collect()
    }

    /// One receive round over every connected link; returns signals
    /// delivered. Failed links are torn down and reported by their
    /// transporter.
    pub fn perform_receive(&self) -> usize {
        self.links
            .values()
            .map(|link| link.lock().poll_receive().unwrap_or(0))
            .sum()
    }

    /// Bring up every link that is not connected on a watchdog thread.
    pub fn connect_all(&self, policy: ConnectPolicy) -> TransportResult<ConnectWatchdog> {
        let pending: Vec<_> = self
            .links
            .iter()
            .filter(|(_, link)| !link.lock().is_connected())
            .map(|(node, link)| (*node, Arc::clone(link)))
            .collect();
        info!("Connecting {} links", pending.len());
        Ok(ConnectWatchdog::spawn(pending, policy)?)
    }

    /// Disconnect every link.
    pub fn disconnect_all(&self) {
        for link in self.links.values() {
            link.lock().disconnect();
        }
    }

    /// Number of connected links.
    pub fn connected_count(&self) -> usize {
        self.links
            .values()
            .filter(|link| link.lock().is_connected())
            .count()
    }
}

impl std::fmt::Debug for TransporterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransporterRegistry")
            .field("local", &self.local)
            .field("links", &self.nodes())
            .finish()
    }
}
