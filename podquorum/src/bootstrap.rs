use std::{path::PathBuf, sync::Arc};

use crate::{
    config::Config,
    engine::{ConsensusEngine, StartOptions},
    error::{Error, Result},
    membership_store::MembershipStore,
    rebinder::{AddressRebinder, RebindOutcome},
    registry::{join_host_port, wait_for_self_ip, LabelSelector, PodRegistry},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapPath {
    /// No other member is reachable; the node runs alone under its current address.
    Solo(RebindOutcome),
    /// Reachable peer addresses the engine should join.
    Join(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPlan {
    pub address: String,
    pub selector: LabelSelector,
    pub path: BootstrapPath,
}

impl BootstrapPlan {
    pub fn is_solo(&self) -> bool {
        matches!(self.path, BootstrapPath::Solo(_))
    }

    pub fn peers(&self) -> &[String] {
        match &self.path {
            BootstrapPath::Solo(_) => &[],
            BootstrapPath::Join(peers) => peers,
        }
    }

    pub fn start_options<P: Into<PathBuf>>(&self, data_dir: P) -> StartOptions {
        StartOptions {
            data_dir: data_dir.into(),
            address: self.address.clone(),
            peers: self.peers().to_vec(),
        }
    }
}

/// Decides once, before the engine starts, whether this node joins running
/// siblings or runs alone.
pub struct ClusterBootstrap<R: PodRegistry, E: ConsensusEngine> {
    config: Config,
    registry: Arc<R>,
    engine: Arc<E>,
    store: MembershipStore,
    logger: slog::Logger,
}

impl<R: PodRegistry, E: ConsensusEngine> ClusterBootstrap<R, E> {
    pub fn new(
        config: Config,
        registry: Arc<R>,
        engine: Arc<E>,
        store: MembershipStore,
        logger: slog::Logger,
    ) -> Self {
        Self {
            config,
            registry,
            engine,
            store,
            logger,
        }
    }

    pub async fn run(&self) -> Result<BootstrapPlan> {
        let ip = wait_for_self_ip(
            self.registry.as_ref(),
            self.config.self_address_timeout(),
            self.config.self_address_poll_interval(),
        )
        .await?;
        let address = join_host_port(&ip, self.config.peer_port());
        let selector = self.resolve_selector().await?;
        slog::info!(self.logger, "Resolved node address"; "address" => &address, "selector" => %selector);

        let peers = self.discover_peers(&selector, &address).await?;
        let path = if peers.is_empty() {
            slog::info!(self.logger, "No reachable siblings, starting as the only member");
            let rebinder = AddressRebinder::new(&self.store, self.engine.as_ref(), self.logger.clone());
            BootstrapPath::Solo(rebinder.rebind(&address).await?)
        } else {
            if self.store.discard_solo_files()? {
                slog::info!(self.logger, "Discarded solo membership files";
                    "data_dir" => %self.store.dir().display());
            }
            slog::info!(self.logger, "Joining the existing group"; "peers" => peers.join(","));
            BootstrapPath::Join(peers)
        };

        Ok(BootstrapPlan {
            address,
            selector,
            path,
        })
    }

    /// The configured label value, or the value the current pod carries.
    pub async fn resolve_selector(&self) -> Result<LabelSelector> {
        let key = self.config.label_key();
        let value = match self.config.label_value() {
            Some(value) => value.to_owned(),
            None => self.registry.self_label(key).await?.ok_or_else(|| {
                Error::Config(format!("this pod has no \"{}\" label", key))
            })?,
        };
        Ok(LabelSelector::new(key, value))
    }

    /// Addresses of sibling pods that accept connections on the peer port,
    /// ready pods first.
    pub async fn discover_peers(
        &self,
        selector: &LabelSelector,
        self_address: &str,
    ) -> Result<Vec<String>> {
        let pods = self.registry.list_by_label(selector).await?;
        let mut peers = Vec::new();

        for pod in &pods {
            let Some(address) = pod.peer_address(self.config.peer_port()) else {
                slog::debug!(self.logger, "Skipping pod without an IP"; "pod" => &pod.name);
                continue;
            };
            if address == self_address {
                continue;
            }

            if self.registry.dial(&address, self.config.dial_timeout()).await {
                slog::info!(self.logger, "Node found";
                    "pod" => &pod.name, "address" => &address, "ready" => pod.ready);
                peers.push((pod.ready, address));
            } else {
                slog::warn!(self.logger, "Sibling is not reachable, leaving it out of the join list";
                    "pod" => &pod.name, "address" => &address);
            }
        }

        peers.sort_by_key(|(ready, _)| !*ready);
        Ok(peers.into_iter().map(|(_, address)| address).collect())
    }
}
