mod process;

pub use process::{ProcessEngine, ProcessLeader, ProcessNode};

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{error::Result, node_record::NodeRecord};

/// How the engine should be started on this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
    pub data_dir: PathBuf,
    pub address: String,
    /// Addresses of running members to join. Empty when starting alone.
    pub peers: Vec<String>,
}

/// The consensus engine as seen before it is started.
#[async_trait]
pub trait ConsensusEngine: Send + Sync + 'static {
    type Node: EngineNode;

    /// Rewrites the engine's own membership in `data_dir` while it is stopped.
    async fn reconfigure_offline(&self, data_dir: &Path, records: &[NodeRecord]) -> Result<()>;

    async fn start(&self, options: StartOptions) -> Result<Self::Node>;
}

/// A running engine instance on this node.
#[async_trait]
pub trait EngineNode: Send + Sync + 'static {
    type Leader: LeaderClient;

    async fn ready(&self, timeout: Duration) -> Result<()>;

    /// Client connected to the current leader of the group.
    async fn leader(&self) -> Result<Self::Leader>;

    /// Flushes pending writes of the local storage.
    async fn flush(&self) -> Result<()>;

    /// Transfers leadership away if this node holds it.
    async fn handover(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait LeaderClient: Send + Sync + 'static {
    fn address(&self) -> &str;

    async fn cluster(&self) -> Result<Vec<NodeRecord>>;

    async fn remove(&self, id: u64) -> Result<()>;
}
