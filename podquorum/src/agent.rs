use std::{fs, future::Future, sync::Arc};
use tokio::{sync::oneshot, task::JoinHandle};

use crate::{
    bootstrap::{BootstrapPlan, ClusterBootstrap},
    config::Config,
    engine::{ConsensusEngine, EngineNode},
    error::Result,
    membership_store::MembershipStore,
    registry::PodRegistry,
    watcher::MembershipWatcher,
};

/// Drives the node through its lifetime: bootstrap, engine start, membership
/// watching and ordered shutdown.
pub struct Agent<R: PodRegistry, E: ConsensusEngine> {
    config: Config,
    registry: Arc<R>,
    engine: Arc<E>,
    logger: slog::Logger,
}

impl<R: PodRegistry, E: ConsensusEngine> Agent<R, E> {
    pub fn new(config: Config, registry: Arc<R>, engine: Arc<E>, logger: slog::Logger) -> Self {
        Self {
            config,
            registry,
            engine,
            logger,
        }
    }

    /// Bootstraps the node, starts the engine and launches the membership watcher.
    pub async fn start(&self) -> Result<RunningAgent<E::Node>> {
        self.config.validate()?;
        fs::create_dir_all(self.config.data_dir())?;
        let store = MembershipStore::new(self.config.data_dir());

        let plan = ClusterBootstrap::new(
            self.config.clone(),
            self.registry.clone(),
            self.engine.clone(),
            store,
            self.logger.clone(),
        )
        .run()
        .await?;

        let node = Arc::new(
            self.engine
                .start(plan.start_options(self.config.data_dir()))
                .await?,
        );
        if let Err(err) = node.ready(self.config.ready_timeout()).await {
            slog::error!(self.logger, "Engine did not become ready"; "error" => %err);
            if let Err(close_err) = node.close().await {
                slog::warn!(self.logger, "Failed to close the engine"; "error" => %close_err);
            }
            return Err(err);
        }
        slog::info!(self.logger, "Engine is ready"; "address" => &plan.address, "solo" => plan.is_solo());

        let watcher = MembershipWatcher::new(
            node.clone(),
            self.registry.clone(),
            plan.selector.clone(),
            plan.address.clone(),
            &self.config,
            self.logger.clone(),
        );
        let (tx_quit_signal, rx_quit_signal) = oneshot::channel();
        let watcher_handle = tokio::spawn(watcher.run(rx_quit_signal));

        Ok(RunningAgent {
            node,
            plan,
            tx_quit_signal: Some(tx_quit_signal),
            watcher_handle,
            logger: self.logger.clone(),
        })
    }

    /// Runs the node until `shutdown` resolves, then shuts it down.
    pub async fn run_until<F: Future<Output = ()>>(self, shutdown: F) -> Result<()> {
        let running = self.start().await?;
        shutdown.await;
        slog::info!(self.logger, "Shutting down gracefully...");
        running.shutdown().await
    }
}

pub struct RunningAgent<N: EngineNode> {
    node: Arc<N>,
    plan: BootstrapPlan,
    tx_quit_signal: Option<oneshot::Sender<()>>,
    watcher_handle: JoinHandle<()>,
    logger: slog::Logger,
}

impl<N: EngineNode> RunningAgent<N> {
    pub fn plan(&self) -> &BootstrapPlan {
        &self.plan
    }

    pub fn node(&self) -> &Arc<N> {
        &self.node
    }

    /// Stops the watcher without draining it, then flushes storage, hands
    /// leadership over and closes the engine, in that order.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx_quit_signal) = self.tx_quit_signal.take() {
            let _ = tx_quit_signal.send(());
        }
        self.watcher_handle.abort();

        if let Err(err) = self.node.flush().await {
            slog::warn!(self.logger, "Failed to flush the storage"; "error" => %err);
        }
        if let Err(err) = self.node.handover().await {
            slog::warn!(self.logger, "Failed to hand leadership over"; "error" => %err);
        }
        self.node.close().await?;

        slog::info!(self.logger, "Node closed"; "address" => &self.plan.address);
        Ok(())
    }
}
