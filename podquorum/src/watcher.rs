use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::oneshot,
    time::{self, Instant, MissedTickBehavior},
};

use crate::{
    config::Config,
    engine::{EngineNode, LeaderClient},
    error::{Error, Result},
    node_record::NodeRecord,
    registry::{LabelSelector, LiveSnapshot, PodInfo, PodRegistry},
};

/// Members of the group whose address the registry no longer reports.
///
/// The member running at `self_address` is never part of the result.
pub fn find_missing<'a>(
    members: &'a [NodeRecord],
    live: &LiveSnapshot,
    self_address: &str,
) -> Vec<&'a NodeRecord> {
    members
        .iter()
        .filter(|member| member.address != self_address && !live.contains(&member.address))
        .collect()
}

/// Outcome of one reconciliation tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub leader: String,
    pub members: usize,
    pub live: usize,
    pub missing: Vec<NodeRecord>,
    pub removed: Vec<u64>,
    pub failed: Vec<u64>,
    /// Missing members not yet seen missing on enough consecutive ticks.
    pub deferred: Vec<u64>,
}

/// Periodically evicts group members that have disappeared from the registry.
pub struct MembershipWatcher<N: EngineNode, R: PodRegistry> {
    node: Arc<N>,
    registry: Arc<R>,
    selector: LabelSelector,
    self_address: String,
    peer_port: u16,
    interval: Duration,
    query_timeout: Duration,
    eviction_threshold: u32,
    misses: HashMap<u64, u32>,
    logger: slog::Logger,
}

impl<N: EngineNode, R: PodRegistry> MembershipWatcher<N, R> {
    pub fn new(
        node: Arc<N>,
        registry: Arc<R>,
        selector: LabelSelector,
        self_address: String,
        config: &Config,
        logger: slog::Logger,
    ) -> Self {
        Self {
            node,
            registry,
            selector,
            self_address,
            peer_port: config.peer_port(),
            interval: config.watch_interval(),
            query_timeout: config.query_timeout(),
            eviction_threshold: config.eviction_threshold(),
            misses: HashMap::new(),
            logger,
        }
    }

    /// Ticks every interval until `rx_quit_signal` fires or its sender is dropped.
    pub async fn run(mut self, mut rx_quit_signal: oneshot::Receiver<()>) {
        let mut interval = time::interval_at(Instant::now() + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut rx_quit_signal => {
                    slog::info!(self.logger, "Membership watcher stopped");
                    return;
                }
                _ = interval.tick() => {}
            }

            slog::debug!(self.logger, "Checking for died nodes...");
            match self.tick().await {
                Ok(report) => {
                    slog::debug!(self.logger, "Membership check done";
                        "leader" => &report.leader,
                        "members" => report.members,
                        "live" => report.live,
                        "removed" => report.removed.len(),
                        "failed" => report.failed.len(),
                        "deferred" => report.deferred.len());
                }
                Err(err) => {
                    slog::warn!(self.logger, "Membership check failed, retrying on the next tick"; "error" => %err);
                }
            }
        }
    }

    /// Runs one reconciliation: query, diff, and remove missing members.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let (leader, members, pods) = time::timeout(self.query_timeout, self.query())
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "membership query took longer than {:?}",
                    self.query_timeout
                ))
            })??;

        let live = LiveSnapshot::from_pods(&pods, self.peer_port);
        let missing: Vec<NodeRecord> = find_missing(&members, &live, &self.self_address)
            .into_iter()
            .cloned()
            .collect();

        // Counters only survive while a member stays missing.
        self.misses
            .retain(|id, _| missing.iter().any(|member| member.id == *id));

        let mut report = TickReport {
            leader: leader.address().to_owned(),
            members: members.len(),
            live: live.len(),
            ..Default::default()
        };

        for member in &missing {
            let misses = self.misses.entry(member.id).or_insert(0);
            *misses += 1;
            if *misses < self.eviction_threshold {
                slog::info!(self.logger, "Node is missing from the registry, waiting before removal";
                    "id" => member.id, "address" => &member.address,
                    "misses" => *misses, "threshold" => self.eviction_threshold);
                report.deferred.push(member.id);
                continue;
            }

            match self.remove(&leader, member).await {
                Ok(()) => {
                    slog::info!(self.logger, "Node was removed from the cluster";
                        "id" => member.id, "address" => &member.address);
                    self.misses.remove(&member.id);
                    report.removed.push(member.id);
                }
                Err(err) => {
                    slog::warn!(self.logger, "Unable to remove node from the cluster"; "error" => %err);
                    report.failed.push(member.id);
                }
            }
        }

        report.missing = missing;
        Ok(report)
    }

    async fn query(&self) -> Result<(N::Leader, Vec<NodeRecord>, Vec<PodInfo>)> {
        let leader = self.node.leader().await?;
        let members = leader.cluster().await?;
        let pods = self.registry.list_by_label(&self.selector).await?;
        Ok((leader, members, pods))
    }

    async fn remove(&self, leader: &N::Leader, member: &NodeRecord) -> Result<()> {
        let removal_error = |cause: String| Error::Removal {
            id: member.id,
            address: member.address.clone(),
            cause,
        };

        match time::timeout(self.query_timeout, leader.remove(member.id)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(removal_error(err.to_string())),
            Err(_) => Err(removal_error(format!(
                "no answer within {:?}",
                self.query_timeout
            ))),
        }
    }
}
