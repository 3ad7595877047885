use parking_lot::Mutex;
use podquorum::{
    async_trait, ConsensusEngine, EngineNode, Error, LabelSelector, LeaderClient, NodeRecord,
    PodInfo, PodRegistry, Result, StartOptions,
};
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

#[derive(Debug, Default)]
struct RegistryState {
    pods: Vec<(LabelSelector, PodInfo)>,
    label: String,
    self_ip: Option<String>,
    self_ip_delay: usize,
    labels: HashMap<String, String>,
    reachable: HashSet<String>,
    failing_lists: usize,
    list_calls: usize,
    selectors: Vec<String>,
    dialed: Vec<String>,
}

/// In-memory scheduler registry.
#[derive(Debug, Clone, Default)]
pub struct FakeRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl FakeRegistry {
    pub fn new(self_ip: &str, label: &str) -> Self {
        let registry = Self::default();
        {
            let mut state = registry.state.lock();
            state.self_ip = Some(self_ip.to_owned());
            state.label = label.to_owned();
            state.labels.insert("app".to_owned(), label.to_owned());
        }
        registry
    }

    /// Adds a pod of this workload; `reachable` pods accept connections on `port`.
    pub fn add_pod(&self, name: &str, ip: Option<&str>, port: u16, reachable: bool) {
        let label = self.state.lock().label.clone();
        self.add_labeled_pod(name, ip, port, reachable, &label);
    }

    /// Adds a pod carrying `app=<label>`.
    pub fn add_labeled_pod(
        &self,
        name: &str,
        ip: Option<&str>,
        port: u16,
        reachable: bool,
        label: &str,
    ) {
        let mut state = self.state.lock();
        if let (Some(ip), true) = (ip, reachable) {
            state.reachable.insert(format!("{}:{}", ip, port));
        }
        state
            .pods
            .push((LabelSelector::new("app", label), PodInfo::new(name, ip, true)));
    }

    pub fn set_ready(&self, name: &str, ready: bool) {
        let mut state = self.state.lock();
        for (_, pod) in state.pods.iter_mut().filter(|(_, pod)| pod.name == name) {
            pod.ready = ready;
        }
    }

    pub fn remove_pod(&self, name: &str) {
        self.state.lock().pods.retain(|(_, pod)| pod.name != name);
    }

    pub fn set_self_ip(&self, ip: Option<&str>) {
        self.state.lock().self_ip = ip.map(str::to_owned);
    }

    /// The own IP is reported only after `polls` unanswered queries.
    pub fn delay_self_ip(&self, polls: usize) {
        self.state.lock().self_ip_delay = polls;
    }

    pub fn clear_labels(&self) {
        self.state.lock().labels.clear();
    }

    pub fn fail_next_lists(&self, count: usize) {
        self.state.lock().failing_lists = count;
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    /// Selectors passed to `list_by_label`, formatted as `key=value`.
    pub fn selectors(&self) -> Vec<String> {
        self.state.lock().selectors.clone()
    }

    pub fn dialed(&self) -> Vec<String> {
        self.state.lock().dialed.clone()
    }
}

#[async_trait]
impl PodRegistry for FakeRegistry {
    async fn list_by_label(&self, selector: &LabelSelector) -> Result<Vec<PodInfo>> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        state.selectors.push(selector.to_string());
        if state.failing_lists > 0 {
            state.failing_lists -= 1;
            return Err(Error::Registry("pods are forbidden".to_owned()));
        }
        Ok(state
            .pods
            .iter()
            .filter(|(labels, _)| labels == selector)
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn self_ip(&self) -> Result<Option<String>> {
        let mut state = self.state.lock();
        if state.self_ip_delay > 0 {
            state.self_ip_delay -= 1;
            return Ok(None);
        }
        Ok(state.self_ip.clone())
    }

    async fn self_label(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.lock().labels.get(key).cloned())
    }

    async fn dial(&self, address: &str, _timeout: Duration) -> bool {
        let mut state = self.state.lock();
        state.dialed.push(address.to_owned());
        state.reachable.contains(address)
    }
}

/// Calls the engine received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Reconfigure(PathBuf, Vec<NodeRecord>),
    Start(StartOptions),
    Ready,
    Leader,
    Cluster,
    Remove(u64),
    Flush,
    Handover,
    Close,
}

#[derive(Debug, Default)]
struct EngineState {
    members: Vec<NodeRecord>,
    leader: Option<String>,
    calls: Vec<EngineCall>,
    fail_reconfigure: bool,
    fail_ready: bool,
    failing_leader_queries: usize,
    failing_removals: HashMap<u64, usize>,
}

/// In-memory consensus engine. Nodes and leaders share the engine's state.
#[derive(Debug, Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<EngineState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_members(leader: &str, members: &[&str]) -> Self {
        let engine = Self::new();
        engine.set_members(leader, members);
        engine
    }

    pub fn set_members(&self, leader: &str, members: &[&str]) {
        let mut state = self.state.lock();
        state.leader = Some(leader.to_owned());
        state.members = members.iter().map(|a| NodeRecord::voter(*a)).collect();
    }

    pub fn members(&self) -> Vec<NodeRecord> {
        self.state.lock().members.clone()
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    pub fn removals(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Remove(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn reconfigurations(&self) -> Vec<(PathBuf, Vec<NodeRecord>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Reconfigure(dir, records) => Some((dir, records)),
                _ => None,
            })
            .collect()
    }

    pub fn fail_reconfigure(&self) {
        self.state.lock().fail_reconfigure = true;
    }

    pub fn fail_ready(&self) {
        self.state.lock().fail_ready = true;
    }

    pub fn fail_next_leader_queries(&self, count: usize) {
        self.state.lock().failing_leader_queries = count;
    }

    /// The next `count` removals of `id` are rejected.
    pub fn fail_removals_of(&self, id: u64, count: usize) {
        self.state.lock().failing_removals.insert(id, count);
    }

    fn record(&self, call: EngineCall) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl ConsensusEngine for FakeEngine {
    type Node = FakeNode;

    async fn reconfigure_offline(&self, data_dir: &Path, records: &[NodeRecord]) -> Result<()> {
        self.record(EngineCall::Reconfigure(
            data_dir.to_path_buf(),
            records.to_vec(),
        ));
        if self.state.lock().fail_reconfigure {
            return Err(Error::Reconfiguration("raft log is locked".to_owned()));
        }
        Ok(())
    }

    async fn start(&self, options: StartOptions) -> Result<FakeNode> {
        {
            let mut state = self.state.lock();
            if state.leader.is_none() {
                state.leader = Some(options.address.clone());
                state.members = vec![NodeRecord::voter(options.address.as_str())];
            }
        }
        self.record(EngineCall::Start(options));
        Ok(FakeNode {
            engine: self.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FakeNode {
    engine: FakeEngine,
}

#[async_trait]
impl EngineNode for FakeNode {
    type Leader = FakeLeader;

    async fn ready(&self, _timeout: Duration) -> Result<()> {
        self.engine.record(EngineCall::Ready);
        if self.engine.state.lock().fail_ready {
            return Err(Error::Timeout("engine is not ready".to_owned()));
        }
        Ok(())
    }

    async fn leader(&self) -> Result<FakeLeader> {
        self.engine.record(EngineCall::Leader);
        let mut state = self.engine.state.lock();
        if state.failing_leader_queries > 0 {
            state.failing_leader_queries -= 1;
            return Err(Error::Engine("no leader elected".to_owned()));
        }
        let address = state
            .leader
            .clone()
            .ok_or_else(|| Error::Engine("no leader elected".to_owned()))?;

        Ok(FakeLeader {
            address,
            engine: self.engine.clone(),
        })
    }

    async fn flush(&self) -> Result<()> {
        self.engine.record(EngineCall::Flush);
        Ok(())
    }

    async fn handover(&self) -> Result<()> {
        self.engine.record(EngineCall::Handover);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.engine.record(EngineCall::Close);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FakeLeader {
    address: String,
    engine: FakeEngine,
}

#[async_trait]
impl LeaderClient for FakeLeader {
    fn address(&self) -> &str {
        &self.address
    }

    async fn cluster(&self) -> Result<Vec<NodeRecord>> {
        self.engine.record(EngineCall::Cluster);
        Ok(self.engine.members())
    }

    async fn remove(&self, id: u64) -> Result<()> {
        self.engine.record(EngineCall::Remove(id));
        let mut state = self.engine.state.lock();
        if let Some(remaining) = state.failing_removals.get_mut(&id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Engine(format!("node {} is busy", id)));
            }
        }
        state.members.retain(|member| member.id != id);
        Ok(())
    }
}
