mod kubernetes;

pub use kubernetes::{KubernetesRegistry, SERVICE_ACCOUNT_DIR};

use std::{
    collections::HashSet,
    fmt,
    time::{Duration, Instant},
};
use tokio::{net::TcpStream, time};

use crate::error::{Error, Result};

/// A process known to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub ip: Option<String>,
    pub ready: bool,
}

impl PodInfo {
    pub fn new<N: Into<String>>(name: N, ip: Option<&str>, ready: bool) -> Self {
        Self {
            name: name.into(),
            ip: ip.filter(|ip| !ip.is_empty()).map(str::to_owned),
            ready,
        }
    }

    /// Address of the engine's peer endpoint on this pod, once an IP is assigned.
    pub fn peer_address(&self, port: u16) -> Option<String> {
        self.ip.as_deref().map(|ip| join_host_port(ip, port))
    }
}

/// Formats `host:port`, bracketing IPv6 hosts.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// `key=value` label selecting the pods of one workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    pub key: String,
    pub value: String,
}

impl LabelSelector {
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// The scheduler's view of live processes.
#[async_trait]
pub trait PodRegistry: Send + Sync + 'static {
    async fn list_by_label(&self, selector: &LabelSelector) -> Result<Vec<PodInfo>>;

    /// IP of the current process, `None` while the scheduler has not assigned one.
    async fn self_ip(&self) -> Result<Option<String>>;

    /// Value of the label `key` on the current process.
    async fn self_label(&self, key: &str) -> Result<Option<String>>;

    /// Probes whether `address` accepts connections within `timeout`.
    async fn dial(&self, address: &str, timeout: Duration) -> bool {
        probe_tcp(address, timeout).await
    }
}

pub async fn probe_tcp(address: &str, timeout: Duration) -> bool {
    matches!(
        time::timeout(timeout, TcpStream::connect(address)).await,
        Ok(Ok(_))
    )
}

/// Polls the registry until the current process has an IP, for at most `timeout`.
pub async fn wait_for_self_ip<R: PodRegistry + ?Sized>(
    registry: &R,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<String> {
    let started = Instant::now();
    loop {
        if let Some(ip) = registry.self_ip().await?.filter(|ip| !ip.is_empty()) {
            return Ok(ip);
        }
        if started.elapsed() >= timeout {
            return Err(Error::Timeout(format!(
                "no IP assigned to this pod after {:?}",
                timeout
            )));
        }
        time::sleep(poll_interval).await;
    }
}

/// Peer addresses of the pods the registry reported at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSnapshot {
    addresses: HashSet<String>,
}

impl LiveSnapshot {
    pub fn from_pods(pods: &[PodInfo], port: u16) -> Self {
        Self {
            addresses: pods.iter().filter_map(|pod| pod.peer_address(port)).collect(),
        }
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for LiveSnapshot {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            addresses: iter.into_iter().map(Into::into).collect(),
        }
    }
}
