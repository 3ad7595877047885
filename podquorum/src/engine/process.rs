use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::{path::Path, process::Stdio, time::Duration};
use tokio::{
    process::{Child, Command},
    sync::Mutex,
    time::{self, Instant},
};

use super::{ConsensusEngine, EngineNode, LeaderClient, StartOptions};
use crate::{
    config::EngineConfig,
    error::{Error, Result},
    node_record::NodeRecord,
};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);
const EXIT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Runs the engine daemon as a child process and drives it through its HTTP
/// admin endpoint.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    config: EngineConfig,
    client: Client,
    logger: slog::Logger,
}

impl ProcessEngine {
    pub fn new(config: EngineConfig, request_timeout: Duration, logger: slog::Logger) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            config,
            client,
            logger,
        })
    }
}

#[async_trait]
impl ConsensusEngine for ProcessEngine {
    type Node = ProcessNode;

    async fn reconfigure_offline(&self, data_dir: &Path, records: &[NodeRecord]) -> Result<()> {
        let mut command = Command::new(&self.config.binary);
        command.arg("reconfigure").arg("--data-dir").arg(data_dir);
        for record in records {
            command.arg("--node").arg(node_arg(record));
        }

        slog::info!(self.logger, "Reconfiguring engine membership offline";
            "data_dir" => %data_dir.display(), "members" => records.len());

        let output = command
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                Error::Reconfiguration(format!("can't run {}: {}", self.config.binary, e))
            })?;

        if !output.status.success() {
            return Err(Error::Reconfiguration(format!(
                "{} reconfigure exited with {}: {}",
                self.config.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn start(&self, options: StartOptions) -> Result<ProcessNode> {
        let mut command = Command::new(&self.config.binary);
        command
            .arg("serve")
            .arg("--data-dir")
            .arg(&options.data_dir)
            .arg("--address")
            .arg(&options.address)
            .arg("--admin-address")
            .arg(format!("0.0.0.0:{}", self.config.admin_port));
        if !options.peers.is_empty() {
            command.arg("--join").arg(options.peers.join(","));
        }
        command.args(&self.config.extra_args).kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| Error::Engine(format!("can't start {}: {}", self.config.binary, e)))?;

        slog::info!(self.logger, "Engine process started";
            "pid" => child.id(), "address" => &options.address, "peers" => options.peers.join(","));

        Ok(ProcessNode {
            child: Mutex::new(child),
            admin_url: format!("http://127.0.0.1:{}", self.config.admin_port),
            admin_port: self.config.admin_port,
            client: self.client.clone(),
            logger: self.logger.clone(),
        })
    }
}

#[derive(Debug)]
pub struct ProcessNode {
    child: Mutex<Child>,
    admin_url: String,
    admin_port: u16,
    client: Client,
    logger: slog::Logger,
}

impl ProcessNode {
    async fn post(&self, path: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}{}", self.admin_url, path))
            .send()
            .await?;
        check_status(response, path).await?;
        Ok(())
    }

    async fn exited(&self) -> Result<bool> {
        Ok(self.child.lock().await.try_wait()?.is_some())
    }
}

#[async_trait]
impl EngineNode for ProcessNode {
    type Leader = ProcessLeader;

    async fn ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.exited().await? {
                return Err(Error::Engine(
                    "engine process exited before becoming ready".to_owned(),
                ));
            }

            match self
                .client
                .get(format!("{}/readyz", self.admin_url))
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    slog::debug!(self.logger, "Engine is not ready yet"; "status" => %response.status())
                }
                Err(err) => slog::debug!(self.logger, "Engine is not ready yet"; "error" => %err),
            }

            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "engine is not ready after {:?}",
                    timeout
                )));
            }
            time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn leader(&self) -> Result<ProcessLeader> {
        let response = self
            .client
            .get(format!("{}/leader", self.admin_url))
            .send()
            .await?;
        let leader: LeaderInfo = check_status(response, "/leader").await?.json().await?;

        if leader.address.is_empty() {
            return Err(Error::Engine("the group has no leader".to_owned()));
        }

        Ok(ProcessLeader {
            admin_url: admin_url_of(&leader.address, self.admin_port),
            address: leader.address,
            client: self.client.clone(),
        })
    }

    async fn flush(&self) -> Result<()> {
        self.post("/sync").await
    }

    async fn handover(&self) -> Result<()> {
        self.post("/handover").await
    }

    async fn close(&self) -> Result<()> {
        if let Err(err) = self.post("/shutdown").await {
            slog::warn!(self.logger, "Engine did not accept the shutdown request"; "error" => %err);
        }

        let mut child = self.child.lock().await;
        match time::timeout(EXIT_GRACE_PERIOD, child.wait()).await {
            Ok(status) => {
                let status = status?;
                slog::info!(self.logger, "Engine process exited"; "status" => %status);
            }
            Err(_) => {
                slog::warn!(self.logger, "Engine process did not exit in time, killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }
}

/// Admin client of the member currently leading the group.
#[derive(Debug, Clone)]
pub struct ProcessLeader {
    address: String,
    admin_url: String,
    client: Client,
}

#[async_trait]
impl LeaderClient for ProcessLeader {
    fn address(&self) -> &str {
        &self.address
    }

    async fn cluster(&self) -> Result<Vec<NodeRecord>> {
        let response = self
            .client
            .get(format!("{}/cluster", self.admin_url))
            .send()
            .await?;
        Ok(check_status(response, "/cluster").await?.json().await?)
    }

    async fn remove(&self, id: u64) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/cluster/remove", self.admin_url))
            .json(&RemoveArgs { id })
            .send()
            .await?;
        check_status(response, "/cluster/remove").await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct LeaderInfo {
    #[serde(rename = "Address", default)]
    address: String,
}

#[derive(Debug, Serialize)]
struct RemoveArgs {
    #[serde(rename = "ID")]
    id: u64,
}

async fn check_status(response: Response, path: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(Error::Engine(format!(
        "{} returned {}: {}",
        path,
        status,
        body.trim()
    )))
}

/// `ID=ADDRESS=ROLE`, with the role as its numeric code.
fn node_arg(record: &NodeRecord) -> String {
    format!(
        "{}={}={}",
        record.id,
        record.address,
        u8::from(record.role)
    )
}

/// Admin endpoint on the host of a member's peer address.
fn admin_url_of(peer_address: &str, admin_port: u16) -> String {
    let host = peer_address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(peer_address);
    format!("http://{}:{}", host, admin_port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{logger::discard_logger, node_record::NodeRole};

    fn engine(binary: &str) -> ProcessEngine {
        let config = EngineConfig {
            binary: binary.to_owned(),
            ..Default::default()
        };
        ProcessEngine::new(config, Duration::from_secs(1), discard_logger()).unwrap()
    }

    /// Script that records its arguments, one per line, next to itself.
    #[cfg(unix)]
    fn argv_recorder(dir: &std::path::Path) -> (String, std::path::PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("kvengine");
        let argv = dir.join("argv");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\n", argv.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script.to_string_lossy().into_owned(), argv)
    }

    #[test]
    fn test_node_arg_carries_role() {
        let record = NodeRecord::new("10.0.0.3:9001", NodeRole::StandBy);
        assert_eq!(
            node_arg(&record),
            format!("{}=10.0.0.3:9001=1", record.id)
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reconfigure_passes_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let (binary, argv) = argv_recorder(dir.path());
        let records = [
            NodeRecord::voter("10.0.0.9:9001"),
            NodeRecord::new("10.0.0.4:9001", NodeRole::Spare),
        ];

        engine(&binary)
            .reconfigure_offline(dir.path(), &records)
            .await
            .unwrap();

        let data_dir = dir.path().to_string_lossy().into_owned();
        let expected = vec![
            "reconfigure".to_owned(),
            "--data-dir".to_owned(),
            data_dir,
            "--node".to_owned(),
            format!("{}=10.0.0.9:9001=0", records[0].id),
            "--node".to_owned(),
            format!("{}=10.0.0.4:9001=2", records[1].id),
        ];
        let recorded: Vec<String> = std::fs::read_to_string(argv)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect();
        assert_eq!(recorded, expected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_passes_address_and_peers() {
        let dir = tempfile::tempdir().unwrap();
        let (binary, argv) = argv_recorder(dir.path());
        let options = StartOptions {
            data_dir: dir.path().join("db"),
            address: "10.0.0.2:9001".to_owned(),
            peers: vec!["10.0.0.3:9001".to_owned(), "10.0.0.4:9001".to_owned()],
        };

        let node = engine(&binary).start(options.clone()).await.unwrap();
        node.child.lock().await.wait().await.unwrap();

        let expected = vec![
            "serve".to_owned(),
            "--data-dir".to_owned(),
            options.data_dir.to_string_lossy().into_owned(),
            "--address".to_owned(),
            "10.0.0.2:9001".to_owned(),
            "--admin-address".to_owned(),
            "0.0.0.0:9002".to_owned(),
            "--join".to_owned(),
            "10.0.0.3:9001,10.0.0.4:9001".to_owned(),
        ];
        let recorded: Vec<String> = std::fs::read_to_string(argv)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect();
        assert_eq!(recorded, expected);
    }

    #[test]
    fn test_admin_url_of() {
        assert_eq!(admin_url_of("10.0.0.3:9001", 9002), "http://10.0.0.3:9002");
        assert_eq!(admin_url_of("[fd00::3]:9001", 9002), "http://[fd00::3]:9002");
    }

    #[tokio::test]
    async fn test_reconfigure_with_missing_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = engine("/nonexistent/kvengine")
            .reconfigure_offline(dir.path(), &[NodeRecord::voter("10.0.0.9:9001")])
            .await;

        assert!(matches!(result, Err(Error::Reconfiguration(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reconfigure_maps_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let records = [NodeRecord::voter("10.0.0.9:9001")];

        assert!(engine("true")
            .reconfigure_offline(dir.path(), &records)
            .await
            .is_ok());
        assert!(matches!(
            engine("false").reconfigure_offline(dir.path(), &records).await,
            Err(Error::Reconfiguration(_))
        ));
    }
}
