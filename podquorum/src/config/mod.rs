use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::error::{Error, Result};
pub mod config_builder;

pub const SERVICE_HOST_ENV: &str = "KUBERNETES_SERVICE_HOST";
pub const SERVICE_PORT_ENV: &str = "KUBERNETES_SERVICE_PORT";

/// Location of the Kubernetes API server, as injected into every pod.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Environment {
    pub service_host: String,
    pub service_port: String,
}

impl Environment {
    pub fn detect() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    Error::Config(format!(
                        "not running inside a Kubernetes cluster ({} is not set)",
                        key
                    ))
                })
        };

        Ok(Self {
            service_host: get(SERVICE_HOST_ENV)?,
            service_port: get(SERVICE_PORT_ENV)?,
        })
    }

    pub fn api_server_url(&self) -> String {
        if self.service_host.contains(':') {
            format!("https://[{}]:{}", self.service_host, self.service_port)
        } else {
            format!("https://{}:{}", self.service_host, self.service_port)
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub(crate) binary: String,
    pub(crate) admin_port: u16,
    pub(crate) extra_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: String::from("kvengine"),
            admin_port: 9002,
            extra_args: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn admin_port(&self) -> u16 {
        self.admin_port
    }

    pub fn extra_args(&self) -> &[String] {
        &self.extra_args
    }
}

// NOTE: Durations are stored as seconds.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub(crate) data_dir: String,
    pub(crate) peer_port: u16,
    pub(crate) label_key: String,
    pub(crate) label_value: Option<String>,
    pub(crate) pod_name: Option<String>,
    pub(crate) namespace: Option<String>,
    pub(crate) watch_interval: f32,
    pub(crate) query_timeout: f32,
    pub(crate) self_address_timeout: f32,
    pub(crate) self_address_poll_interval: f32,
    pub(crate) dial_timeout: f32,
    pub(crate) ready_timeout: f32,
    pub(crate) registry_request_timeout: f32,
    pub(crate) eviction_threshold: u32,
    pub(crate) engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: String::from("/app/db"),
            peer_port: 9001,
            label_key: String::from("app"),
            label_value: None,
            pod_name: None,
            namespace: None,
            watch_interval: 60.0,
            query_timeout: 10.0,
            self_address_timeout: 5.0,
            self_address_poll_interval: 1.0,
            dial_timeout: 1.0,
            ready_timeout: 60.0,
            registry_request_timeout: 5.0,
            eviction_threshold: 1,
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.is_empty() {
            return Err(Error::Config("data_dir should not be empty".to_owned()));
        }
        if self.label_key.is_empty() {
            return Err(Error::Config("label_key should not be empty".to_owned()));
        }
        if self.peer_port == 0 {
            return Err(Error::Config("peer_port should not be 0".to_owned()));
        }
        if self.eviction_threshold == 0 {
            return Err(Error::Config(
                "eviction_threshold should be at least 1".to_owned(),
            ));
        }

        let durations = [
            ("watch_interval", self.watch_interval),
            ("query_timeout", self.query_timeout),
            ("self_address_timeout", self.self_address_timeout),
            ("self_address_poll_interval", self.self_address_poll_interval),
            ("dial_timeout", self.dial_timeout),
            ("ready_timeout", self.ready_timeout),
            ("registry_request_timeout", self.registry_request_timeout),
        ];
        for (name, secs) in durations {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(Error::Config(format!("{} should be positive", name)));
            }
        }

        Ok(())
    }

    pub fn data_dir(&self) -> &str {
        &self.data_dir
    }

    pub fn peer_port(&self) -> u16 {
        self.peer_port
    }

    pub fn label_key(&self) -> &str {
        &self.label_key
    }

    pub fn label_value(&self) -> Option<&str> {
        self.label_value.as_deref()
    }

    pub fn pod_name(&self) -> Option<&str> {
        self.pod_name.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs_f32(self.watch_interval)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.query_timeout)
    }

    pub fn self_address_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.self_address_timeout)
    }

    pub fn self_address_poll_interval(&self) -> Duration {
        Duration::from_secs_f32(self.self_address_poll_interval)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.dial_timeout)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.ready_timeout)
    }

    pub fn registry_request_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.registry_request_timeout)
    }

    pub fn eviction_threshold(&self) -> u32 {
        self.eviction_threshold
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("can't read {}: {}", path.display(), e)))?;
    Ok(toml::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_environment_requires_both_variables() {
        let mut vars = HashMap::new();
        vars.insert(SERVICE_HOST_ENV, "10.96.0.1".to_owned());
        assert!(matches!(
            Environment::from_lookup(|key| vars.get(key).cloned()),
            Err(Error::Config(_))
        ));

        vars.insert(SERVICE_PORT_ENV, "443".to_owned());
        let env = Environment::from_lookup(|key| vars.get(key).cloned()).unwrap();
        assert_eq!(env.api_server_url(), "https://10.96.0.1:443");
    }

    #[test]
    fn test_api_server_url_brackets_ipv6() {
        let env = Environment {
            service_host: "fd00::1".to_owned(),
            service_port: "443".to_owned(),
        };
        assert_eq!(env.api_server_url(), "https://[fd00::1]:443");
    }

    #[test]
    fn test_load_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("podquorum.toml");
        fs::write(
            &path,
            "data_dir = \"/var/lib/kv\"\nwatch_interval = 30.0\neviction_threshold = 2\n\n[engine]\nadmin_port = 7000\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.data_dir(), "/var/lib/kv");
        assert_eq!(config.watch_interval(), Duration::from_secs(30));
        assert_eq!(config.eviction_threshold(), 2);
        assert_eq!(config.engine().admin_port(), 7000);
        assert_eq!(config.engine().binary(), "kvengine");
        assert_eq!(config.peer_port(), 9001);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let config = Config {
            eviction_threshold: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
