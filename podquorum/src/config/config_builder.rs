use super::{Config, EngineConfig};

#[derive(Clone, Debug, Default)]
pub struct ConfigBuilder {
    pub(crate) config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    pub fn data_dir(mut self, data_dir: String) -> Self {
        self.config.data_dir = data_dir;
        self
    }

    pub fn peer_port(mut self, port: u16) -> Self {
        self.config.peer_port = port;
        self
    }

    pub fn label_key(mut self, key: String) -> Self {
        self.config.label_key = key;
        self
    }

    pub fn label_value(mut self, value: String) -> Self {
        self.config.label_value = Some(value);
        self
    }

    pub fn pod_name(mut self, name: String) -> Self {
        self.config.pod_name = Some(name);
        self
    }

    pub fn namespace(mut self, namespace: String) -> Self {
        self.config.namespace = Some(namespace);
        self
    }

    pub fn watch_interval(mut self, interval: f32) -> Self {
        self.config.watch_interval = interval;
        self
    }

    pub fn query_timeout(mut self, timeout: f32) -> Self {
        self.config.query_timeout = timeout;
        self
    }

    pub fn self_address_timeout(mut self, timeout: f32) -> Self {
        self.config.self_address_timeout = timeout;
        self
    }

    pub fn self_address_poll_interval(mut self, interval: f32) -> Self {
        self.config.self_address_poll_interval = interval;
        self
    }

    pub fn dial_timeout(mut self, timeout: f32) -> Self {
        self.config.dial_timeout = timeout;
        self
    }

    pub fn ready_timeout(mut self, timeout: f32) -> Self {
        self.config.ready_timeout = timeout;
        self
    }

    pub fn registry_request_timeout(mut self, timeout: f32) -> Self {
        self.config.registry_request_timeout = timeout;
        self
    }

    pub fn eviction_threshold(mut self, threshold: u32) -> Self {
        self.config.eviction_threshold = threshold;
        self
    }

    pub fn engine_binary(mut self, binary: String) -> Self {
        self.config.engine.binary = binary;
        self
    }

    pub fn engine_admin_port(mut self, port: u16) -> Self {
        self.config.engine.admin_port = port;
        self
    }

    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.config.engine = engine;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
