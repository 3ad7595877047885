use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Registry error: {0}")]
    Registry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid membership: {0}")]
    InvalidMembership(String),

    #[error("Membership reconfiguration failed, cause: `{0}`")]
    Reconfiguration(String),
    #[error("Failed to remove node {id} ({address}), cause: `{cause}`")]
    Removal {
        id: u64,
        address: String,
        cause: String,
    },
    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("HTTP error: `{0}`")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: `{0}`")]
    Json(#[from] serde_json::Error),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::Timeout(e.to_string())
    }
}
