#[macro_use]
extern crate async_trait;

mod agent;
mod bootstrap;
mod config;
mod error;
mod membership_store;
mod node_id;
mod node_record;
mod rebinder;
mod watcher;

pub mod engine;
pub mod logger;
pub mod registry;

pub use async_trait::async_trait;

pub use crate::{
    agent::{Agent, RunningAgent},
    bootstrap::{BootstrapPath, BootstrapPlan, ClusterBootstrap},
    config::{config_builder::ConfigBuilder, load_config, Config, EngineConfig, Environment},
    engine::{ConsensusEngine, EngineNode, LeaderClient, StartOptions},
    error::{Error, Result},
    membership_store::{MembershipStore, CLUSTER_FILE, INFO_FILE},
    node_id::generate_id,
    node_record::{NodeRecord, NodeRole},
    rebinder::{AddressRebinder, RebindOutcome},
    registry::{LabelSelector, LiveSnapshot, PodInfo, PodRegistry},
    watcher::{find_missing, MembershipWatcher, TickReport},
};
