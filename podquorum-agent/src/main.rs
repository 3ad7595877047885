mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

use clap::Parser;
use podquorum::{
    engine::ProcessEngine, load_config, logger::build_logger, registry::KubernetesRegistry,
    Agent, Config, ConfigBuilder, Environment, Error, Result,
};
use std::{path::PathBuf, process::ExitCode, sync::Arc};

#[derive(Debug, Parser)]
#[command(name = "podquorum-agent")]
#[command(version = built_info::PKG_VERSION)]
#[command(author = built_info::PKG_AUTHORS)]
#[command(about = built_info::PKG_DESCRIPTION)]
struct Options {
    /// TOML configuration file
    #[arg(long, env = "PODQUORUM_CONFIG")]
    config: Option<PathBuf>,
    /// Engine data directory
    #[arg(long)]
    data_dir: Option<String>,
    /// Port of the engine's peer protocol
    #[arg(long)]
    peer_port: Option<u16>,
    /// Label key grouping the pods of this workload
    #[arg(long)]
    label_key: Option<String>,
    /// Label value; read from the own pod when omitted
    #[arg(long)]
    label_value: Option<String>,
    #[arg(long, env = "HOSTNAME")]
    pod_name: Option<String>,
    #[arg(long, env = "POD_NAMESPACE")]
    namespace: Option<String>,
    /// Seconds between membership checks
    #[arg(long)]
    watch_interval: Option<f32>,
    /// Consecutive missing observations before a member is removed
    #[arg(long)]
    eviction_threshold: Option<u32>,
    #[arg(long)]
    engine_binary: Option<String>,
    #[arg(long)]
    engine_admin_port: Option<u16>,
}

impl Options {
    fn into_config(self) -> Result<Config> {
        let base = match &self.config {
            Some(path) => load_config(path)?,
            None => Config::default(),
        };

        let mut builder = ConfigBuilder::from_config(base);
        if let Some(data_dir) = self.data_dir {
            builder = builder.data_dir(data_dir);
        }
        if let Some(port) = self.peer_port {
            builder = builder.peer_port(port);
        }
        if let Some(key) = self.label_key {
            builder = builder.label_key(key);
        }
        if let Some(value) = self.label_value {
            builder = builder.label_value(value);
        }
        if let Some(name) = self.pod_name {
            builder = builder.pod_name(name);
        }
        if let Some(namespace) = self.namespace {
            builder = builder.namespace(namespace);
        }
        if let Some(interval) = self.watch_interval {
            builder = builder.watch_interval(interval);
        }
        if let Some(threshold) = self.eviction_threshold {
            builder = builder.eviction_threshold(threshold);
        }
        if let Some(binary) = self.engine_binary {
            builder = builder.engine_binary(binary);
        }
        if let Some(port) = self.engine_admin_port {
            builder = builder.engine_admin_port(port);
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    color_backtrace::install();
    let options = Options::parse();

    let logger = build_logger();
    match run(options, logger.clone()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            slog::crit!(logger, "podquorum-agent terminated"; "error" => %err);
            ExitCode::FAILURE
        }
    }
}

async fn run(options: Options, logger: slog::Logger) -> Result<()> {
    let env = Environment::detect()?;
    let config = options.into_config()?;
    let pod_name = config
        .pod_name()
        .ok_or_else(|| Error::Config("pod name is unknown, set HOSTNAME or --pod-name".to_owned()))?
        .to_owned();

    slog::info!(logger, "Starting podquorum-agent";
        "version" => built_info::PKG_VERSION, "pod" => &pod_name, "data_dir" => config.data_dir());

    let registry = Arc::new(KubernetesRegistry::in_cluster(
        &env,
        &pod_name,
        config.namespace(),
        config.registry_request_timeout(),
    )?);
    let engine = Arc::new(ProcessEngine::new(
        config.engine().clone(),
        config.query_timeout(),
        logger.clone(),
    )?);

    Agent::new(config, registry, engine, logger.clone())
        .run_until(shutdown_signal(logger))
        .await
}

#[cfg(unix)]
async fn shutdown_signal(logger: slog::Logger) {
    use tokio::signal::unix::{signal, SignalKind};

    // SIGABRT has no named constructor.
    const SIGABRT: i32 = 6;

    let (mut sigterm, mut sigquit, mut sigabrt) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
        signal(SignalKind::from_raw(SIGABRT)),
    ) {
        (Ok(sigterm), Ok(sigquit), Ok(sigabrt)) => (sigterm, sigquit, sigabrt),
        _ => {
            slog::warn!(logger, "Can't listen for termination signals, waiting for Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    let received = tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
        _ = sigabrt.recv() => "SIGABRT",
    };
    slog::info!(logger, "Received {} signal", received);
}

#[cfg(not(unix))]
async fn shutdown_signal(logger: slog::Logger) {
    let _ = tokio::signal::ctrl_c().await;
    slog::info!(logger, "Ctrl+C signal detected");
}
