//! bleephub server entrypoint.

use anyhow::Context;
use bleephub_api::{AppState, build_app};
use bleephub_scheduler::{
    ActionCache, GithubTarballSource, Scheduler, SchedulerConfig, SchedulerMetrics, Store,
};
use bleephub_trace::{TracingConfig, init_tracer, shutdown_tracer};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

mod config;
mod server;

use config::{Overrides, ServerConfig};

#[derive(Parser)]
#[command(name = "bleephub")]
#[command(author, version, about = "GitHub Actions control plane for self-hosted runners", long_about = None)]
struct Cli {
    /// Config file (YAML or TOML).
    #[arg(long, short, env = "BPH_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:5555.
    #[arg(long)]
    addr: Option<String>,

    /// PEM certificate; TLS is on when both cert and key are set.
    #[arg(long)]
    tls_cert: Option<PathBuf>,

    #[arg(long)]
    tls_key: Option<PathBuf>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            config_file: self.config.clone(),
            addr: self.addr.clone(),
            tls_cert: self.tls_cert.clone(),
            tls_key: self.tls_key.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let tracing_config = TracingConfig {
        json_logs: cli.json_logs,
        ..TracingConfig::from_env()
    };
    if let Err(e) = init_tracer(&tracing_config) {
        eprintln!("bleephub: {e}");
    }

    let result = run(&cli).await;
    shutdown_tracer();
    result
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = ServerConfig::load(&cli.overrides()).context("loading configuration")?;
    let addr: SocketAddr = config
        .addr
        .parse()
        .with_context(|| format!("invalid listen address {:?}", config.addr))?;

    let scheduler = Arc::new(Scheduler::new(
        Arc::new(Store::new()),
        Arc::new(SchedulerMetrics::new()),
        SchedulerConfig::from(&config),
    ));
    let source = GithubTarballSource::new(config.github_api_url.clone())?;
    let actions = Arc::new(ActionCache::new(Arc::new(source)));
    let tls = config.tls_files();

    let state = AppState::new(Arc::clone(&scheduler), actions).with_tls(tls.is_some());
    let app = build_app(Arc::new(state));

    let sweep = server::spawn_timeout_sweep(Arc::clone(&scheduler), config.timeout_sweep_interval());
    info!(
        max_concurrent_workflows = config.max_concurrent_workflows,
        default_image = %config.default_image,
        "bleephub starting"
    );

    let served = match tls {
        Some((cert, key)) => server::serve_tls(addr, app, cert, key).await,
        None => server::serve(addr, app).await,
    };
    sweep.abort();
    info!("bleephub stopped");
    served
}
