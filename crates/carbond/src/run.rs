//! `carbond run`: wires the subsystems together and drives one experiment.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Args;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use carbon_core::{ExperimentConfig, IntensitySnapshot, parse_duration};
use carbon_kube::{KubeClient, KubeSettings, PodTemplate};
use carbon_scheduler::{
    DecisionLogger, ExperimentScheduler, Orchestrator, PlacementObserver, SchedulerSettings,
    WorkloadSettings, WorkloadSubmitter,
};
use carbon_signal::{HttpIntensityProvider, IntensityProvider, StaticIntensityProvider};

use crate::dry_run::SimulatedCluster;

const PLACEMENT_BUFFER: usize = 256;

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Path to carbond.toml.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Scheduling period, e.g. "10s" or "2m".
    #[arg(long)]
    pub period: Option<String>,

    /// Total number of cycles.
    #[arg(long)]
    pub cycles: Option<u32>,

    /// Share of cycles run carbon-aware, between 0 and 1.
    #[arg(long)]
    pub carbon_aware_fraction: Option<f64>,

    /// Carbon intensity endpoint.
    #[arg(long)]
    pub signal_url: Option<String>,

    /// Directory for the per-phase decision logs.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Kubernetes API base URL, http:// (e.g. kubectl proxy) or https://.
    #[arg(long)]
    pub api_url: Option<String>,

    /// Pod template (JSON).
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Fixed intensities instead of the endpoint, e.g. "DE=412,ERCOT=380,NL=290".
    #[arg(long)]
    pub static_signal: Option<String>,

    /// Place workloads on a simulated cluster instead of Kubernetes.
    #[arg(long)]
    pub dry_run: bool,

    /// How long to keep recording placements after the last cycle.
    #[arg(long, default_value = "60s")]
    pub drain: String,
}

impl RunArgs {
    /// Command-line values take precedence over file and environment.
    pub fn apply(&self, config: &mut ExperimentConfig) {
        if let Some(period) = &self.period {
            config.scheduler.period = period.clone();
        }
        if let Some(cycles) = self.cycles {
            config.scheduler.total_cycles = cycles;
        }
        if let Some(fraction) = self.carbon_aware_fraction {
            config.scheduler.carbon_aware_fraction = fraction;
        }
        if let Some(url) = &self.signal_url {
            config.signal.url = url.clone();
        }
        if let Some(dir) = &self.log_dir {
            config.log.dir = dir.clone();
        }
        if let Some(url) = &self.api_url {
            config.cluster.api_url = url.clone();
        }
        if let Some(template) = &self.template {
            config.workload.template = template.clone();
        }
    }
}

/// Parse `REGION=VALUE[,REGION=VALUE...]`.
pub fn parse_static_signal(spec: &str) -> anyhow::Result<IntensitySnapshot> {
    let mut snapshot = IntensitySnapshot::new();
    for term in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let Some((region, value)) = term.split_once('=') else {
            bail!("expected REGION=VALUE, got {term:?}");
        };
        let intensity: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("intensity for {region} is not a number"))?;
        if !intensity.is_finite() || intensity < 0.0 {
            bail!("intensity for {region} must be non-negative, got {intensity}");
        }
        snapshot.insert(region.trim().to_string(), intensity);
    }
    if snapshot.is_empty() {
        bail!("static signal has no regions");
    }
    Ok(snapshot)
}

fn read_token(config: &ExperimentConfig) -> anyhow::Result<Option<String>> {
    let Some(path) = config.token_file() else {
        return Ok(None);
    };
    let token = std::fs::read_to_string(path)
        .with_context(|| format!("reading token file {}", path.display()))?;
    Ok(Some(token.trim().to_string()))
}

pub async fn execute(args: RunArgs, mut config: ExperimentConfig) -> anyhow::Result<()> {
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let nodes = config.node_region_map()?;
    let drain = parse_duration(&args.drain)
        .with_context(|| format!("invalid --drain duration {:?}", args.drain))?;

    info!(
        cycles = config.scheduler.total_cycles,
        period = %config.scheduler.period,
        nodes = nodes.len(),
        dry_run = args.dry_run,
        "carbond starting"
    );

    // ── Subsystems ─────────────────────────────────────────────

    let logger = Arc::new(
        DecisionLogger::open(
            &config.log.dir,
            &config.log.carbon_aware_file,
            &config.log.baseline_file,
        )
        .with_context(|| format!("opening decision logs in {}", config.log.dir.display()))?,
    );
    info!(dir = %config.log.dir.display(), "decision logs opened");

    let provider: Arc<dyn IntensityProvider> = match &args.static_signal {
        Some(spec) => {
            let snapshot = parse_static_signal(spec).context("invalid --static-signal")?;
            info!(regions = snapshot.len(), "using static intensity signal");
            Arc::new(StaticIntensityProvider::new(snapshot))
        }
        None => {
            let provider = HttpIntensityProvider::new(&config.signal.url)?;
            info!(url = %provider.url(), "using HTTP intensity signal");
            Arc::new(provider)
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (events_tx, events_rx) = mpsc::channel(PLACEMENT_BUFFER);

    let mut watch_handle: Option<JoinHandle<()>> = None;
    let orchestrator: Arc<dyn Orchestrator> = if args.dry_run {
        let names = nodes.iter().map(|(node, _)| node.to_string()).collect();
        Arc::new(SimulatedCluster::new(names, events_tx))
    } else {
        let template = PodTemplate::from_file(
            &config.workload.template,
            &config.workload.exec_time_env,
        )?;
        let settings = KubeSettings {
            api_url: config.cluster.api_url.clone(),
            namespace: config.workload.namespace.clone(),
            label_selector: config.cluster.label_selector.clone(),
            token: read_token(&config)?,
            ca_file: config.ca_file().map(PathBuf::from),
        };
        let client = KubeClient::new(&settings, template)?;
        let watcher = client.watcher(config.watch_retry()?);
        watch_handle = Some(tokio::spawn(watcher.run(events_tx, shutdown_rx.clone())));
        info!(api = %settings.api_url, namespace = %settings.namespace, "kubernetes client ready");
        Arc::new(client)
    };

    let submitter = Arc::new(WorkloadSubmitter::new(
        orchestrator,
        WorkloadSettings {
            name_prefix: config.workload.name_prefix.clone(),
            exec_time_secs: config.workload.exec_time_min..=config.workload.exec_time_max,
            hint_weight: config.workload.hint_weight,
        },
    ));

    let scheduler = ExperimentScheduler::new(
        SchedulerSettings {
            period: config.period()?,
            total_cycles: config.scheduler.total_cycles,
            carbon_aware_fraction: config.scheduler.carbon_aware_fraction,
        },
        provider,
        nodes,
        submitter,
        logger.clone(),
    );

    // ── Background tasks ───────────────────────────────────────

    let observer = PlacementObserver::new(logger.clone());
    let observer_shutdown = shutdown_rx.clone();
    let observer_handle =
        tokio::spawn(async move { observer.run(events_rx, observer_shutdown).await });

    // ── Experiment ─────────────────────────────────────────────

    let summary = {
        let run = scheduler.run(shutdown_rx.clone());
        tokio::pin!(run);
        tokio::select! {
            summary = &mut run => summary,
            Ok(()) = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
                run.await
            }
        }
    };

    info!(
        cycles = summary.cycles,
        accepted = summary.accepted,
        rejected = summary.rejected,
        failed = summary.failed,
        interrupted = summary.interrupted,
        "experiment finished"
    );

    if !summary.interrupted && !drain.is_zero() {
        info!(?drain, "recording late placements");
        tokio::select! {
            _ = tokio::time::sleep(drain) => {}
            Ok(()) = tokio::signal::ctrl_c() => info!("shutdown signal received"),
        }
    }

    // The observer records what is still queued before it exits.
    drop(scheduler);
    let _ = shutdown_tx.send(true);
    if let Some(handle) = watch_handle {
        let _ = handle.await;
    }
    let observed = observer_handle.await.unwrap_or(0);

    let write_failures = logger.write_failures();
    if write_failures > 0 {
        warn!(write_failures, "some decision records could not be written");
    }
    info!(placements = observed, "carbond stopped");
    Ok(())
}
