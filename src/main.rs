//! vSphere CSI Driver Operator
//!
//! Runs the compatibility gate for the vSphere CSI driver. A sync is
//! triggered periodically and on every CSIDriver, CSINode or Node change;
//! health and metrics endpoints are served alongside.

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::storage::v1::{CSIDriver, CSINode};
use kube::runtime::watcher;
use kube::{Api, Client};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use vsphere_csi_operator::domain::ports::{
    ClusterStateReaderRef, ConnectionProviderRef, OperatorStatusClientRef,
};
use vsphere_csi_operator::{
    CheckSet, CompositeChecker, ControllerPorts, DriverPresence, EnvironmentChecker, Error,
    ErrorAction, ErrorMetricRecorder, InMemoryClusterState, InMemoryStatusClient,
    KubeClusterState, KubeStatusClient, NodeInfo, OperandSwitch, OperatorConfig, OperatorStatus,
    Result, SimulatedVCenter, SkippingChecker, StaticConnectionProvider, VSphereController,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// vSphere CSI Driver Operator - environment compatibility gate
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Operator configuration file (YAML)
    #[arg(long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Prefix of the conditions written by the controller
    #[arg(long, env = "CONTROLLER_NAME")]
    controller_name: Option<String>,

    /// ClusterCSIDriver object holding the operator status
    #[arg(long, env = "CLUSTER_CSI_DRIVER")]
    cluster_csi_driver: Option<String>,

    /// Seconds between checks while the environment passes
    #[arg(long, env = "RECHECK_INTERVAL_SECS")]
    recheck_interval_secs: Option<u64>,

    /// Seconds before the first recheck after a failed check
    #[arg(long, env = "FAILURE_INITIAL_DELAY_SECS")]
    failure_initial_delay_secs: Option<u64>,

    /// Seconds between periodic syncs
    #[arg(long, env = "RESYNC_INTERVAL_SECS")]
    resync_interval_secs: Option<u64>,

    /// Minimum supported vCenter version
    #[arg(long, env = "MIN_VCENTER_VERSION")]
    min_vcenter_version: Option<String>,

    /// Minimum supported ESXi version
    #[arg(long, env = "MIN_ESXI_VERSION")]
    min_esxi_version: Option<String>,

    /// Minimum supported VM hardware version (vmx-N)
    #[arg(long, env = "MIN_HARDWARE_VERSION")]
    min_hardware_version: Option<String>,

    /// Never run the checks
    #[arg(long, env = "SKIP_CHECKS")]
    skip_checks: bool,

    /// Simulated vCenter host name
    #[arg(long, env = "VCENTER_HOST", default_value = "vcenter.local")]
    vcenter_host: String,

    /// Simulated vCenter version
    #[arg(long, env = "VCENTER_VERSION", default_value = "7.0.2")]
    vcenter_version: String,

    /// Simulated ESXi host version
    #[arg(long, env = "ESXI_VERSION", default_value = "7.0.2")]
    esxi_version: String,

    /// Simulated hardware version of every node VM
    #[arg(long, env = "VM_HARDWARE_VERSION", default_value = "vmx-15")]
    vm_hardware_version: String,

    /// Number of simulated nodes in standalone mode
    #[arg(long, env = "SIMULATED_NODES", default_value = "3")]
    simulated_nodes: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run in standalone mode (no Kubernetes)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = operator_config(&args)?;

    info!("Starting vSphere CSI Driver Operator");
    info!("  Version: {}", vsphere_csi_operator::VERSION);
    info!("  Controller: {}", config.controller_name);
    info!("  Driver: {}", config.requirements.driver_name);
    info!("  Recheck interval: {}s", config.recheck_interval_secs);
    info!("  Skip checks: {}", config.skip_checks);
    info!("  Standalone mode: {}", args.standalone);

    let shutdown = CancellationToken::new();
    let metrics = Arc::new(ErrorMetricRecorder::new()?);
    let ready = Arc::new(AtomicBool::new(false));

    // Start health server
    let health_addr = parse_addr(&args.health_addr, "health")?;
    let health_ready = ready.clone();
    let health_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, health_ready, health_shutdown).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = parse_addr(&args.metrics_addr, "metrics")?;
    let server_metrics = metrics.clone();
    let metrics_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, server_metrics, metrics_shutdown).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Shutdown on Ctrl-C
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal_shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    let (trigger_tx, trigger_rx) = mpsc::channel(1);
    let (cluster, status) = cluster_adapters(&args, &config, trigger_tx, &shutdown).await?;

    let vcenter = SimulatedVCenter::builder()
        .host_name(args.vcenter_host.clone())
        .vcenter_version(args.vcenter_version.clone())
        .host("esxi-0", args.esxi_version.clone())
        .default_hardware_version(args.vm_hardware_version.clone())
        .build();
    let connections: ConnectionProviderRef = Arc::new(StaticConnectionProvider::new(vcenter));

    let checker: Arc<dyn EnvironmentChecker> = if config.skip_checks {
        Arc::new(SkippingChecker)
    } else {
        Arc::new(CompositeChecker::new(CheckSet::default(), config.checker_config()))
    };

    let controller = VSphereController::new(
        config.controller_config(),
        ControllerPorts {
            cluster,
            connections,
            checker,
            status,
            operand: Arc::new(OperandSwitch::new()),
            metrics,
        },
    );

    run_sync_loop(&controller, config.resync_interval(), trigger_rx, &ready, &shutdown).await;

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration file values overridden by command line and environment
fn operator_config(args: &Args) -> Result<OperatorConfig> {
    let mut config = match &args.config {
        Some(path) => OperatorConfig::load(path)?,
        None => OperatorConfig::default(),
    };

    if let Some(name) = &args.controller_name {
        config.controller_name = name.clone();
    }
    if let Some(name) = &args.cluster_csi_driver {
        config.cluster_csi_driver = name.clone();
    }
    if let Some(secs) = args.recheck_interval_secs {
        config.recheck_interval_secs = secs;
    }
    if let Some(secs) = args.failure_initial_delay_secs {
        config.failure_initial_delay_secs = secs;
    }
    if let Some(secs) = args.resync_interval_secs {
        config.resync_interval_secs = secs;
    }
    if let Some(version) = &args.min_vcenter_version {
        config.requirements.minimum_vcenter_version = version.parse()?;
    }
    if let Some(version) = &args.min_esxi_version {
        config.requirements.minimum_esxi_version = version.parse()?;
    }
    if let Some(version) = &args.min_hardware_version {
        config.requirements.minimum_hardware_version = version.parse()?;
    }
    config.skip_checks |= args.skip_checks;

    config.validate()?;
    Ok(config)
}

fn parse_addr(addr: &str, server: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} server address {}: {}", server, addr, e)))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => args.log_level.to_lowercase(),
        _ => "info".to_string(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,kube=info", level)));

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Cluster Adapters
// =============================================================================

/// In-memory adapters in standalone mode, otherwise API server adapters
/// plus watchers feeding `trigger`
async fn cluster_adapters(
    args: &Args,
    config: &OperatorConfig,
    trigger: mpsc::Sender<()>,
    shutdown: &CancellationToken,
) -> Result<(ClusterStateReaderRef, OperatorStatusClientRef)> {
    if args.standalone {
        let nodes = (0..args.simulated_nodes)
            .map(|i| NodeInfo::new(format!("node-{}", i), Some(format!("vsphere://vm-{}", i))))
            .collect();
        let cluster: ClusterStateReaderRef =
            Arc::new(InMemoryClusterState::new(DriverPresence::default(), nodes));
        let status: OperatorStatusClientRef =
            Arc::new(InMemoryStatusClient::new(OperatorStatus::default()));
        return Ok((cluster, status));
    }

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    spawn_watchers(client.clone(), trigger, shutdown.clone());

    let cluster: ClusterStateReaderRef = Arc::new(KubeClusterState::new(client.clone()));
    let status: OperatorStatusClientRef =
        Arc::new(KubeStatusClient::new(client, config.cluster_csi_driver.clone()));
    Ok((cluster, status))
}

/// Watch the objects a sync reads and request a sync on every change
fn spawn_watchers(client: Client, trigger: mpsc::Sender<()>, shutdown: CancellationToken) {
    let drivers = watcher(Api::<CSIDriver>::all(client.clone()), watcher::Config::default())
        .map(|event| event.map(|_| ()).map_err(|e| e.to_string()))
        .boxed();
    let csi_nodes = watcher(Api::<CSINode>::all(client.clone()), watcher::Config::default())
        .map(|event| event.map(|_| ()).map_err(|e| e.to_string()))
        .boxed();
    let nodes = watcher(Api::<Node>::all(client), watcher::Config::default())
        .map(|event| event.map(|_| ()).map_err(|e| e.to_string()))
        .boxed();

    let mut events = futures::stream::select_all(vec![drivers, csi_nodes, nodes]);

    tokio::spawn(async move {
        info!("Cluster watchers started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.next() => match event {
                    // A full channel already holds a pending sync
                    Some(Ok(())) => {
                        let _ = trigger.try_send(());
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Watcher error, will retry");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    None => break,
                },
            }
        }
        debug!("Cluster watchers stopped");
    });
}

// =============================================================================
// Sync Loop
// =============================================================================

async fn run_sync_loop(
    controller: &VSphereController,
    resync_interval: Duration,
    mut triggers: mpsc::Receiver<()>,
    ready: &AtomicBool,
    shutdown: &CancellationToken,
) {
    let mut ticker = tokio::time::interval(resync_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut retry_backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_secs(5))
        .with_max_interval(resync_interval)
        .with_max_elapsed_time(None)
        .build();
    let mut retry_at: Option<Instant> = None;

    info!(controller = controller.name(), "Sync loop started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => debug!("Periodic resync"),
            Some(()) = triggers.recv() => debug!("Cluster change observed"),
            _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                debug!("Retrying failed sync");
            }
        }
        retry_at = None;

        match controller.sync(shutdown).await {
            Ok(()) => retry_backoff.reset(),
            Err(e) if !e.is_degrading() => {
                debug!(error = %e, "Sync interrupted");
                break;
            }
            Err(e) => match e.action() {
                ErrorAction::RequeueWithBackoff => {
                    let delay = retry_backoff.next_backoff().unwrap_or(resync_interval);
                    warn!(error = %e, retry_in_secs = delay.as_secs(), "Sync failed");
                    retry_at = Some(Instant::now() + delay);
                }
                ErrorAction::RequeueAfter(delay) => {
                    warn!(error = %e, recheck_in_secs = delay.as_secs(), "Driver degraded");
                    if !delay.is_zero() && delay < resync_interval {
                        retry_at = Some(Instant::now() + delay);
                    }
                }
                ErrorAction::NoRequeue => error!(error = %e, "Sync failed"),
            },
        }

        ready.store(true, Ordering::SeqCst);
    }

    info!("Sync loop stopped");
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: hyper::StatusCode, body: &'static str) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(hyper::Body::from(body));
    *response.status_mut() = status;
    response
}

async fn run_health_server(
    addr: SocketAddr,
    ready: Arc<AtomicBool>,
    shutdown: CancellationToken,
) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.load(Ordering::SeqCst);
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" if ready => text_response(StatusCode::OK, "ok"),
                        "/readyz" => text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    info!("Health server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Health server bind error: {}", e)))?
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<ErrorMetricRecorder>,
    shutdown: CancellationToken,
) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match metrics.encode() {
                            Ok(text) => {
                                let mut response = Response::new(Body::from(text));
                                response.headers_mut().insert(
                                    CONTENT_TYPE,
                                    HeaderValue::from_static("text/plain; version=0.0.4"),
                                );
                                response
                            }
                            Err(e) => {
                                error!(error = %e, "Failed to encode metrics");
                                text_response(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
                            }
                        },
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Metrics server bind error: {}", e)))?
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
