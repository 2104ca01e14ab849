//! pricecapd: the pricecap daemon.
//!
//! Shares the host's CPUs among its VMs. Guests report a normalized
//! performance score over UDP; every control interval the allocator turns
//! the reports into new virtual prices and pushes the resulting caps to
//! libvirt.
//!
//! # Usage
//!
//! ```text
//! pricecapd run --port 2712 --interval 5 --ncpus 4 --bridge virbr0
//! pricecapd list --json
//! pricecapd set-cap --vm web-1 --cap 150
//! ```

mod cli;
mod control_loop;

use anyhow::Context;
use clap::Parser;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pricecap_allocator::Allocator;
use pricecap_backend::{ActuationGateway, VirshBackend, VirtBackend};
use pricecap_core::ControllerConfig;
use pricecap_telemetry::{ArpTable, TelemetryListener};

use crate::cli::{Cli, Command, LogFormat};
use crate::control_loop::ControlLoop;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = cli.load_config()?;
    let gateway = ActuationGateway::new(
        VirshBackend::new(config.virsh_uri.clone()),
        config.privileged_domain.clone(),
    );

    match cli.command {
        Command::Run(_) => run_controller(config, gateway).await,
        Command::List { json } => list_domains(&gateway, json).await,
        Command::SetCap { vm, cap } => set_cap(&gateway, &vm, cap).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pricecapd=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run_controller<B: VirtBackend>(
    config: ControllerConfig,
    gateway: ActuationGateway<B>,
) -> anyhow::Result<()> {
    info!(
        port = config.listen_port,
        interval_secs = config.control_interval_secs,
        epsilon = config.epsilon,
        platform_size = config.platform_size(),
        bridge = %config.bridge,
        privileged = ?config.privileged_domain,
        "pricecap controller starting"
    );

    // ── Startup checks ─────────────────────────────────────────

    let domains = gateway
        .backend()
        .list_domains()
        .await
        .context("cannot reach the hypervisor")?;
    info!(domains = domains.len(), "hypervisor reachable");

    let addr = config.listen_addr();
    let socket = UdpSocket::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(%addr, "listening for performance reports");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    // ── Control loop ───────────────────────────────────────────

    let listener = TelemetryListener::new(ArpTable::new(&config.arp_table, &config.bridge));
    let mut control = ControlLoop::new(
        socket,
        gateway,
        listener,
        Allocator::from_config(&config),
        config.control_interval(),
        config.max_message_size,
    );
    control.run(shutdown_rx).await;

    info!(
        epochs = control.epochs(),
        priced_vms = control.prices().len(),
        "pricecap controller stopped"
    );
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn list_domains<B: VirtBackend>(
    gateway: &ActuationGateway<B>,
    json: bool,
) -> anyhow::Result<()> {
    let backend = gateway.backend();
    let domains = backend
        .list_domains()
        .await
        .context("cannot list domains")?;

    let mut rows = Vec::with_capacity(domains.len());
    for name in domains {
        let params = match backend.scheduler_params(&name).await {
            Ok(params) => params,
            Err(e) => {
                warn!(domain = %name, error = %e, "cannot read scheduler parameters");
                Vec::new()
            }
        };
        let privileged = gateway.privileged_domain() == Some(name.as_str());
        rows.push((name, privileged, params));
    }

    if json {
        let out: Vec<serde_json::Value> = rows
            .iter()
            .map(|(name, privileged, params)| {
                let params: serde_json::Map<String, serde_json::Value> = params
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                    .collect();
                serde_json::json!({
                    "name": name,
                    "privileged": privileged,
                    "scheduler": params,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Currently running VMs");
        for (name, privileged, params) in &rows {
            let marker = if *privileged { " (privileged)" } else { "" };
            let fields: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
            println!("- {name}{marker} {}", fields.join(" "));
        }
    }
    Ok(())
}

async fn set_cap<B: VirtBackend>(
    gateway: &ActuationGateway<B>,
    vm: &str,
    cap: u32,
) -> anyhow::Result<()> {
    if gateway.privileged_domain() == Some(vm) {
        warn!(%vm, "capping the privileged domain");
    }
    let units = gateway
        .apply_cap(vm, f64::from(cap))
        .await
        .with_context(|| format!("cannot set cap of {vm}"))?;
    info!(%vm, cap = units, "cap applied");

    let params = gateway.backend().scheduler_params(vm).await?;
    let fields: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
    println!("New scheduling parameters: {}", fields.join(" "));
    Ok(())
}
