//! Command-line interface and config assembly.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use pricecap_core::ControllerConfig;

#[derive(Parser, Debug)]
#[command(
    name = "pricecapd",
    about = "Game-theoretic CPU share controller for service-level-aware VMs"
)]
pub struct Cli {
    /// TOML config file; flags given on the command line win over it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// libvirt connection URI.
    #[arg(long, global = true)]
    pub virsh_uri: Option<String>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the controller.
    Run(RunArgs),

    /// List running domains with their scheduler parameters.
    List {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Set the cap of a single domain by hand.
    SetCap {
        /// Domain to control.
        #[arg(long)]
        vm: String,

        /// Cap in units of 1/100 CPU.
        #[arg(long)]
        cap: u32,
    },
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// UDP port to receive performance reports on.
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to bind.
    #[arg(long)]
    pub listen_address: Option<IpAddr>,

    /// Control interval in seconds.
    #[arg(long)]
    pub interval: Option<f64>,

    /// Learning rate of the price update.
    #[arg(long)]
    pub epsilon: Option<f64>,

    /// Physical CPUs available for allocation to VMs.
    #[arg(long)]
    pub ncpus: Option<u32>,

    /// Bridge used for IP-to-MAC resolution.
    #[arg(long)]
    pub bridge: Option<String>,

    /// Domain excluded from allocation.
    #[arg(long, conflicts_with = "no_privileged_domain")]
    pub privileged_domain: Option<String>,

    /// Do not exclude any domain.
    #[arg(long)]
    pub no_privileged_domain: bool,

    /// Kernel address-resolution table.
    #[arg(long)]
    pub arp_table: Option<PathBuf>,
}

impl Cli {
    /// Defaults, then the config file, then command-line overrides.
    pub fn load_config(&self) -> anyhow::Result<ControllerConfig> {
        let mut config = match &self.config {
            Some(path) => ControllerConfig::from_file(path)
                .map_err(|e| anyhow::anyhow!("load config {}: {e}", path.display()))?,
            None => ControllerConfig::default(),
        };

        if let Some(uri) = &self.virsh_uri {
            config.virsh_uri = Some(uri.clone());
        }
        if let Command::Run(args) = &self.command {
            args.apply(&mut config);
        }

        config.validate()?;
        Ok(config)
    }
}

impl RunArgs {
    fn apply(&self, config: &mut ControllerConfig) {
        if let Some(port) = self.port {
            config.listen_port = port;
        }
        if let Some(addr) = self.listen_address {
            config.listen_address = addr;
        }
        if let Some(interval) = self.interval {
            config.control_interval_secs = interval;
        }
        if let Some(epsilon) = self.epsilon {
            config.epsilon = epsilon;
        }
        if let Some(ncpus) = self.ncpus {
            config.ncpus = ncpus;
        }
        if let Some(bridge) = &self.bridge {
            config.bridge = bridge.clone();
        }
        if let Some(domain) = &self.privileged_domain {
            config.privileged_domain = Some(domain.clone());
        }
        if self.no_privileged_domain {
            config.privileged_domain = None;
        }
        if let Some(path) = &self.arp_table {
            config.arp_table = path.clone();
        }
    }
}
