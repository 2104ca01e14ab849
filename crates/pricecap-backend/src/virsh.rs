//! libvirt backend driven through the `virsh` command-line tool.
//!
//! Every call spawns one `virsh` process and parses its text output. The
//! parsers are kept as free functions so they can be tested without a
//! hypervisor.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use pricecap_core::{MacAddr, VmName};

use crate::backend::{vcpus_for_cap, VirtBackend};
use crate::error::{BackendError, BackendResult};

/// Fragment virsh prints when a domain name does not resolve.
const DOMAIN_NOT_FOUND: &str = "failed to get domain";

/// Backend that shells out to `virsh`.
#[derive(Debug, Clone)]
pub struct VirshBackend {
    binary: PathBuf,
    uri: Option<String>,
}

impl VirshBackend {
    /// Create a backend using `virsh` from `PATH` and the given connection URI.
    pub fn new(uri: Option<String>) -> Self {
        Self {
            binary: PathBuf::from("virsh"),
            uri,
        }
    }

    /// Use a specific `virsh` binary.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Run `virsh <args>` and return its stdout.
    async fn run(&self, args: &[&str]) -> BackendResult<String> {
        let mut cmd = Command::new(&self.binary);
        if let Some(uri) = &self.uri {
            cmd.arg("-c").arg(uri);
        }
        cmd.args(args);

        let command = format!("virsh {}", args.join(" "));
        debug!(%command, "running virsh");

        let output = cmd.output().await.map_err(|source| BackendError::Spawn {
            command: command.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(BackendError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout)
            .map_err(|_| BackendError::Parse(format!("{command}: output is not UTF-8")))
    }

    /// Map a failed command on `domain` to `DomainNotFound` when virsh
    /// says so.
    fn classify(err: BackendError, domain: &str) -> BackendError {
        match err {
            BackendError::CommandFailed { ref stderr, .. } if stderr.contains(DOMAIN_NOT_FOUND) => {
                BackendError::DomainNotFound(domain.to_string())
            }
            other => other,
        }
    }
}

#[async_trait]
impl VirtBackend for VirshBackend {
    async fn list_domains(&self) -> BackendResult<Vec<VmName>> {
        let out = self.run(&["list", "--name"]).await?;
        Ok(parse_domain_list(&out))
    }

    async fn lookup_by_mac(&self, mac: &MacAddr) -> BackendResult<VmName> {
        for domain in self.list_domains().await? {
            let out = match self.run(&["domiflist", &domain]).await {
                Ok(out) => out,
                Err(e) => {
                    // Domain may have shut down since the listing.
                    debug!(%domain, error = %e, "skipping domain during mac lookup");
                    continue;
                }
            };
            if parse_primary_mac(&out) == Some(*mac) {
                return Ok(domain);
            }
        }
        Err(BackendError::NoDomainWithMac(*mac))
    }

    async fn set_capacity(&self, name: &str, cap: u32) -> BackendResult<()> {
        let vcpus = vcpus_for_cap(cap).to_string();
        if let Err(e) = self.run(&["setvcpus", name, &vcpus, "--live"]).await {
            match Self::classify(e, name) {
                not_found @ BackendError::DomainNotFound(_) => return Err(not_found),
                // Hot-unplug is not supported everywhere; the scheduler cap
                // alone still bounds the domain.
                other => warn!(domain = %name, vcpus = %vcpus, error = %other, "setvcpus failed"),
            }
        }

        let cap_param = format!("cap={cap}");
        self.run(&["schedinfo", name, "--set", &cap_param, "--live"])
            .await
            .map_err(|e| match Self::classify(e, name) {
                BackendError::CommandFailed { stderr, .. } => BackendError::Rejected {
                    domain: name.to_string(),
                    param: cap_param.clone(),
                    reason: stderr,
                },
                other => other,
            })?;
        Ok(())
    }

    async fn scheduler_params(&self, name: &str) -> BackendResult<Vec<(String, String)>> {
        let out = self
            .run(&["schedinfo", name])
            .await
            .map_err(|e| Self::classify(e, name))?;
        Ok(parse_schedinfo(&out))
    }
}

/// Parse `virsh list --name`: one domain per line, blank lines ignored.
pub fn parse_domain_list(output: &str) -> Vec<VmName> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Hardware address of the first interface listed by `virsh domiflist`.
///
/// The table has a header row and a dashed separator; the MAC address is
/// the last column of each data row.
pub fn parse_primary_mac(output: &str) -> Option<MacAddr> {
    output
        .lines()
        .map(str::trim)
        .skip_while(|l| !l.starts_with("---"))
        .skip(1)
        .find(|l| !l.is_empty())
        .and_then(|row| row.split_whitespace().last())
        .and_then(|mac| mac.parse().ok())
}

/// Parse `virsh schedinfo` lines of the form `field : value`.
pub fn parse_schedinfo(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let (field, value) = line.split_once(':')?;
            let field = field.trim();
            if field.is_empty() {
                return None;
            }
            Some((field.to_string(), value.trim().to_string()))
        })
        .collect()
}
