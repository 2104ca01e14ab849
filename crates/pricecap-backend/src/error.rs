//! Error types for the virtualization backend.

use pricecap_core::MacAddr;
use thiserror::Error;

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur while talking to the hypervisor.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("domain not found: {0}")]
    DomainNotFound(String),

    #[error("no domain with hardware address {0}")]
    NoDomainWithMac(MacAddr),

    #[error("unexpected backend output: {0}")]
    Parse(String),

    #[error("backend rejected {param} for {domain}: {reason}")]
    Rejected {
        domain: String,
        param: String,
        reason: String,
    },
}
