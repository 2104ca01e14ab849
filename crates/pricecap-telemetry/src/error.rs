//! Telemetry error types. None of these are fatal; the offending report
//! is dropped.

use std::net::IpAddr;

use pricecap_backend::BackendError;
use thiserror::Error;

pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("empty payload")]
    EmptyPayload,

    #[error("payload is not a number: {0:?}")]
    Malformed(String),

    #[error("no hardware address for {ip} on {device}")]
    NoHardwareAddress { ip: IpAddr, device: String },

    #[error("address resolution is only available for IPv4, got {0}")]
    Unsupported(IpAddr),

    #[error("failed to read address table {path}: {source}")]
    Table {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend lookup failed: {0}")]
    Lookup(#[from] BackendError),
}
