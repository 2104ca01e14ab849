//! Network address → hardware address, via the kernel neighbour table.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use pricecap_core::MacAddr;

use crate::error::{TelemetryError, TelemetryResult};

/// Maps a sender's network address to its hardware address.
pub trait AddressResolver {
    fn hardware_address(&self, ip: IpAddr) -> TelemetryResult<MacAddr>;
}

/// Reads `/proc/net/arp` (or a file in the same format) on every call,
/// only considering entries on one bridge device.
#[derive(Debug, Clone)]
pub struct ArpTable {
    path: PathBuf,
    device: String,
}

impl ArpTable {
    pub fn new(path: impl Into<PathBuf>, device: &str) -> Self {
        Self {
            path: path.into(),
            device: device.to_string(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl AddressResolver for ArpTable {
    fn hardware_address(&self, ip: IpAddr) -> TelemetryResult<MacAddr> {
        let IpAddr::V4(v4) = ip else {
            return Err(TelemetryError::Unsupported(ip));
        };
        let content =
            std::fs::read_to_string(&self.path).map_err(|source| TelemetryError::Table {
                path: self.path.display().to_string(),
                source,
            })?;
        lookup_arp_entry(&content, v4, &self.device).ok_or_else(|| {
            TelemetryError::NoHardwareAddress {
                ip,
                device: self.device.clone(),
            }
        })
    }
}

/// Find the complete entry for `ip` on `device` in `/proc/net/arp` text.
///
/// Columns: IP address, HW type, Flags, HW address, Mask, Device. Entries
/// with flags `0x0` or an all-zero address are still being resolved.
pub fn lookup_arp_entry(table: &str, ip: Ipv4Addr, device: &str) -> Option<MacAddr> {
    table.lines().skip(1).find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 6 || cols[5] != device {
            return None;
        }
        if cols[0].parse::<Ipv4Addr>().ok()? != ip {
            return None;
        }
        let flags = u32::from_str_radix(cols[2].trim_start_matches("0x"), 16).ok()?;
        if flags == 0 {
            return None;
        }
        let mac: MacAddr = cols[3].parse().ok()?;
        (!mac.is_zero()).then_some(mac)
    })
}
