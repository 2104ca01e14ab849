//! Telemetry listener: one report per datagram into the epoch's
//! performance map.

use std::net::IpAddr;

use tracing::debug;

use pricecap_backend::{ActuationGateway, VirtBackend};
use pricecap_core::{PerformanceMap, VmName};

use crate::arp::AddressResolver;
use crate::error::{TelemetryError, TelemetryResult};
use crate::identity::IdentityResolver;

/// Parse a report payload: ASCII decimal text, surrounding whitespace and
/// NUL padding ignored. NaN is rejected; infinities are kept and later
/// saturate to ±1.
pub fn parse_report(payload: &[u8]) -> TelemetryResult<f64> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| TelemetryError::Malformed(String::from_utf8_lossy(payload).into_owned()))?;
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if text.is_empty() {
        return Err(TelemetryError::EmptyPayload);
    }
    match text.parse::<f64>() {
        Ok(v) if !v.is_nan() => Ok(v),
        _ => Err(TelemetryError::Malformed(text.to_string())),
    }
}

pub struct TelemetryListener<A> {
    resolver: IdentityResolver<A>,
    performance: PerformanceMap,
}

impl<A: AddressResolver> TelemetryListener<A> {
    pub fn new(addresses: A) -> Self {
        Self {
            resolver: IdentityResolver::new(addresses),
            performance: PerformanceMap::new(),
        }
    }

    /// Handle one datagram from `sender`.
    ///
    /// The payload is validated before the sender is resolved. On success
    /// returns the VM and the clamped value now stored for it.
    pub async fn ingest<B: VirtBackend>(
        &mut self,
        payload: &[u8],
        sender: IpAddr,
        gateway: &ActuationGateway<B>,
    ) -> TelemetryResult<(VmName, f64)> {
        let raw = parse_report(payload)?;
        let vm = self.resolver.resolve(sender, gateway).await?;
        let value = self.performance.record(&vm, raw);
        debug!(%sender, %vm, raw, perf = value, "performance report");
        Ok((vm, value))
    }

    pub fn performance(&self) -> &PerformanceMap {
        &self.performance
    }

    /// Forget this epoch's reports. Resolved identities are kept.
    pub fn start_epoch(&mut self) {
        self.performance.clear();
    }

    pub fn resolver(&self) -> &IdentityResolver<A> {
        &self.resolver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pricecap_backend::InMemoryBackend;
    use pricecap_core::MacAddr;

    #[test]
    fn parse_plain_values() {
        assert_eq!(parse_report(b"-0.4").unwrap(), -0.4);
        assert_eq!(parse_report(b"0.25\n").unwrap(), 0.25);
        assert_eq!(parse_report(b"  1e-1 ").unwrap(), 0.1);
        assert_eq!(parse_report(b"0.5\0\0").unwrap(), 0.5);
    }

    #[test]
    fn parse_rejects_bad_payloads() {
        assert!(matches!(parse_report(b""), Err(TelemetryError::EmptyPayload)));
        assert!(matches!(parse_report(b" \n"), Err(TelemetryError::EmptyPayload)));
        assert!(matches!(parse_report(b"fast"), Err(TelemetryError::Malformed(_))));
        assert!(matches!(parse_report(b"NaN"), Err(TelemetryError::Malformed(_))));
        assert!(matches!(parse_report(&[0xff, 0xfe]), Err(TelemetryError::Malformed(_))));
    }

    #[test]
    fn parse_keeps_infinity_for_saturation() {
        assert_eq!(parse_report(b"inf").unwrap(), f64::INFINITY);
    }

    /// Every IPv4 sender maps to the same hardware address.
    struct OneMac(MacAddr);

    impl AddressResolver for OneMac {
        fn hardware_address(&self, _ip: IpAddr) -> TelemetryResult<MacAddr> {
            Ok(self.0)
        }
    }

    fn setup() -> (TelemetryListener<OneMac>, ActuationGateway<InMemoryBackend>) {
        let mac = MacAddr([0x52, 0x54, 0, 0, 0, 1]);
        let backend = InMemoryBackend::new();
        backend.add_domain("vmA", Some(mac));
        (
            TelemetryListener::new(OneMac(mac)),
            ActuationGateway::new(backend, None),
        )
    }

    #[tokio::test]
    async fn ingest_clamps_and_overwrites() {
        let (mut listener, gateway) = setup();
        let sender: IpAddr = "192.168.122.10".parse().unwrap();

        let (vm, value) = listener.ingest(b"-7.5", sender, &gateway).await.unwrap();
        assert_eq!((vm.as_str(), value), ("vmA", -1.0));

        listener.ingest(b"0.3", sender, &gateway).await.unwrap();
        assert_eq!(listener.performance().get("vmA"), 0.3);
        assert_eq!(listener.performance().len(), 1);
    }

    #[tokio::test]
    async fn malformed_payload_skips_resolution() {
        let (mut listener, gateway) = setup();
        let sender: IpAddr = "192.168.122.10".parse().unwrap();

        assert!(listener.ingest(b"oops", sender, &gateway).await.is_err());
        assert_eq!(gateway.backend().lookup_count(), 0);
        assert!(listener.performance().is_empty());
    }

    #[tokio::test]
    async fn start_epoch_clears_reports_but_keeps_identities() {
        let (mut listener, gateway) = setup();
        let sender: IpAddr = "192.168.122.10".parse().unwrap();

        listener.ingest(b"-0.2", sender, &gateway).await.unwrap();
        listener.start_epoch();
        assert!(listener.performance().is_empty());
        assert_eq!(listener.resolver().cached(&sender), Some("vmA"));

        listener.ingest(b"0.1", sender, &gateway).await.unwrap();
        assert_eq!(gateway.backend().lookup_count(), 1);
    }
}
