//! The control loop: telemetry intake interleaved with fixed-interval
//! allocation epochs, all on one task.
//!
//! Each iteration waits for the first of: shutdown, one inbound datagram,
//! or the epoch deadline. At most one datagram is handled per iteration
//! and the deadline is re-checked afterwards, so a flood of reports
//! cannot push an epoch back.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, trace, warn};

use pricecap_allocator::{Allocator, PriceBook};
use pricecap_backend::{ActuationGateway, VirtBackend};
use pricecap_telemetry::{AddressResolver, TelemetryListener};

pub struct ControlLoop<B, A> {
    socket: UdpSocket,
    gateway: ActuationGateway<B>,
    listener: TelemetryListener<A>,
    allocator: Allocator,
    prices: PriceBook,
    interval: Duration,
    max_message_size: usize,
    epochs: u64,
}

impl<B: VirtBackend, A: AddressResolver> ControlLoop<B, A> {
    pub fn new(
        socket: UdpSocket,
        gateway: ActuationGateway<B>,
        listener: TelemetryListener<A>,
        allocator: Allocator,
        interval: Duration,
        max_message_size: usize,
    ) -> Self {
        Self {
            socket,
            gateway,
            listener,
            allocator,
            prices: PriceBook::new(),
            interval,
            max_message_size,
            epochs: 0,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn prices(&self) -> &PriceBook {
        &self.prices
    }

    #[cfg(test)]
    pub fn gateway(&self) -> &ActuationGateway<B> {
        &self.gateway
    }

    /// Completed (or attempted) epochs so far.
    pub fn epochs(&self) -> u64 {
        self.epochs
    }

    /// Run until `shutdown` flips or its sender is dropped.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            addr = ?self.local_addr().ok(),
            "control loop started"
        );

        let mut buf = vec![0u8; self.max_message_size];
        let mut last_epoch = Instant::now();

        loop {
            let deadline = last_epoch + self.interval;

            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!(epochs = self.epochs, "control loop shutting down");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, sender)) => self.handle_datagram(&buf[..len], sender).await,
                    Err(e) => warn!(error = %e, "receive failed"),
                },
                _ = tokio::time::sleep_until(deadline) => {
                    trace!("epoch deadline reached");
                }
            }

            if last_epoch.elapsed() >= self.interval {
                self.run_epoch().await;
                last_epoch = Instant::now();
            }
        }
    }

    async fn handle_datagram(&mut self, payload: &[u8], sender: SocketAddr) {
        if let Err(e) = self
            .listener
            .ingest(payload, sender.ip(), &self.gateway)
            .await
        {
            warn!(%sender, error = %e, "dropped telemetry report");
        }
    }

    /// Allocate, then open the next epoch's reporting window.
    async fn run_epoch(&mut self) {
        self.epochs += 1;
        let epoch = self.epochs;

        match self
            .allocator
            .run_epoch(&self.gateway, self.listener.performance(), &mut self.prices)
            .await
        {
            Ok(report) => info!(
                epoch,
                vms = report.allocations.len(),
                reported = report.reported,
                failed = report.summary.failed.len(),
                "epoch complete"
            ),
            Err(e) => error!(epoch, error = %e, "epoch aborted: cannot enumerate domains"),
        }

        let stats = self.listener.resolver().stats();
        trace!(hits = stats.hits, misses = stats.misses, "identity cache");

        self.listener.start_epoch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    use pricecap_backend::InMemoryBackend;
    use pricecap_core::MacAddr;
    use pricecap_telemetry::TelemetryResult;

    const MAC_A: MacAddr = MacAddr([0x52, 0x54, 0, 0, 0, 0x0a]);

    /// Loopback senders all belong to vmA.
    struct LoopbackIsVmA;

    impl AddressResolver for LoopbackIsVmA {
        fn hardware_address(&self, _ip: IpAddr) -> TelemetryResult<MacAddr> {
            Ok(MAC_A)
        }
    }

    async fn control_loop(interval: Duration) -> ControlLoop<InMemoryBackend, LoopbackIsVmA> {
        let backend = InMemoryBackend::new();
        backend.add_domain("dom0", None);
        backend.add_domain("vmA", Some(MAC_A));
        backend.add_domain("vmB", None);

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        ControlLoop::new(
            socket,
            ActuationGateway::new(backend, Some("dom0".to_string())),
            TelemetryListener::new(LoopbackIsVmA),
            Allocator::new(0.01, 400.0),
            interval,
            1024,
        )
    }

    #[tokio::test]
    async fn report_moves_price_in_following_epoch() {
        let mut cl = control_loop(Duration::from_millis(200)).await;
        let addr = cl.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            cl.run(rx).await;
            cl
        });

        // First epoch prices both VMs as newcomers; report lands in the second.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"-0.4\n", addr).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        let cl = handle.await.unwrap();

        assert!(cl.epochs() >= 2, "only {} epochs ran", cl.epochs());
        let prices = cl.prices();
        assert!(prices.price("vmA") > prices.price("vmB"));
        assert!((prices.sum_over(&["vmA", "vmB"]) - 1.0).abs() < 1e-9);
        assert!(!prices.is_known("dom0"));

        let backend = cl.gateway().backend();
        // Shares are 0.501 / 0.499 of 400 units, both round to 200.
        assert_eq!(backend.cap_of("vmA"), Some(200));
        assert_eq!(backend.cap_of("vmB"), Some(200));
        assert_eq!(backend.cap_of("dom0"), None);
    }

    #[tokio::test]
    async fn flood_does_not_delay_epochs() {
        let mut cl = control_loop(Duration::from_millis(100)).await;
        let addr = cl.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            cl.run(rx).await;
            cl
        });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let flood_until = Instant::now() + Duration::from_millis(350);
        while Instant::now() < flood_until {
            client.send_to(b"0.1", addr).await.unwrap();
            client.send_to(b"not-a-number", addr).await.unwrap();
            tokio::task::yield_now().await;
        }

        tx.send(true).unwrap();
        let cl = handle.await.unwrap();
        assert!(cl.epochs() >= 2, "only {} epochs ran", cl.epochs());
    }

    #[tokio::test]
    async fn shutdown_stops_before_first_epoch() {
        let mut cl = control_loop(Duration::from_secs(60)).await;
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            cl.run(rx).await;
            cl
        });
        tx.send(true).unwrap();

        let cl = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
        assert_eq!(cl.epochs(), 0);
        assert_eq!(cl.gateway().backend().capped_count(), 0);
    }

    #[tokio::test]
    async fn dropped_sender_also_stops_loop() {
        let mut cl = control_loop(Duration::from_secs(60)).await;
        let (tx, rx) = watch::channel(false);
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), cl.run(rx))
            .await
            .expect("loop did not stop");
    }

    #[tokio::test]
    async fn epoch_survives_backend_outage() {
        let mut cl = control_loop(Duration::from_millis(50)).await;
        cl.gateway().backend().fail_listing(true);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            cl.run(rx).await;
            cl
        });
        tokio::time::sleep(Duration::from_millis(180)).await;
        tx.send(true).unwrap();

        let cl = handle.await.unwrap();
        assert!(cl.epochs() >= 2);
        assert!(cl.prices().is_empty());
    }
}
