//! Common test helpers for relay-core integration tests
//!
//! Every harness records faults instead of aborting and runs on a manual
//! clock, so tests can assert on both lifecycle contract violations and
//! exact session durations.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use rvoip_relay_core::events::{self, EventReceiver};
use rvoip_relay_core::prelude::*;
use rvoip_relay_core::stream::Stream;
use tokio::net::UdpSocket;

/// Context plus the handles tests poke at
pub struct Harness {
    pub ctx: RelayContext,
    pub faults: Arc<RecordingFaultHandler>,
    pub clock: ManualClock,
    pub events: EventReceiver,
}

impl Harness {
    pub fn new(config: RelayConfig) -> Self {
        Self::with_modules(config, ModuleChain::new())
    }

    pub fn with_modules(config: RelayConfig, modules: ModuleChain) -> Self {
        let faults = Arc::new(RecordingFaultHandler::new());
        let clock = ManualClock::new(Timestamp {
            wall: 1_700_000_000.0,
            mono: 100.0,
        });
        let (tx, events) = events::channel();
        let ctx = RelayContext::new(config)
            .unwrap()
            .with_fault_handler(faults.clone())
            .with_clock(Arc::new(clock.clone()))
            .with_modules(modules)
            .with_events(tx);
        Self {
            ctx,
            faults,
            clock,
            events,
        }
    }

    /// Construct a session on freshly bound loopback sockets
    pub async fn create(&self, call_id: &str, from_tag: &str, weak: bool) -> Result<Rco<Session>> {
        let fds = sockets().await;
        let port = fds.rtp.local_addr()?.port();
        self.create_on_port(call_id, from_tag, weak, port, fds)
    }

    pub fn create_on_port(
        &self,
        call_id: &str,
        from_tag: &str,
        weak: bool,
        port: u16,
        fds: SocketPair,
    ) -> Result<Rco<Session>> {
        Session::construct(
            &self.ctx,
            SessionArgs {
                call_id: call_id.to_string(),
                from_tag: from_tag.to_string(),
                created: self.ctx.clock.now(),
                laddrs: [loopback(), IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2))],
                weak,
                port,
                fds,
            },
        )
    }

    /// Drain every event received so far
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

pub fn loopback() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

pub async fn sockets() -> SocketPair {
    let rtp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let rtcp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    SocketPair::new(Arc::new(rtp), Arc::new(rtcp))
}

/// Run `op` against the stream on `side` of `media`
pub fn on_stream<R: Default>(
    session: &Rco<Session>,
    media: MediaType,
    side: Side,
    op: impl FnOnce(&Stream) -> R,
) -> R {
    session.call("pipe", |s| {
        s.pipe(media)
            .call("stream", |p| p.stream(side).call("inspect", op))
    })
}

/// Whether two streams of a session point at the very same TTL token
pub fn shares_ttl(
    session: &Rco<Session>,
    (media_a, side_a): (MediaType, Side),
    (media_b, side_b): (MediaType, Side),
) -> bool {
    session.call("pipe", |s| {
        let a = s.pipe(media_a);
        let b = s.pipe(media_b);
        a.call("stream", |pa| {
            b.call("stream", |pb| {
                pa.stream(side_a).call("shares_ttl_with", |sa| {
                    pb.stream(side_b).call("shares_ttl_with", |sb| sa.shares_ttl_with(sb))
                })
            })
        })
    })
}
