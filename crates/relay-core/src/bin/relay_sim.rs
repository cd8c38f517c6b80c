use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rvoip_relay_core::events;
use rvoip_relay_core::logging::{parse_log_level, setup_logging, LoggingConfig};
use rvoip_relay_core::prelude::*;
use tokio::net::UdpSocket;

/// Drive a handful of relay sessions through setup, media and TTL expiry
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of sessions to create
    #[arg(short, long, default_value = "4")]
    sessions: usize,

    /// RTP packets fed into each session
    #[arg(short, long, default_value = "50")]
    packets: u16,

    /// Override the setup and media TTL, in sweep ticks
    #[arg(short, long)]
    ttl: Option<u32>,

    /// Override the sweep interval in milliseconds
    #[arg(long)]
    sweep_ms: Option<u64>,

    /// Give each side its own TTL countdown
    #[arg(long)]
    independent: bool,

    /// Log as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    if let Some(ttl) = args.ttl {
        config.max_setup_ttl = ttl;
        config.max_ttl = ttl;
    }
    if let Some(ms) = args.sweep_ms {
        config.sweep_interval_ms = ms;
    }
    if args.independent {
        config.ttl_mode = TtlMode::Independent;
    }

    let mut logging = LoggingConfig::new(parse_log_level(&config.log_level)?, &config.app_name);
    if args.json {
        logging = logging.with_json();
    }
    setup_logging(logging)?;

    let (tx, mut rx) = events::channel();
    let ctx = RelayContext::new(config)?
        .with_modules(ModuleChain::new().with_module(Arc::new(LogAccounting)))
        .with_events(tx);

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            println!("event: {:?}", event);
        }
    });

    let keepalive = ctx.config.max_ttl;
    for n in 0..args.sessions {
        let rtp = UdpSocket::bind("127.0.0.1:0").await?;
        let rtcp = UdpSocket::bind("127.0.0.1:0").await?;
        let local = rtp.local_addr()?;
        let session = Session::construct(
            &ctx,
            SessionArgs {
                call_id: format!("sim-{}@relay", n),
                from_tag: format!("tag{};1", n),
                created: ctx.clock.now(),
                laddrs: [local.ip(), local.ip()],
                weak: false,
                port: local.port(),
                fds: SocketPair::new(Arc::new(rtp), Arc::new(rtcp)),
            },
        )?;

        let peer: SocketAddr = format!("127.0.0.1:{}", 40000 + 2 * n).parse()?;
        session.call("simulate", |s| {
            s.set_complete();
            s.rtp().call("feed", |pipe| {
                pipe.stream(Side::Callee).call("set_remote", |st| st.set_remote(peer));
                for seq in 0..args.packets {
                    pipe.relay_packet(Side::Caller, 172, keepalive);
                    let arrival = ctx.clock.now().mono;
                    pipe.stream(Side::Caller).call("analyze", |st| {
                        if let Some(analyzer) = st.analyzer() {
                            analyzer.update(seq, 0x5eed + n as u32, u32::from(seq) * 160, arrival);
                        }
                    });
                }
            });
        });
        session.decref();
    }

    println!("{} sessions registered, waiting for TTL expiry", ctx.sessions.len());
    let period = Duration::from_millis(ctx.config.sweep_interval_ms);
    let sweeper = TtlSweeper::new(ctx.clone()).spawn(period);
    let ticks = ctx.config.max_ttl.max(ctx.config.max_setup_ttl).saturating_add(3);
    let deadline = tokio::time::Instant::now() + period * ticks;
    while !ctx.sessions.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(period).await;
    }
    sweeper.stop();

    if !ctx.sessions.is_empty() {
        println!("releasing {} sessions still registered", ctx.sessions.len());
        ctx.sessions.clear();
    }

    println!("stats:");
    for (name, value) in ctx.stats.snapshot() {
        println!("  {:<24} {}", name, value);
    }

    drop(ctx);
    printer.await?;
    Ok(())
}
