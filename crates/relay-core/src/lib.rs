//! # Relay core library for the RVOIP project
//!
//! `relay-core` manages the lifecycle of RTP/RTCP relay sessions: the objects
//! a media relay keeps per call, how they are built and torn down, and how
//! signaling requests are matched to them.
//!
//! This crate provides:
//!
//! - Reference-counted entities with a use-after-release trap ([`refcnt`])
//! - Sessions owning an RTP and an RTCP [`pipe`], each with two [`stream`]s
//! - Shared TTL countdowns so the RTP and RTCP legs of a side expire together
//! - Call-id / tag matching of signaling requests to sessions ([`matching`])
//! - A periodic TTL sweep that expires idle sessions ([`sweep`])
//! - Accounting records handed to pluggable modules at teardown
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::{IpAddr, Ipv4Addr};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use rvoip_relay_core::prelude::*;
//! use tokio::net::UdpSocket;
//!
//! # async fn run() -> rvoip_relay_core::Result<()> {
//! let ctx = RelayContext::new(RelayConfig::default())?;
//!
//! let fds = SocketPair::new(
//!     Arc::new(UdpSocket::bind("0.0.0.0:35000").await?),
//!     Arc::new(UdpSocket::bind("0.0.0.0:35001").await?),
//! );
//! let local = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
//! let session = Session::construct(
//!     &ctx,
//!     SessionArgs {
//!         call_id: "call-1@example.com".to_string(),
//!         from_tag: "a1b2".to_string(),
//!         created: ctx.clock.now(),
//!         laddrs: [local, local],
//!         weak: false,
//!         port: 35000,
//!         fds,
//!     },
//! )?;
//! // The registry keeps its own reference
//! session.decref();
//!
//! let lookup = find_stream(&ctx, "call-1@example.com", "x9", Some("a1b2"));
//! assert_eq!(lookup.rank(), 1);
//! if let Some(session) = lookup.into_session() {
//!     session.decref();
//! }
//!
//! let sweeper = TtlSweeper::new(ctx.clone()).spawn(Duration::from_secs(1));
//! delete_session(&ctx, "call-1@example.com", "a1b2", None, false)?;
//! sweeper.stop();
//! # Ok(())
//! # }
//! ```

// Error handling
pub mod error;

// Ambient services
pub mod clock;
pub mod config;
pub mod context;
pub mod events;
pub mod logging;
pub mod stats;
pub mod uid;

// Object model
pub mod refcnt;
pub mod ttl;
pub mod unwind;
pub mod weakref;
pub mod analyzer;
pub mod stream;
pub mod pipe;
pub mod session;

// Registries and operations
pub mod accounting;
pub mod matching;
pub mod registry;
pub mod sessinfo;
pub mod sweep;
pub mod teardown;

// Re-export common types
pub use error::{Error, Result};
pub use config::{RelayConfig, TtlMode};
pub use context::RelayContext;
pub use refcnt::{AbortOnFault, FaultHandler, Rco, RecordingFaultHandler};
pub use session::{Session, SessionArgs};
pub use pipe::{Pipe, PipeAccounting, RelayVerdict};
pub use stream::{MediaType, Side, Stream};
pub use matching::{compare_session_tags, find_stream, MatchRank, SessionLookup, TagMatch};
pub use teardown::delete_session;
pub use sweep::{SweepReport, TtlSweeper};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::accounting::{Accounting, AccountingModule, LogAccounting, ModuleChain};
    pub use crate::clock::{Clock, ManualClock, SystemClock, Timestamp};
    pub use crate::config::{RelayConfig, TtlMode};
    pub use crate::context::RelayContext;
    pub use crate::error::{Error, Result};
    pub use crate::events::{SessionEvent, TimeoutData};
    pub use crate::matching::{compare_session_tags, find_stream, MatchRank, SessionLookup, TagMatch};
    pub use crate::pipe::{Pipe, PipeAccounting, RelayVerdict};
    pub use crate::refcnt::{FaultHandler, Rco, RecordingFaultHandler};
    pub use crate::sessinfo::SocketPair;
    pub use crate::session::{Session, SessionArgs};
    pub use crate::stream::{MediaType, Side, Stream};
    pub use crate::sweep::{SweepReport, TtlSweeper};
    pub use crate::teardown::delete_session;
}
