//! Streams: one side of one media type
//!
//! A stream is a single transport endpoint of a session. It knows its local
//! address and port, the remote it latched onto, whether it is a weak leg, the
//! TTL token it shares with its siblings, and the uid of its sibling stream of
//! the other media type on the same side. The sibling link is an id only and
//! is resolved through the stream tables.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::analyzer::RtpAnalyzer;
use crate::error::Result;
use crate::refcnt::{FaultHandler, Rco};
use crate::ttl::Ttl;
use crate::weakref::WeakRefTable;

/// Default RTP clock rate used by stream analyzers
pub const DEFAULT_CLOCK_RATE: u32 = 8000;

/// Media type carried by a pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Rtp,
    Rtcp,
}

impl MediaType {
    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            MediaType::Rtp => "RTP",
            MediaType::Rtcp => "RTCP",
        }
    }

    /// Prefix for stats counter names
    pub fn counter_prefix(&self) -> &'static str {
        match self {
            MediaType::Rtp => "rtp",
            MediaType::Rtcp => "rtcp",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Side of a call leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Index 0, the near side
    Caller = 0,
    /// Index 1, the far side
    Callee = 1,
}

impl Side {
    /// Both sides in index order
    pub const BOTH: [Side; 2] = [Side::Caller, Side::Callee];

    /// Array index of this side
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The opposite side
    pub fn other(&self) -> Side {
        match self {
            Side::Caller => Side::Callee,
            Side::Callee => Side::Caller,
        }
    }
}

/// Stream table type used as the per-media "transport registry"
pub type StreamTable = WeakRefTable<Stream>;

/// Per-stream packet counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamCounts {
    /// Packets received from this side's remote
    pub npkts_in: u64,
    /// Bytes received from this side's remote
    pub nbytes_in: u64,
    /// Packets sent towards this side's remote
    pub npkts_out: u64,
    /// Bytes sent towards this side's remote
    pub nbytes_out: u64,
}

#[derive(Debug, Default)]
struct AtomicStreamCounts {
    npkts_in: AtomicU64,
    nbytes_in: AtomicU64,
    npkts_out: AtomicU64,
    nbytes_out: AtomicU64,
}

/// Arguments for [`Stream::construct`]
pub struct StreamArgs<'a> {
    /// Stream uid, allocated by the caller
    pub stuid: u64,
    /// Owning session's uid
    pub seuid: u64,
    pub side: Side,
    pub media: MediaType,
    /// Per-media stream table the stream registers into
    pub table: &'a Arc<StreamTable>,
    pub faults: Arc<dyn FaultHandler>,
}

/// One transport leg
pub struct Stream {
    stuid: u64,
    seuid: u64,
    side: Side,
    media: MediaType,
    laddr: RwLock<Option<IpAddr>>,
    remote: RwLock<Option<SocketAddr>>,
    port: AtomicU16,
    weak: AtomicBool,
    ttl: Mutex<Option<Rco<Ttl>>>,
    sibling: AtomicU64,
    analyzer: Option<RtpAnalyzer>,
    counts: AtomicStreamCounts,
}

impl Stream {
    /// Create a stream and make it resolvable through `args.table`
    ///
    /// On failure nothing stays registered and the half-built stream is
    /// released before the error is returned.
    pub fn construct(args: StreamArgs<'_>) -> Result<Rco<Stream>> {
        let analyzer = match args.media {
            MediaType::Rtp => Some(RtpAnalyzer::new(DEFAULT_CLOCK_RATE)),
            MediaType::Rtcp => None,
        };
        let stream = Stream {
            stuid: args.stuid,
            seuid: args.seuid,
            side: args.side,
            media: args.media,
            laddr: RwLock::new(None),
            remote: RwLock::new(None),
            port: AtomicU16::new(0),
            weak: AtomicBool::new(false),
            ttl: Mutex::new(None),
            sibling: AtomicU64::new(0),
            analyzer,
            counts: AtomicStreamCounts::default(),
        };
        let handle = Rco::with_faults("stream", stream, args.faults);

        if let Err(e) = args.table.register(args.stuid, &handle) {
            handle.decref();
            return Err(e);
        }

        let table = Arc::clone(args.table);
        handle.attach(move |stream: &Stream| {
            table.unregister(stream.stuid);
            stream.release_ttl();
            debug!(
                stuid = stream.stuid,
                seuid = stream.seuid,
                media = %stream.media,
                side = stream.side.index(),
                "stream destroyed"
            );
        });
        Ok(handle)
    }

    pub fn stuid(&self) -> u64 {
        self.stuid
    }

    pub fn seuid(&self) -> u64 {
        self.seuid
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn media(&self) -> MediaType {
        self.media
    }

    /// Local address the stream is bound to
    pub fn laddr(&self) -> Option<IpAddr> {
        *self.laddr.read()
    }

    pub fn set_laddr(&self, addr: IpAddr) {
        *self.laddr.write() = Some(addr);
    }

    /// Remote the stream sends to, once known
    pub fn remote(&self) -> Option<SocketAddr> {
        *self.remote.read()
    }

    pub fn set_remote(&self, addr: SocketAddr) {
        *self.remote.write() = Some(addr);
    }

    /// Local port; 0 until assigned
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::Relaxed)
    }

    pub fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::Relaxed);
    }

    /// Weak legs may be released without tearing down the whole call
    pub fn is_weak(&self) -> bool {
        self.weak.load(Ordering::Relaxed)
    }

    pub fn set_weak(&self, weak: bool) {
        self.weak.store(weak, Ordering::Relaxed);
    }

    /// Install the TTL token; the stream takes over the caller's reference
    ///
    /// A previously installed token is released.
    pub fn set_ttl(&self, ttl: Rco<Ttl>) {
        let old = self.ttl.lock().replace(ttl);
        if let Some(old) = old {
            old.decref();
        }
    }

    /// Release the stream's TTL reference, if any
    pub fn release_ttl(&self) {
        let old = self.ttl.lock().take();
        if let Some(old) = old {
            old.decref();
        }
    }

    /// Counted handle to the TTL token; the caller must release it
    pub fn ttl(&self) -> Option<Rco<Ttl>> {
        self.ttl.lock().as_ref().map(|t| t.incref())
    }

    /// Ticks left on the stream's TTL token
    pub fn ttl_remaining(&self) -> Option<u32> {
        self.ttl
            .lock()
            .as_ref()
            .map(|t| t.call("remaining", |t| t.remaining()))
    }

    /// Whether both streams reference the very same TTL token
    pub fn shares_ttl_with(&self, other: &Stream) -> bool {
        // Never hold both locks at once
        let mine = self.ttl.lock().as_ref().map(Rco::alias);
        let theirs = other.ttl.lock().as_ref().map(Rco::alias);
        match (mine, theirs) {
            (Some(a), Some(b)) => Rco::ptr_eq(&a, &b),
            _ => false,
        }
    }

    /// Keep-alive: restart the TTL countdown at `ticks`
    pub fn touch(&self, ticks: u32) {
        if let Some(ttl) = self.ttl.lock().as_ref() {
            ttl.call("reset", |t| t.reset(ticks));
        }
    }

    /// Record the uid of the same-side stream of the other media type
    pub fn link_sibling(&self, stuid: u64) {
        self.sibling.store(stuid, Ordering::Relaxed);
    }

    /// Sibling RTCP stream uid, for RTP streams
    pub fn stuid_rtcp(&self) -> Option<u64> {
        match self.media {
            MediaType::Rtp => self.sibling(),
            MediaType::Rtcp => None,
        }
    }

    /// Sibling RTP stream uid, for RTCP streams
    pub fn stuid_rtp(&self) -> Option<u64> {
        match self.media {
            MediaType::Rtcp => self.sibling(),
            MediaType::Rtp => None,
        }
    }

    fn sibling(&self) -> Option<u64> {
        match self.sibling.load(Ordering::Relaxed) {
            0 => None,
            stuid => Some(stuid),
        }
    }

    /// Analyzer for RTP streams
    pub fn analyzer(&self) -> Option<&RtpAnalyzer> {
        self.analyzer.as_ref()
    }

    /// Count a packet received from this side
    pub fn record_in(&self, len: usize) {
        self.counts.npkts_in.fetch_add(1, Ordering::Relaxed);
        self.counts.nbytes_in.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Count a packet sent towards this side
    pub fn record_out(&self, len: usize) {
        self.counts.npkts_out.fetch_add(1, Ordering::Relaxed);
        self.counts.nbytes_out.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Snapshot of the packet counters
    pub fn counts(&self) -> StreamCounts {
        StreamCounts {
            npkts_in: self.counts.npkts_in.load(Ordering::Relaxed),
            nbytes_in: self.counts.nbytes_in.load(Ordering::Relaxed),
            npkts_out: self.counts.npkts_out.load(Ordering::Relaxed),
            nbytes_out: self.counts.nbytes_out.load(Ordering::Relaxed),
        }
    }
}
