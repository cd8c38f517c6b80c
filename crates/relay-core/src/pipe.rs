//! Pipes: one media type's pair of streams
//!
//! A pipe owns the caller-side and callee-side stream of one media type
//! (RTP or RTCP) for one session, plus the packet counters the data plane
//! updates while relaying through it. A pipe never knows about its sibling
//! pipe; pairing RTP with RTCP is the session's job.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::logging::SessionLog;
use crate::refcnt::{FaultHandler, Rco};
use crate::stats::StatsSink;
use crate::stream::{MediaType, Side, Stream, StreamArgs, StreamCounts, StreamTable};
use crate::ttl::{unique_tokens, Ttl};
use crate::uid::UidGenerator;
use crate::unwind::Unwind;

/// Pipe-level packet counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeCounts {
    /// Packets forwarded to the other side
    pub nrelayed: u64,
    /// Packets dropped because the other side had no destination yet
    pub ndropped: u64,
    /// Packets discarded by the data plane without relaying
    pub nignored: u64,
}

/// Final statistics of one stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamAccounting {
    pub ps: StreamCounts,
    pub rem_addr: Option<SocketAddr>,
}

/// Final statistics of one pipe
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipeAccounting {
    pub pcnts: PipeCounts,
    /// Caller side ("originate")
    pub o: StreamAccounting,
    /// Callee side ("answer")
    pub a: StreamAccounting,
}

/// Outcome of [`Pipe::relay_packet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayVerdict {
    Relayed,
    Dropped,
}

#[derive(Debug, Default)]
struct AtomicPipeCounts {
    nrelayed: AtomicU64,
    ndropped: AtomicU64,
    nignored: AtomicU64,
}

/// Arguments for [`Pipe::construct`]
pub struct PipeArgs<'a> {
    /// Owning session's uid
    pub seuid: u64,
    /// Stream table for this media type
    pub streams: &'a Arc<StreamTable>,
    pub uids: &'a UidGenerator,
    pub log: &'a Rco<SessionLog>,
    pub stats: &'a Arc<StatsSink>,
    pub media: MediaType,
    pub faults: &'a Arc<dyn FaultHandler>,
}

/// One media type of one call
pub struct Pipe {
    streams: [Rco<Stream>; 2],
    ppuid: u64,
    media: MediaType,
    pcount: AtomicPipeCounts,
    log: Rco<SessionLog>,
    stats: Arc<StatsSink>,
}

impl Pipe {
    /// Build a pipe with both of its streams
    ///
    /// Either both streams are created and registered, or none is: a failure
    /// on the callee side releases the caller side before returning.
    pub fn construct(args: &PipeArgs<'_>) -> Result<Rco<Pipe>> {
        let mut unwind = Unwind::new("pipe");

        let stream_args = |side: Side| StreamArgs {
            stuid: args.uids.next(),
            seuid: args.seuid,
            side,
            media: args.media,
            table: args.streams,
            faults: Arc::clone(args.faults),
        };

        let caller = Stream::construct(stream_args(Side::Caller))?;
        let release = caller.alias();
        unwind.push("caller stream", move || release.decref());

        let callee = Stream::construct(stream_args(Side::Callee))?;
        unwind.commit();

        let pipe = Pipe {
            streams: [caller, callee],
            ppuid: args.uids.next(),
            media: args.media,
            pcount: AtomicPipeCounts::default(),
            log: args.log.incref(),
            stats: Arc::clone(args.stats),
        };
        let handle = Rco::with_faults("pipe", pipe, Arc::clone(args.faults));
        handle.attach(|pipe: &Pipe| pipe.release());
        Ok(handle)
    }

    fn release(&self) {
        debug!(ppuid = self.ppuid, media = %self.media, "pipe destroyed");
        for stream in &self.streams {
            stream.decref();
        }
        self.log.decref();
    }

    pub fn ppuid(&self) -> u64 {
        self.ppuid
    }

    pub fn media(&self) -> MediaType {
        self.media
    }

    /// Stream on `side`
    pub fn stream(&self, side: Side) -> &Rco<Stream> {
        &self.streams[side.index()]
    }

    /// Session log shared with the owning session
    pub fn log(&self) -> &Rco<SessionLog> {
        &self.log
    }

    /// Ticks left before the pipe goes idle: the smaller of both sides
    ///
    /// A side without a TTL token counts as expired.
    pub fn get_ttl(&self) -> u32 {
        self.streams
            .iter()
            .map(|s| s.call("ttl_remaining", |s| s.ttl_remaining()).unwrap_or(0))
            .min()
            .unwrap_or(0)
    }

    /// Counted handles to the distinct TTL tokens of both sides
    pub fn ttl_tokens(&self) -> Vec<Rco<Ttl>> {
        let tokens = self
            .streams
            .iter()
            .filter_map(|s| s.call("ttl", |s| s.ttl()))
            .collect();
        unique_tokens(tokens)
    }

    /// Decrement each distinct TTL token of this pipe once
    pub fn decr_ttl(&self) {
        for token in self.ttl_tokens() {
            token.call("decr", |t| t.decr());
            token.decref();
        }
    }

    /// Snapshot of the pipe and per-stream counters
    pub fn get_stats(&self) -> PipeAccounting {
        let [caller, callee] = &self.streams;
        PipeAccounting {
            pcnts: PipeCounts {
                nrelayed: self.pcount.nrelayed.load(Ordering::Relaxed),
                ndropped: self.pcount.ndropped.load(Ordering::Relaxed),
                nignored: self.pcount.nignored.load(Ordering::Relaxed),
            },
            o: StreamAccounting {
                ps: caller.call("counts", |s| s.counts()),
                rem_addr: caller.call("remote", |s| s.remote()),
            },
            a: StreamAccounting {
                ps: callee.call("counts", |s| s.counts()),
                rem_addr: callee.call("remote", |s| s.remote()),
            },
        }
    }

    /// Fold final pipe counters into the global stats sink
    pub fn upd_cntrs(&self, rap: &PipeAccounting) {
        let prefix = self.media.counter_prefix();
        self.stats
            .update_by_name(&format!("{}_npkts_relayed", prefix), rap.pcnts.nrelayed);
        self.stats
            .update_by_name(&format!("{}_npkts_dropped", prefix), rap.pcnts.ndropped);
        self.stats
            .update_by_name(&format!("{}_npkts_ignored", prefix), rap.pcnts.nignored);
    }

    /// Account one packet that arrived on `from`
    ///
    /// Activity on a side restarts that side's TTL at `keepalive_ticks`. The
    /// packet counts as relayed only when the other side has a remote to send
    /// to.
    pub fn relay_packet(&self, from: Side, len: usize, keepalive_ticks: u32) -> RelayVerdict {
        let src = self.stream(from);
        let dst = self.stream(from.other());
        src.call("record_in", |s| {
            s.record_in(len);
            s.touch(keepalive_ticks);
        });

        if dst.call("remote", |s| s.remote()).is_some() {
            dst.call("record_out", |s| s.record_out(len));
            self.pcount.nrelayed.fetch_add(1, Ordering::Relaxed);
            RelayVerdict::Relayed
        } else {
            self.pcount.ndropped.fetch_add(1, Ordering::Relaxed);
            RelayVerdict::Dropped
        }
    }

    /// Account one packet the data plane discarded unseen
    pub fn count_ignored(&self) {
        self.pcount.nignored.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::refcnt::RecordingFaultHandler;

    struct Fixture {
        streams: Arc<StreamTable>,
        uids: UidGenerator,
        log: Rco<SessionLog>,
        stats: Arc<StatsSink>,
        faults: Arc<dyn FaultHandler>,
    }

    impl Fixture {
        fn new(capacity: Option<usize>) -> Self {
            let faults: Arc<dyn FaultHandler> = Arc::new(RecordingFaultHandler::new());
            Self {
                streams: Arc::new(StreamTable::with_capacity_limit("rtp_streams", capacity)),
                uids: UidGenerator::new(),
                log: SessionLog::new_shared("test", "call-1", faults.clone()),
                stats: Arc::new(StatsSink::new()),
                faults,
            }
        }

        fn args(&self, media: MediaType) -> PipeArgs<'_> {
            PipeArgs {
                seuid: 99,
                streams: &self.streams,
                uids: &self.uids,
                log: &self.log,
                stats: &self.stats,
                media,
                faults: &self.faults,
            }
        }
    }

    #[test]
    fn test_construct_registers_both_sides() {
        let fx = Fixture::new(None);
        let pipe = Pipe::construct(&fx.args(MediaType::Rtp)).unwrap();
        assert_eq!(fx.streams.len(), 2);
        assert_eq!(fx.log.refcount(), 2);

        let sides = pipe.call("stream", |p| {
            (
                p.stream(Side::Caller).call("side", |s| s.side().index()),
                p.stream(Side::Callee).call("side", |s| s.side().index()),
            )
        });
        assert_eq!(sides, (0, 1));

        pipe.decref();
        assert!(fx.streams.is_empty());
        assert_eq!(fx.log.refcount(), 1);
    }

    #[test]
    fn test_second_side_failure_rolls_back_first() {
        let fx = Fixture::new(Some(1));
        let err = Pipe::construct(&fx.args(MediaType::Rtcp)).err().unwrap();
        assert!(matches!(err, Error::Allocation { .. }));
        assert!(fx.streams.is_empty());
        assert_eq!(fx.log.refcount(), 1);
    }

    #[test]
    fn test_relay_counts_and_idempotent_stats() {
        let fx = Fixture::new(None);
        let pipe = Pipe::construct(&fx.args(MediaType::Rtp)).unwrap();

        // Nobody to send to yet
        let verdict = pipe.call("relay_packet", |p| Some(p.relay_packet(Side::Caller, 172, 60)));
        assert_eq!(verdict, Some(RelayVerdict::Dropped));

        pipe.call("stream", |p| {
            p.stream(Side::Callee)
                .call("set_remote", |s| s.set_remote("192.0.2.10:4000".parse().unwrap()))
        });
        for _ in 0..3 {
            pipe.call("relay_packet", |p| {
                p.relay_packet(Side::Caller, 172, 60);
            });
        }
        pipe.call("count_ignored", |p| p.count_ignored());

        let first = pipe.call("get_stats", |p| p.get_stats());
        let second = pipe.call("get_stats", |p| p.get_stats());
        assert_eq!(first, second);
        assert_eq!(first.pcnts.nrelayed, 3);
        assert_eq!(first.pcnts.ndropped, 1);
        assert_eq!(first.pcnts.nignored, 1);
        assert_eq!(first.o.ps.npkts_in, 4);
        assert_eq!(first.a.ps.npkts_out, 3);
        assert_eq!(first.a.ps.nbytes_out, 3 * 172);
        assert_eq!(first.a.rem_addr, Some("192.0.2.10:4000".parse().unwrap()));

        pipe.call("upd_cntrs", |p| p.upd_cntrs(&first));
        assert_eq!(fx.stats.get("rtp_npkts_relayed"), 3);
        assert_eq!(fx.stats.get("rtp_npkts_dropped"), 1);
        assert_eq!(fx.stats.get("rtp_npkts_ignored"), 1);
        pipe.decref();
    }

    #[test]
    fn test_decr_ttl_once_per_shared_token() {
        let fx = Fixture::new(None);
        let pipe = Pipe::construct(&fx.args(MediaType::Rtp)).unwrap();
        let token = Ttl::new_shared(10, fx.faults.clone());
        pipe.call("stream", |p| {
            for side in Side::BOTH {
                p.stream(side).call("set_ttl", |s| s.set_ttl(token.incref()));
            }
        });

        pipe.call("decr_ttl", |p| p.decr_ttl());
        assert_eq!(token.call("remaining", |t| t.remaining()), 9);
        assert_eq!(pipe.call("get_ttl", |p| p.get_ttl()), 9);

        pipe.decref();
        assert_eq!(token.refcount(), 1);
        token.decref();
    }
}
