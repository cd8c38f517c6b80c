//! Sessions: the call-level aggregate of an RTP and an RTCP pipe
//!
//! Construction acquires its parts one by one and rolls every acquired part
//! back if a later step fails, so a caller either gets a fully wired,
//! registered session or nothing at all. Destruction runs when the last
//! reference is released and hands the session's accounting record to the
//! module chain before any part is freed.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::accounting::{Accounting, ModuleChain};
use crate::clock::{Clock, Timestamp};
use crate::config::TtlMode;
use crate::context::{self, RelayContext};
use crate::error::{Error, Result};
use crate::events::{EventSender, SessionEvent, TimeoutData};
use crate::logging::{parse_log_level, SessionLog};
use crate::pipe::{Pipe, PipeArgs};
use crate::refcnt::Rco;
use crate::sessinfo::{SessionInfo, SocketPair};
use crate::stats::{names, StatsSink};
use crate::stream::{MediaType, Side, Stream};
use crate::ttl::{unique_tokens, Ttl};
use crate::unwind::Unwind;

/// Per-call arguments for [`Session::construct`]
#[derive(Debug, Clone)]
pub struct SessionArgs {
    pub call_id: String,
    /// From tag, optionally suffixed with `;<medianum>`
    pub from_tag: String,
    /// Creation time stamped on the accounting record
    pub created: Timestamp,
    /// Local address of each side, indexed by [`Side::index`]
    pub laddrs: [IpAddr; 2],
    /// Mark the caller-side RTP stream weak instead of the session strong
    pub weak: bool,
    /// Local RTP port of the caller side; RTCP uses the next one
    pub port: u16,
    /// Pre-opened caller-side sockets
    pub fds: SocketPair,
}

/// One call's media relationship
pub struct Session {
    seuid: u64,
    call_id: Mutex<Option<String>>,
    tag: Mutex<Option<String>>,
    tag_nomedianum: String,
    strong: AtomicBool,
    complete: AtomicBool,
    rtp: Rco<Pipe>,
    rtcp: Rco<Pipe>,
    acct: Mutex<Option<Accounting>>,
    log: Rco<SessionLog>,
    timeout_data: Mutex<Option<TimeoutData>>,
    stats: Arc<StatsSink>,
    sessinfo: Arc<SessionInfo>,
    modules: Option<Arc<ModuleChain>>,
    clock: Arc<dyn Clock>,
    events: Option<EventSender>,
}

/// Tag with any `;<medianum>` suffix cut off at the first separator
pub fn strip_medianum(tag: &str) -> &str {
    match tag.find(';') {
        Some(pos) => &tag[..pos],
        None => tag,
    }
}

fn with_stream(pipe: &Rco<Pipe>, side: Side, op: impl FnOnce(&Stream)) {
    pipe.call("stream", |p| p.stream(side).call("configure", op));
}

fn stream_uid(pipe: &Rco<Pipe>, side: Side) -> u64 {
    pipe.call("stream", |p| p.stream(side).call("stuid", |s| s.stuid()))
}

impl Session {
    /// Build, wire and register a new session
    ///
    /// The returned handle is the caller's reference; the registry holds its
    /// own. On error nothing acquired along the way stays referenced.
    pub fn construct(ctx: &RelayContext, args: SessionArgs) -> Result<Rco<Session>> {
        let config = &ctx.config;
        let mut unwind = Unwind::new("session");

        let seuid = ctx.uids.next();

        let log = SessionLog::new_shared(&config.app_name, &args.call_id, Arc::clone(&ctx.faults));
        let release = log.alias();
        unwind.push("log", move || release.decref());
        log.call("start", |l| l.start(config));
        let level = parse_log_level(&config.log_level)?;
        log.call("set_level", |l| l.set_level(level));

        let mut pipe_args = PipeArgs {
            seuid,
            streams: &ctx.rtp_streams,
            uids: &ctx.uids,
            log: &log,
            stats: &ctx.stats,
            media: MediaType::Rtp,
            faults: &ctx.faults,
        };
        let rtp = Pipe::construct(&pipe_args)?;
        let release = rtp.alias();
        unwind.push("rtp pipe", move || release.decref());

        pipe_args.streams = &ctx.rtcp_streams;
        pipe_args.media = MediaType::Rtcp;
        let rtcp = Pipe::construct(&pipe_args)?;
        let release = rtcp.alias();
        unwind.push("rtcp pipe", move || release.decref());

        let mut acct = Accounting::new(seuid);
        acct.init_ts = args.created;

        let tag_nomedianum = strip_medianum(&args.from_tag).to_string();

        for side in Side::BOTH {
            let laddr = args.laddrs[side.index()];
            with_stream(&rtp, side, |s| s.set_laddr(laddr));
            with_stream(&rtcp, side, |s| s.set_laddr(laddr));
        }

        let strong = !args.weak;
        if args.weak {
            with_stream(&rtp, Side::Caller, |s| s.set_weak(true));
        }

        let rtcp_port = args.port.checked_add(1).ok_or_else(|| {
            Error::allocation("rtcp port", format!("no port above {}", args.port))
        })?;
        with_stream(&rtp, Side::Caller, |s| s.set_port(args.port));
        with_stream(&rtcp, Side::Caller, |s| s.set_port(rtcp_port));

        let mut caller_ttl: Option<Rco<Ttl>> = None;
        for side in Side::BOTH {
            let token = match (&caller_ttl, config.ttl_mode) {
                (Some(shared), TtlMode::Shared) => shared.incref(),
                _ => Ttl::new_shared(config.max_setup_ttl, Arc::clone(&ctx.faults)),
            };
            if side == Side::Caller {
                caller_ttl = Some(token.incref());
            }
            let rtp_ref = token.incref();
            with_stream(&rtp, side, move |s| s.set_ttl(rtp_ref));
            with_stream(&rtcp, side, move |s| s.set_ttl(token));
        }
        if let Some(token) = caller_ttl {
            token.decref();
        }

        for side in Side::BOTH {
            let rtp_stuid = stream_uid(&rtp, side);
            let rtcp_stuid = stream_uid(&rtcp, side);
            with_stream(&rtp, side, |s| s.link_sibling(rtcp_stuid));
            with_stream(&rtcp, side, |s| s.link_sibling(rtp_stuid));
        }

        let modules = (ctx.modules.count_sess_acct() > 0).then(|| Arc::clone(&ctx.modules));

        let session = Rco::with_faults(
            "session",
            Session {
                seuid,
                call_id: Mutex::new(Some(args.call_id.clone())),
                tag: Mutex::new(Some(args.from_tag)),
                tag_nomedianum,
                strong: AtomicBool::new(strong),
                complete: AtomicBool::new(false),
                rtp: rtp.alias(),
                rtcp: rtcp.alias(),
                acct: Mutex::new(Some(acct)),
                log: log.alias(),
                timeout_data: Mutex::new(None),
                stats: Arc::clone(&ctx.stats),
                sessinfo: Arc::clone(&ctx.sessinfo),
                modules,
                clock: Arc::clone(&ctx.clock),
                events: ctx.events.clone(),
            },
            Arc::clone(&ctx.faults),
        );

        if let Err(e) = ctx.sessinfo.append(seuid, Side::Caller, args.fds) {
            // No destructor yet: the parts are released by the unwind steps
            session.decref();
            return Err(e);
        }
        unwind.commit();

        ctx.sessions.append(&args.call_id, &session);
        ctx.processor.nudge();
        session.attach(|session: &Session| session.release());

        ctx.stats.update_by_name(names::NSESS_CREATED, 1);
        debug!(seuid, call_id = %args.call_id, "session created");
        ctx.emit(SessionEvent::SessionCreated {
            seuid,
            call_id: args.call_id,
        });
        Ok(session)
    }

    fn release(&self) {
        let destroy_ts = self.clock.now();
        let mut acct = self
            .acct
            .lock()
            .take()
            .unwrap_or_else(|| Accounting::new(self.seuid));
        acct.destroy_ts = destroy_ts;
        let duration = acct.duration();

        acct.rtp = self.rtp.call("get_stats", |p| p.get_stats());
        acct.rtcp = self.rtcp.call("get_stats", |p| p.get_stats());
        if self.is_complete() {
            self.rtp.call("upd_cntrs", |p| p.upd_cntrs(&acct.rtp));
            self.rtcp.call("upd_cntrs", |p| p.upd_cntrs(&acct.rtcp));
        }

        let (port0, port1) = self.rtp.call("stream", |p| {
            (
                p.stream(Side::Caller).call("port", |s| s.port()),
                p.stream(Side::Callee).call("port", |s| s.port()),
            )
        });
        self.log.call("info", |l| {
            l.info(&format!("session on ports {}/{} is cleaned up", port0, port1))
        });

        for side in Side::BOTH {
            self.sessinfo.remove(self.seuid, side);
        }
        self.stats.update_by_name(names::NSESS_DESTROYED, 1);
        self.stats.update_by_name_d(names::TOTAL_DURATION, duration);

        if let Some(modules) = &self.modules {
            acct.call_id = self.call_id.lock().take();
            acct.from_tag = self.tag.lock().take();
            self.rtp.call("stream", |p| {
                let analyzed = |side: Side| {
                    p.stream(side).call("analyzer", |s| {
                        s.analyzer()
                            .map(|a| (a.get_stats(), a.get_jstats()))
                            .unwrap_or_default()
                    })
                };
                (acct.rasto, acct.jrasto) = analyzed(Side::Caller);
                (acct.rasta, acct.jrasta) = analyzed(Side::Callee);
            });
            modules.do_acct(&acct);
        }
        drop(acct);

        self.log.decref();
        self.timeout_data.lock().take();
        self.call_id.lock().take();
        self.tag.lock().take();

        info!(seuid = self.seuid, duration, "session destroyed");
        context::emit(
            self.events.as_ref(),
            SessionEvent::SessionDestroyed {
                seuid: self.seuid,
                duration,
            },
        );

        self.rtcp.decref();
        self.rtp.decref();
    }

    pub fn seuid(&self) -> u64 {
        self.seuid
    }

    /// Call id; empty once moved into the accounting record
    pub fn call_id(&self) -> String {
        self.call_id.lock().clone().unwrap_or_default()
    }

    /// From tag as given at construction, medianum included
    pub fn tag(&self) -> String {
        self.tag.lock().clone().unwrap_or_default()
    }

    pub fn tag_nomedianum(&self) -> &str {
        &self.tag_nomedianum
    }

    pub fn rtp(&self) -> &Rco<Pipe> {
        &self.rtp
    }

    pub fn rtcp(&self) -> &Rco<Pipe> {
        &self.rtcp
    }

    pub fn pipe(&self, media: MediaType) -> &Rco<Pipe> {
        match media {
            MediaType::Rtp => &self.rtp,
            MediaType::Rtcp => &self.rtcp,
        }
    }

    pub fn log(&self) -> &Rco<SessionLog> {
        &self.log
    }

    /// Strong sessions survive until explicitly deleted
    pub fn is_strong(&self) -> bool {
        self.strong.load(Ordering::Relaxed)
    }

    pub fn set_strong(&self, strong: bool) {
        self.strong.store(strong, Ordering::Relaxed);
    }

    /// Weak flag of the RTP stream on `side`
    pub fn is_weak(&self, side: Side) -> bool {
        self.rtp
            .call("stream", |p| p.stream(side).call("is_weak", |s| s.is_weak()))
    }

    pub fn set_weak(&self, side: Side, weak: bool) {
        with_stream(&self.rtp, side, |s| s.set_weak(weak));
    }

    /// Whether neither the strong flag nor any weak flag holds the session
    pub fn is_unreferenced(&self) -> bool {
        !self.is_strong() && !Side::BOTH.iter().any(|&side| self.is_weak(side))
    }

    /// Whether setup finished; only complete sessions feed the pipe counters
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Relaxed)
    }

    pub fn set_complete(&self) {
        self.complete.store(true, Ordering::Relaxed);
    }

    /// Creation time
    pub fn init_ts(&self) -> Timestamp {
        self.acct
            .lock()
            .as_ref()
            .map(|a| a.init_ts)
            .unwrap_or_default()
    }

    /// Attach where to report a timeout; replaces any previous target
    pub fn set_timeout_data(&self, data: Option<TimeoutData>) {
        *self.timeout_data.lock() = data;
    }

    pub fn timeout_data(&self) -> Option<TimeoutData> {
        self.timeout_data.lock().clone()
    }

    /// Ticks left before the session expires, as seen by the RTP pipe
    pub fn get_ttl(&self) -> u32 {
        self.rtp.call("get_ttl", |p| p.get_ttl())
    }

    /// Counted handles to the distinct TTL tokens of both pipes
    pub fn ttl_tokens(&self) -> Vec<Rco<Ttl>> {
        let mut tokens = self.rtp.call("ttl_tokens", |p| p.ttl_tokens());
        tokens.extend(self.rtcp.call("ttl_tokens", |p| p.ttl_tokens()));
        unique_tokens(tokens)
    }

    /// Decrement every distinct TTL token once; returns how many were touched
    pub fn decr_ttl(&self) -> usize {
        let tokens = self.ttl_tokens();
        let touched = tokens.len();
        for token in tokens {
            token.call("decr", |t| t.decr());
            token.decref();
        }
        touched
    }
}
