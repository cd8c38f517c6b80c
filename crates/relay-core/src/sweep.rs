//! Periodic TTL sweep
//!
//! Each tick either expires a session whose RTP pipe ran out of TTL or
//! counts its TTL down by one. Tokens shared between streams are counted
//! down once per tick, never once per stream.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::context::RelayContext;
use crate::events::SessionEvent;
use crate::stats::names;

/// What one sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions looked at
    pub scanned: usize,
    /// Distinct TTL tokens counted down
    pub decremented: usize,
    /// Sessions expired and released
    pub expired: usize,
}

/// Drives TTL expiration for every registered session
#[derive(Clone)]
pub struct TtlSweeper {
    ctx: RelayContext,
}

impl TtlSweeper {
    pub fn new(ctx: RelayContext) -> Self {
        Self { ctx }
    }

    /// Run a single sweep over the registry
    pub fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for session in self.ctx.sessions.all() {
            report.scanned += 1;

            if session.call("get_ttl", |s| s.get_ttl()) > 0 {
                report.decremented += session.call("decr_ttl", |s| s.decr_ttl());
                session.decref();
                continue;
            }

            let (seuid, call_id, notify) = session.call("timeout", |s| {
                s.log().call("warn", |l| l.warn("session timeout"));
                (s.seuid(), s.call_id(), s.timeout_data())
            });
            info!(seuid, call_id = %call_id, "session timed out");
            self.ctx.stats.update_by_name(names::NSESS_TIMEOUT, 1);
            self.ctx.emit(SessionEvent::SessionTimeout {
                seuid,
                call_id: call_id.clone(),
                notify,
            });

            self.ctx.sessions.remove(&call_id, &session);
            session.decref();
            report.expired += 1;
        }

        if report.expired > 0 {
            debug!(?report, "sweep finished");
        }
        report
    }

    /// Sweep every `period` on the current runtime until the handle is stopped
    pub fn spawn(self, period: Duration) -> SweeperHandle {
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep_once();
            }
        });
        debug!(?period, "TTL sweeper started");
        SweeperHandle { task }
    }
}

/// Handle to a running sweeper task
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop sweeping
    pub fn stop(self) {
        self.task.abort();
        debug!("TTL sweeper stopped");
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
