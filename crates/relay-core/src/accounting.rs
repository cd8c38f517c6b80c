//! Per-session accounting records and the module chain that consumes them

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::analyzer::{AnalyzerStats, JitterStats};
use crate::clock::Timestamp;
use crate::pipe::PipeAccounting;

/// Summary of one session, built up during its lifetime and handed to the
/// accounting modules at teardown
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accounting {
    /// Session uid
    pub seuid: u64,
    /// Creation time
    pub init_ts: Timestamp,
    /// Destruction time
    pub destroy_ts: Timestamp,
    /// Call id, moved in from the session at teardown
    pub call_id: Option<String>,
    /// From tag, moved in from the session at teardown
    pub from_tag: Option<String>,
    /// Final RTP pipe counters
    pub rtp: PipeAccounting,
    /// Final RTCP pipe counters
    pub rtcp: PipeAccounting,
    /// RTP analyzer stats, caller side
    pub rasto: AnalyzerStats,
    /// RTP analyzer stats, callee side
    pub rasta: AnalyzerStats,
    /// RTP jitter stats, caller side
    pub jrasto: JitterStats,
    /// RTP jitter stats, callee side
    pub jrasta: JitterStats,
}

impl Accounting {
    /// Empty record for session `seuid`
    pub fn new(seuid: u64) -> Self {
        Self {
            seuid,
            ..Default::default()
        }
    }

    /// Session lifetime in seconds, on the monotonic clock
    pub fn duration(&self) -> f64 {
        self.destroy_ts.mono_since(&self.init_ts)
    }
}

/// Pluggable consumer of accounting records
///
/// Modules run synchronously on the thread tearing the session down and must
/// not keep the record past the call.
pub trait AccountingModule: Send + Sync {
    /// Module name for logs
    fn name(&self) -> &str;

    /// Whether the module wants one record per session
    fn wants_session_acct(&self) -> bool {
        true
    }

    /// Consume the record of a session that is going away
    fn do_acct(&self, acct: &Accounting);
}

/// Ordered set of loaded accounting modules
#[derive(Default, Clone)]
pub struct ModuleChain {
    modules: Vec<Arc<dyn AccountingModule>>,
}

impl ModuleChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a module
    pub fn with_module(mut self, module: Arc<dyn AccountingModule>) -> Self {
        self.modules.push(module);
        self
    }

    /// Number of loaded modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Number of modules that want per-session accounting
    pub fn count_sess_acct(&self) -> usize {
        self.modules.iter().filter(|m| m.wants_session_acct()).count()
    }

    /// Hand `acct` to every module that wants it, in load order
    pub fn do_acct(&self, acct: &Accounting) {
        for module in self.modules.iter().filter(|m| m.wants_session_acct()) {
            debug!(module = module.name(), seuid = acct.seuid, "running session accounting");
            module.do_acct(acct);
        }
    }
}

impl fmt::Debug for ModuleChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.modules.iter().map(|m| m.name()).collect();
        f.debug_struct("ModuleChain").field("modules", &names).finish()
    }
}

/// Accounting module that writes one structured log record per session
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAccounting;

impl AccountingModule for LogAccounting {
    fn name(&self) -> &str {
        "log_acct"
    }

    fn do_acct(&self, acct: &Accounting) {
        info!(
            seuid = acct.seuid,
            call_id = acct.call_id.as_deref().unwrap_or("-"),
            from_tag = acct.from_tag.as_deref().unwrap_or("-"),
            duration = acct.duration(),
            rtp_relayed = acct.rtp.pcnts.nrelayed,
            rtp_dropped = acct.rtp.pcnts.ndropped,
            rtcp_relayed = acct.rtcp.pcnts.nrelayed,
            plost_o = acct.rasto.plost,
            plost_a = acct.rasta.plost,
            jmax_o = acct.jrasto.jmax,
            jmax_a = acct.jrasta.jmax,
            "session accounting"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<u64>>,
        session: bool,
    }

    impl AccountingModule for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        fn wants_session_acct(&self) -> bool {
            self.session
        }

        fn do_acct(&self, acct: &Accounting) {
            self.seen.lock().push(acct.seuid);
        }
    }

    #[test]
    fn test_chain_skips_modules_without_session_acct() {
        let wants = Arc::new(Collect {
            session: true,
            ..Default::default()
        });
        let skips = Arc::new(Collect::default());
        let chain = ModuleChain::new()
            .with_module(wants.clone())
            .with_module(skips.clone())
            .with_module(Arc::new(LogAccounting));

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.count_sess_acct(), 2);

        chain.do_acct(&Accounting::new(42));
        assert_eq!(*wants.seen.lock(), vec![42]);
        assert!(skips.seen.lock().is_empty());
    }

    #[test]
    fn test_duration_uses_monotonic_axis() {
        let mut acct = Accounting::new(1);
        acct.init_ts = Timestamp { wall: 100.0, mono: 10.0 };
        acct.destroy_ts = Timestamp { wall: 50.0, mono: 13.5 };
        assert_eq!(acct.duration(), 3.5);
    }
}
