//! Shared process state passed into every constructor
//!
//! One context is built at startup and cloned wherever it is needed; every
//! field is shared, so clones see the same tables, counters and generator.

use std::sync::Arc;

use tracing::trace;

use crate::accounting::ModuleChain;
use crate::clock::{Clock, SystemClock};
use crate::config::RelayConfig;
use crate::error::Result;
use crate::events::{EventSender, SessionEvent};
use crate::refcnt::{AbortOnFault, FaultHandler};
use crate::registry::SessionRegistry;
use crate::sessinfo::{ProcessorHandle, SessionInfo};
use crate::stats::StatsSink;
use crate::stream::StreamTable;
use crate::uid::UidGenerator;

/// Configuration snapshot plus the process-wide collaborators of the core
#[derive(Clone)]
pub struct RelayContext {
    pub config: Arc<RelayConfig>,
    pub uids: Arc<UidGenerator>,
    pub rtp_streams: Arc<StreamTable>,
    pub rtcp_streams: Arc<StreamTable>,
    pub stats: Arc<StatsSink>,
    pub sessinfo: Arc<SessionInfo>,
    pub sessions: Arc<SessionRegistry>,
    pub modules: Arc<ModuleChain>,
    pub processor: Arc<ProcessorHandle>,
    pub clock: Arc<dyn Clock>,
    pub faults: Arc<dyn FaultHandler>,
    pub events: Option<EventSender>,
}

impl RelayContext {
    /// Validate `config` and create fresh shared state for it
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            rtp_streams: Arc::new(StreamTable::with_capacity_limit(
                "rtp_streams",
                config.max_streams,
            )),
            rtcp_streams: Arc::new(StreamTable::with_capacity_limit(
                "rtcp_streams",
                config.max_streams,
            )),
            sessinfo: Arc::new(SessionInfo::new(config.max_sessions)),
            config: Arc::new(config),
            uids: Arc::new(UidGenerator::new()),
            stats: Arc::new(StatsSink::new()),
            sessions: Arc::new(SessionRegistry::new()),
            modules: Arc::new(ModuleChain::new()),
            processor: Arc::new(ProcessorHandle::new()),
            clock: Arc::new(SystemClock::new()),
            faults: Arc::new(AbortOnFault),
            events: None,
        })
    }

    /// Route contract violations to `faults` instead of aborting
    pub fn with_fault_handler(mut self, faults: Arc<dyn FaultHandler>) -> Self {
        self.faults = faults;
        self
    }

    /// Load accounting modules
    pub fn with_modules(mut self, modules: ModuleChain) -> Self {
        self.modules = Arc::new(modules);
        self
    }

    /// Use `clock` for session timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Deliver lifecycle events to `events`
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Send `event` if anyone listens
    pub fn emit(&self, event: SessionEvent) {
        emit(self.events.as_ref(), event);
    }
}

pub(crate) fn emit(events: Option<&EventSender>, event: SessionEvent) {
    if let Some(tx) = events {
        if tx.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = RelayConfig {
            sweep_interval_ms: 0,
            ..Default::default()
        };
        assert!(RelayContext::new(config).is_err());

        let config = RelayConfig {
            log_level: "chatty".to_string(),
            ..Default::default()
        };
        assert!(matches!(RelayContext::new(config), Err(crate::error::Error::Config(_))));
    }

    #[test]
    fn test_clones_share_state() {
        let (tx, mut rx) = events::channel();
        let ctx = RelayContext::new(RelayConfig::default()).unwrap().with_events(tx);
        let copy = ctx.clone();
        copy.stats.update_by_name("probe", 2);
        assert_eq!(ctx.stats.get("probe"), 2);
        assert_eq!(ctx.uids.next() + 1, copy.uids.next());

        copy.emit(SessionEvent::SessionDestroyed {
            seuid: 1,
            duration: 0.0,
        });
        assert!(matches!(
            rx.try_recv(),
            Ok(SessionEvent::SessionDestroyed { seuid: 1, .. })
        ));
    }
}
