//! Polling table shared with the data plane
//!
//! For every live session the table keeps the pre-opened sockets of each
//! side, so that the relay workers know what to poll. Signaling threads add
//! and remove entries; the data plane takes snapshots after being nudged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::stream::Side;

/// RTP and RTCP sockets of one side
#[derive(Debug, Clone)]
pub struct SocketPair {
    pub rtp: Arc<UdpSocket>,
    pub rtcp: Arc<UdpSocket>,
}

impl SocketPair {
    pub fn new(rtp: Arc<UdpSocket>, rtcp: Arc<UdpSocket>) -> Self {
        Self { rtp, rtcp }
    }
}

/// One side of one session, as seen by the poller
#[derive(Debug, Clone)]
pub struct PollEntry {
    pub seuid: u64,
    pub side: Side,
    pub fds: SocketPair,
}

/// Socket table for the data plane
#[derive(Debug)]
pub struct SessionInfo {
    sessions: RwLock<HashMap<u64, [Option<SocketPair>; 2]>>,
    max_sessions: Option<usize>,
}

impl SessionInfo {
    /// Create a table holding at most `max_sessions` sessions
    pub fn new(max_sessions: Option<usize>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Start polling `fds` for `side` of session `seuid`
    pub fn append(&self, seuid: u64, side: Side, fds: SocketPair) -> Result<()> {
        let mut sessions = self.sessions.write();
        if !sessions.contains_key(&seuid) {
            if let Some(limit) = self.max_sessions {
                if sessions.len() >= limit {
                    return Err(Error::allocation(
                        "polling table entry",
                        format!("{} sessions already polled", limit),
                    ));
                }
            }
        }
        let slots = sessions.entry(seuid).or_default();
        slots[side.index()] = Some(fds);
        debug!(seuid, side = side.index(), "added to polling table");
        Ok(())
    }

    /// Replace the sockets polled for `side` of session `seuid`
    pub fn update(&self, seuid: u64, side: Side, fds: SocketPair) -> Result<()> {
        let mut sessions = self.sessions.write();
        let slots = sessions
            .get_mut(&seuid)
            .ok_or_else(|| Error::InvalidState(format!("session {} is not polled", seuid)))?;
        slots[side.index()] = Some(fds);
        Ok(())
    }

    /// Stop polling `side` of session `seuid`; returns whether it was polled
    pub fn remove(&self, seuid: u64, side: Side) -> bool {
        let mut sessions = self.sessions.write();
        let Some(slots) = sessions.get_mut(&seuid) else {
            return false;
        };
        let removed = slots[side.index()].take().is_some();
        if slots.iter().all(Option::is_none) {
            sessions.remove(&seuid);
        }
        trace!(seuid, side = side.index(), removed, "removed from polling table");
        removed
    }

    /// Whether any side of `seuid` is polled
    pub fn contains(&self, seuid: u64) -> bool {
        self.sessions.read().contains_key(&seuid)
    }

    /// Copy of every polled side
    pub fn sockets(&self) -> Vec<PollEntry> {
        let sessions = self.sessions.read();
        let mut out = Vec::new();
        for (&seuid, slots) in sessions.iter() {
            for side in Side::BOTH {
                if let Some(fds) = &slots[side.index()] {
                    out.push(PollEntry {
                        seuid,
                        side,
                        fds: fds.clone(),
                    });
                }
            }
        }
        out
    }

    /// Number of sessions with at least one polled side
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// Wakes the data plane after the polling table changed
#[derive(Debug, Default)]
pub struct ProcessorHandle {
    notify: Notify,
    nudges: AtomicU64,
}

impl ProcessorHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tell the data plane to pick up table changes
    pub fn nudge(&self) {
        self.nudges.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Wait for the next nudge
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Number of nudges so far
    pub fn nudges(&self) -> u64 {
        self.nudges.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pair() -> SocketPair {
        let rtp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let rtcp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        SocketPair::new(Arc::new(rtp), Arc::new(rtcp))
    }

    #[tokio::test]
    async fn test_capacity_counts_sessions_not_sides() {
        let info = SessionInfo::new(Some(1));
        info.append(1, Side::Caller, pair().await).unwrap();
        info.append(1, Side::Callee, pair().await).unwrap();
        assert_eq!(info.len(), 1);
        assert_eq!(info.sockets().len(), 2);

        let err = info.append(2, Side::Caller, pair().await).unwrap_err();
        assert!(err.is_allocation());
    }

    #[tokio::test]
    async fn test_remove_drops_session_with_last_side() {
        let info = SessionInfo::new(None);
        info.append(7, Side::Caller, pair().await).unwrap();
        assert!(!info.remove(7, Side::Callee));
        assert!(info.contains(7));
        assert!(info.remove(7, Side::Caller));
        assert!(!info.contains(7));
        assert!(info.is_empty());
    }

    #[tokio::test]
    async fn test_update_requires_existing_session() {
        let info = SessionInfo::new(None);
        let err = info.update(3, Side::Callee, pair().await).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        info.append(3, Side::Caller, pair().await).unwrap();
        info.update(3, Side::Callee, pair().await).unwrap();
        assert_eq!(info.sockets().len(), 2);
    }

    #[tokio::test]
    async fn test_nudge_wakes_waiter() {
        let handle = Arc::new(ProcessorHandle::new());
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.notified().await })
        };
        handle.nudge();
        waiter.await.unwrap();
        assert_eq!(handle.nudges(), 1);
    }
}
