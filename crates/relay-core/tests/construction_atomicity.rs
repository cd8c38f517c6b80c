//! A failed session construction leaves nothing behind

mod common;

use std::sync::Arc;

use rvoip_relay_core::prelude::*;
use rvoip_relay_core::stats::names;
use rvoip_relay_core::stream::StreamArgs;

use common::Harness;

fn assert_clean(h: &Harness, rtp_streams: usize, rtcp_streams: usize, sessions: usize) {
    assert_eq!(h.ctx.rtp_streams.len(), rtp_streams);
    assert_eq!(h.ctx.rtcp_streams.len(), rtcp_streams);
    assert_eq!(h.ctx.sessions.len(), sessions);
    assert_eq!(h.ctx.sessinfo.len(), sessions);
    assert_eq!(h.ctx.stats.get(names::NSESS_CREATED), sessions as u64);
    assert_eq!(h.faults.count(), 0);
}

#[tokio::test]
async fn test_bad_log_level_fails_before_pipes() {
    let bad = RelayConfig {
        log_level: "loud".to_string(),
        ..Default::default()
    };
    assert!(RelayContext::new(bad.clone()).is_err());

    // Swap the snapshot behind a running context
    let mut h = Harness::new(RelayConfig::default());
    h.ctx.config = Arc::new(bad);
    let err = h.create("call-1", "t1", false).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_clean(&h, 0, 0, 0);
}

#[tokio::test]
async fn test_rtcp_pipe_failure_releases_rtp_pipe() {
    let config = RelayConfig {
        max_streams: Some(2),
        ..Default::default()
    };
    let h = Harness::new(config);

    // Occupy one RTCP slot so the callee-side RTCP stream cannot register
    let blocker = Stream::construct(StreamArgs {
        stuid: h.ctx.uids.next(),
        seuid: 0,
        side: Side::Caller,
        media: MediaType::Rtcp,
        table: &h.ctx.rtcp_streams,
        faults: h.faults.clone(),
    })
    .unwrap();

    let err = h.create("call-1", "t1", false).await.unwrap_err();
    assert!(err.is_allocation());
    assert_clean(&h, 0, 1, 0);

    blocker.decref();
    let session = h.create("call-1", "t1", false).await.unwrap();
    assert_clean(&h, 2, 2, 1);
    session.decref();
}

#[tokio::test]
async fn test_port_overflow_fails_after_pipes() {
    let h = Harness::new(RelayConfig::default());
    let fds = common::sockets().await;
    let err = h.create_on_port("call-1", "t1", false, u16::MAX, fds).unwrap_err();
    assert!(matches!(err, Error::Allocation { what: "rtcp port", .. }));
    assert_clean(&h, 0, 0, 0);
}

#[tokio::test]
async fn test_full_polling_table_fails_last_step() {
    let config = RelayConfig {
        max_sessions: Some(1),
        ..Default::default()
    };
    let h = Harness::new(config);
    let first = h.create("call-1", "t1", false).await.unwrap();

    let err = h.create("call-2", "t2", false).await.unwrap_err();
    assert!(err.is_allocation());
    assert_clean(&h, 2, 2, 1);
    assert_eq!(h.ctx.sessions.count_key("call-2"), 0);
    assert_eq!(h.ctx.processor.nudges(), 1);

    // The survivor is untouched and can be torn down normally
    first.decref();
    delete_session(&h.ctx, "call-1", "t1", None, false).unwrap();
    assert_eq!(h.ctx.rtp_streams.len(), 0);
    assert_eq!(h.faults.count(), 0);
}

#[test]
fn test_failed_construction_is_retryable() {
    let h = Harness::new(RelayConfig {
        max_sessions: Some(1),
        ..Default::default()
    });
    tokio_test::block_on(async {
        let first = h.create("call-1", "t1", false).await.unwrap();
        assert!(h.create("call-1", "t1;2", false).await.is_err());

        first.decref();
        delete_session(&h.ctx, "call-1", "t1", None, false).unwrap();
        let again = h.create("call-1", "t1;2", false).await.unwrap();
        assert_eq!(h.ctx.sessions.count_key("call-1"), 1);
        again.decref();
    });
    assert_eq!(h.faults.count(), 0);
}
