//! Explicit session teardown requested by signaling

use tracing::{debug, info};

use crate::context::RelayContext;
use crate::error::{Error, Result};
use crate::matching::{compare_session_tags, TagMatch};
use crate::refcnt::Rco;
use crate::registry::MatchAction;
use crate::session::Session;
use crate::stream::Side;

/// Drop the hold a delete request has on matching sessions
///
/// A plain delete clears the strong flag; a weak delete clears the weak flag
/// of the side the request names. Sessions left with neither flag are removed
/// from the registry, which releases them. A tag without a medianum addresses
/// every media stream of the call; with a medianum only that stream.
///
/// Returns how many sessions matched.
pub fn delete_session(
    ctx: &RelayContext,
    call_id: &str,
    from_tag: &str,
    to_tag: Option<&str>,
    weak: bool,
) -> Result<usize> {
    let mut matched = 0usize;
    let mut unheld: Vec<Rco<Session>> = Vec::new();

    ctx.sessions.foreach_key(call_id, |session| {
        let tag = session.call("tag", |s| s.tag());
        let (side, how) = match compare_session_tags(&tag, from_tag) {
            TagMatch::NoMatch => match to_tag.map(|t| compare_session_tags(&tag, t)) {
                Some(m) if m != TagMatch::NoMatch => (Side::Callee, m),
                _ => return MatchAction::Continue,
            },
            m => (Side::Caller, m),
        };

        session.call("delete", |s| {
            if weak {
                s.set_weak(side, false);
            } else {
                s.set_strong(false);
            }
        });
        matched += 1;
        if session.call("is_unreferenced", |s| s.is_unreferenced()) {
            unheld.push(session.incref());
        }

        match how {
            TagMatch::Medianum(_) => MatchAction::Continue,
            _ => MatchAction::Break,
        }
    });

    if matched == 0 {
        debug!(call_id, from_tag, "delete: no such session");
        return Err(Error::SessionNotFound(call_id.to_string()));
    }

    for session in unheld {
        let seuid = session.call("seuid", |s| s.seuid());
        info!(call_id, seuid, weak, "session deleted");
        ctx.sessions.remove(call_id, &session);
        session.decref();
    }
    Ok(matched)
}
