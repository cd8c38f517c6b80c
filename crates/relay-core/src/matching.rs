//! Locating the session a signaling request refers to
//!
//! Sessions are looked up by call id and then told apart by tags. A tag may
//! carry a `;<medianum>` suffix selecting one media stream of a multi-stream
//! call; matching must never let one media stream's request land on another.

use crate::context::RelayContext;
use crate::refcnt::Rco;
use crate::registry::MatchAction;
use crate::session::Session;

/// Result of [`compare_session_tags`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagMatch {
    /// Tags differ
    NoMatch,
    /// Tags are identical
    Exact,
    /// Candidate is the reference followed by `;` and a medianum
    Medianum(u32),
}

impl TagMatch {
    /// Numeric code: 0 no match, 1 exact, 2 medianum
    pub fn code(&self) -> i32 {
        match self {
            TagMatch::NoMatch => 0,
            TagMatch::Exact => 1,
            TagMatch::Medianum(_) => 2,
        }
    }

    /// Parsed medianum, if any
    pub fn medianum(&self) -> Option<u32> {
        match self {
            TagMatch::Medianum(n) => Some(*n),
            _ => None,
        }
    }
}

/// Compare candidate tag `a` against reference tag `b`
///
/// The medianum is the run of decimal digits right after the `;`; anything
/// after the digits is ignored, no digits read as 0 and overflow saturates.
pub fn compare_session_tags(a: &str, b: &str) -> TagMatch {
    let Some(rest) = a.strip_prefix(b) else {
        return TagMatch::NoMatch;
    };
    if rest.is_empty() {
        return TagMatch::Exact;
    }
    match rest.strip_prefix(';') {
        Some(suffix) => TagMatch::Medianum(parse_medianum(suffix)),
        None => TagMatch::NoMatch,
    }
}

fn parse_medianum(text: &str) -> u32 {
    text.bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0u32, |n, d| n.saturating_mul(10).saturating_add(u32::from(d - b'0')))
}

/// Text from the last `;` on, if the tag has one
fn medianum_suffix(tag: &str) -> Option<&str> {
    tag.rfind(';').map(|pos| &tag[pos..])
}

/// How a lookup matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRank {
    /// The session's own from tag equals the request's from tag
    FromTag,
    /// The session's from tag matched the request's to tag
    ToTag,
}

/// Outcome of [`find_stream`]
#[derive(Debug)]
pub enum SessionLookup {
    /// No session under this call id matched
    NotFound,
    /// Matched session; the handle is a counted reference the caller releases
    Found {
        rank: MatchRank,
        session: Rco<Session>,
    },
}

impl SessionLookup {
    /// Numeric code: -1 not found, 0 matched by from tag, 1 matched by to tag
    pub fn rank(&self) -> i32 {
        match self {
            SessionLookup::NotFound => -1,
            SessionLookup::Found {
                rank: MatchRank::FromTag,
                ..
            } => 0,
            SessionLookup::Found {
                rank: MatchRank::ToTag,
                ..
            } => 1,
        }
    }

    /// The matched session, if any
    pub fn into_session(self) -> Option<Rco<Session>> {
        match self {
            SessionLookup::NotFound => None,
            SessionLookup::Found { session, .. } => Some(session),
        }
    }
}

/// Rank `session_tag` against a request's tags
pub fn match_session_tag(session_tag: &str, from_tag: &str, to_tag: Option<&str>) -> Option<MatchRank> {
    if session_tag == from_tag {
        return Some(MatchRank::FromTag);
    }
    let to_tag = to_tag?;
    match compare_session_tags(session_tag, to_tag) {
        TagMatch::Exact => Some(MatchRank::ToTag),
        TagMatch::Medianum(_) => {
            // The medianum is always carried on the from tag
            let ours = medianum_suffix(session_tag);
            let theirs = medianum_suffix(from_tag);
            (theirs.is_some() && ours == theirs).then_some(MatchRank::ToTag)
        }
        TagMatch::NoMatch => None,
    }
}

/// Find the session for `call_id` a request with these tags refers to
///
/// At most one session is returned; with several candidates the first one in
/// registry order wins, and that order is unspecified.
pub fn find_stream(
    ctx: &RelayContext,
    call_id: &str,
    from_tag: &str,
    to_tag: Option<&str>,
) -> SessionLookup {
    let mut found: Option<(MatchRank, Rco<Session>)> = None;
    ctx.sessions.foreach_key(call_id, |session| {
        let tag = session.call("tag", |s| s.tag());
        match match_session_tag(&tag, from_tag, to_tag) {
            Some(rank) => {
                debug_assert!(found.is_none(), "session scan matched twice");
                found = Some((rank, session.incref()));
                MatchAction::Break
            }
            None => MatchAction::Continue,
        }
    });
    match found {
        Some((rank, session)) => SessionLookup::Found { rank, session },
        None => SessionLookup::NotFound,
    }
}
