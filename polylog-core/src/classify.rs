//! Plan/implementation pairing
//!
//! Claude Code's plan mode ends by starting a fresh session whose first
//! message is the approved plan. Both sessions keep the same slug, which is
//! the only link between them.

use crate::types::{SessionSummary, SessionType};
use std::collections::HashSet;

/// First-message prefix of a session started from an approved plan.
pub const IMPLEMENTATION_PREFIX: &str = "Implement the following plan";

/// Tag sessions in one listing as plan or implementation.
///
/// A session whose first message starts with [`IMPLEMENTATION_PREFIX`] is
/// an implementation. Any other session sharing its slug is a plan. Sessions
/// without a slug or with an unmatched slug are left untagged.
pub fn classify_session_types(sessions: &mut [SessionSummary]) {
    let implemented: HashSet<String> = sessions
        .iter()
        .filter(|s| is_implementation(s))
        .filter_map(|s| s.slug.clone())
        .collect();

    for session in sessions.iter_mut() {
        session.session_type = if is_implementation(session) {
            Some(SessionType::Implementation)
        } else if session
            .slug
            .as_ref()
            .is_some_and(|slug| implemented.contains(slug))
        {
            Some(SessionType::Plan)
        } else {
            None
        };
    }
}

fn is_implementation(session: &SessionSummary) -> bool {
    session.first_message.starts_with(IMPLEMENTATION_PREFIX)
}

/// Session on the other side of `session`'s pairing, if any.
///
/// `sessions` must already be classified.
pub fn counterpart<'a>(
    session: &SessionSummary,
    sessions: &'a [SessionSummary],
) -> Option<&'a SessionSummary> {
    let slug = session.slug.as_deref()?;
    let wanted = match session.session_type? {
        SessionType::Plan => SessionType::Implementation,
        SessionType::Implementation => SessionType::Plan,
    };
    // Listings are newest first; the closest counterpart wins.
    sessions.iter().find(|other| {
        other.session_id != session.session_id
            && other.slug.as_deref() == Some(slug)
            && other.session_type == Some(wanted)
    })
}
