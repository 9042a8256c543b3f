use crate::backend::status::StatusSnapshot;
use crate::workflow::guard::HandledRequests;

/// A completion the detector is willing to believe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedCompletion {
    pub shareable_link: Option<String>,
}

/// Decides whether a snapshot reports a completion worth trusting.
///
/// A raw `completed` status is not enough: the backend has been observed
/// reporting it while `awaiting_user` is still set, and acting on that would
/// abandon a job that still wants input. Completion is confirmed only when
/// the status says completed, no user input is pending, and at least one
/// piece of corroborating evidence is present: a shareable link, both
/// interactive steps already serviced on our side, or the backend's own
/// auto-skip marker.
pub fn detect_completion(
    snapshot: &StatusSnapshot,
    handled: &HandledRequests,
) -> Option<ConfirmedCompletion> {
    if !snapshot.reports_completed() {
        return None;
    }
    if snapshot.awaiting_user {
        return None;
    }

    let shareable_link = snapshot
        .shareable_link
        .as_deref()
        .map(str::trim)
        .filter(|link| !link.is_empty())
        .map(str::to_string);

    let corroborated =
        shareable_link.is_some() || handled.both_handled() || snapshot.auto_skip_handled;
    if !corroborated {
        return None;
    }

    Some(ConfirmedCompletion { shareable_link })
}
