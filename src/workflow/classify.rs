use crate::backend::status::StatusSnapshot;

/// The single pending condition one snapshot resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingRequest {
    None,
    /// The backend's own attempt counter is past its limit; no further
    /// prompting is allowed.
    RetryExhausted { attempts: u32, max_attempts: u32 },
    IconRequest { message: String },
    UrlNameConflict { taken_name: String },
}

/// Decides which pending-user-input condition a snapshot reports.
///
/// The backend's flags are not mutually exclusive: a stale url-taken flag can
/// linger while an icon request is raised, or the attempt counter can run
/// past its limit while other flags are still set. Priority order:
///
/// 1. attempt counter past its limit (both counters must be reported);
/// 2. icon request when a url-taken flag is set in the same snapshot. Icon
///    resolution precedes url naming in the backend's protocol, so the icon
///    signal wins here even without `awaiting_user`;
/// 3. url-name conflict while the job awaits input;
/// 4. icon request while the job awaits input;
/// 5. nothing pending.
pub fn classify_pending(snapshot: &StatusSnapshot) -> PendingRequest {
    if let (Some(attempts), Some(max_attempts)) =
        (snapshot.url_attempts, snapshot.max_url_attempts)
    {
        if attempts > max_attempts {
            return PendingRequest::RetryExhausted {
                attempts,
                max_attempts,
            };
        }
    }

    let icon_message = snapshot
        .icon_request_message
        .as_deref()
        .map(str::trim)
        .filter(|message| !message.is_empty());

    if snapshot.url_name_taken {
        if let Some(message) = icon_message {
            return PendingRequest::IconRequest {
                message: message.to_string(),
            };
        }
    }

    if snapshot.awaiting_user && snapshot.url_name_taken {
        return PendingRequest::UrlNameConflict {
            taken_name: snapshot.original_url_name.clone().unwrap_or_default(),
        };
    }

    if snapshot.awaiting_user {
        if let Some(message) = icon_message {
            return PendingRequest::IconRequest {
                message: message.to_string(),
            };
        }
    }

    PendingRequest::None
}
