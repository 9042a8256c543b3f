use crate::workflow::RequestKind;

/// Which interactive requests have already been serviced for one job.
///
/// Append-only: a kind is marked the moment the workflow suspends for it and
/// stays marked for the job's lifetime, so a poll tick that re-observes the
/// same pending condition cannot trigger a second prompt or a second
/// submission. A new job starts from an empty set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandledRequests {
    icon: bool,
    url_name: bool,
}

impl HandledRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_handled(&self, kind: RequestKind) -> bool {
        match kind {
            RequestKind::Icon => self.icon,
            RequestKind::UrlName => self.url_name,
        }
    }

    pub fn mark_handled(&mut self, kind: RequestKind) {
        match kind {
            RequestKind::Icon => self.icon = true,
            RequestKind::UrlName => self.url_name = true,
        }
    }

    /// True once both interactive steps have been serviced; used as
    /// completion evidence when the backend omits a shareable link.
    pub fn both_handled(&self) -> bool {
        self.icon && self.url_name
    }
}
