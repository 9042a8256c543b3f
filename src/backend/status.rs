use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier the automation backend assigns to one pack-creation job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Backend reply to `POST /api/pack-jobs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartReply {
    pub ok: bool,
    pub job_id: JobId,
}

/// One polled read of a job's state.
///
/// The flags here are reported independently by the backend's bot automation
/// and are not mutually consistent: `icon_request_message` and
/// `url_name_taken` can be set in the same snapshot, and `status` can read
/// `completed` while `awaiting_user` is still true. Callers interpret a
/// snapshot through `workflow::classify_pending` and
/// `workflow::detect_completion` rather than trusting any single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Raw status string as reported by the backend
    /// (`running`, `completed`, `error`, `failed`, ...).
    pub status: String,
    #[serde(default)]
    pub awaiting_user: bool,
    /// Prompt text of a pending icon request, when one is open.
    #[serde(default)]
    pub icon_request_message: Option<String>,
    /// Set when the requested pack url name is already in use.
    #[serde(default)]
    pub url_name_taken: bool,
    /// The url name that was originally requested for this pack.
    #[serde(default)]
    pub original_url_name: Option<String>,
    #[serde(default)]
    pub url_attempts: Option<u32>,
    #[serde(default)]
    pub max_url_attempts: Option<u32>,
    /// True when the backend skipped the icon step on its own.
    #[serde(default)]
    pub auto_skip_handled: bool,
    /// Present only once the pack is genuinely published.
    #[serde(default)]
    pub shareable_link: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl StatusSnapshot {
    /// True when the raw status string claims completion. Not sufficient on
    /// its own; see `workflow::detect_completion`.
    pub fn reports_completed(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("completed")
    }

    /// True when the raw status string reports a backend-side failure.
    pub fn reports_failure(&self) -> bool {
        matches!(
            self.status.trim().to_ascii_lowercase().as_str(),
            "error" | "failed"
        )
    }
}

/// Backend reply to a url-name resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlNameOutcome {
    /// The submitted replacement name is itself already in use.
    #[serde(default)]
    pub still_taken: bool,
    /// Accepting the name finished the whole pack in the same round trip.
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub shareable_link: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_serializes_transparently() {
        let id = JobId::new("job-42");
        let encoded = serde_json::to_string(&id).expect("job id should encode");
        assert_eq!(encoded, "\"job-42\"");

        let decoded: JobId = serde_json::from_str("\"job-42\"").expect("job id should decode");
        assert_eq!(decoded, id);
    }

    #[test]
    fn snapshot_decodes_with_missing_optional_fields() {
        let snapshot: StatusSnapshot =
            serde_json::from_str(r#"{"status":"running"}"#).expect("snapshot should decode");

        assert_eq!(snapshot.status, "running");
        assert!(!snapshot.awaiting_user);
        assert!(!snapshot.url_name_taken);
        assert_eq!(snapshot.icon_request_message, None);
        assert_eq!(snapshot.url_attempts, None);
        assert!(!snapshot.auto_skip_handled);
        assert_eq!(snapshot.shareable_link, None);
    }

    #[test]
    fn status_predicates_ignore_case_and_padding() {
        let completed: StatusSnapshot =
            serde_json::from_str(r#"{"status":" Completed "}"#).expect("snapshot should decode");
        assert!(completed.reports_completed());
        assert!(!completed.reports_failure());

        let failed: StatusSnapshot =
            serde_json::from_str(r#"{"status":"ERROR"}"#).expect("snapshot should decode");
        assert!(failed.reports_failure());
        assert!(!failed.reports_completed());

        let running: StatusSnapshot =
            serde_json::from_str(r#"{"status":"waiting_for_url_name"}"#)
                .expect("snapshot should decode");
        assert!(!running.reports_failure());
        assert!(!running.reports_completed());
    }

    #[test]
    fn url_name_outcome_defaults_to_plain_acceptance() {
        let outcome: UrlNameOutcome =
            serde_json::from_str("{}").expect("outcome should decode");
        assert!(!outcome.still_taken);
        assert!(!outcome.completed);
        assert_eq!(outcome.shareable_link, None);
    }
}
