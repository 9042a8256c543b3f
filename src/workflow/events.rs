use std::sync::Arc;

use crate::backend::status::JobId;

/// Receives workflow notifications; implemented by the UI shell.
///
/// Each callback fires exactly once per event. A url-name prompt repeated
/// after a still-taken attempt is a new event and gets its own
/// `on_pending_url_name` call; terminal callbacks fire once per job, ever.
/// Callbacks run on the workflow task, so implementations should hand off to
/// their own event loop rather than block.
pub trait WorkflowObserver: Send + Sync + 'static {
    fn on_pending_icon(&self, job_id: &JobId, message: &str);
    fn on_pending_url_name(
        &self,
        job_id: &JobId,
        taken_name: &str,
        attempt: u32,
        max_attempts: u32,
    );
    fn on_completed(&self, job_id: &JobId, shareable_link: Option<&str>);
    fn on_failed(&self, job_id: &JobId, reason: &str);
    fn on_manual_completion_required(&self, job_id: &JobId);
}

pub type SharedWorkflowObserver = Arc<dyn WorkflowObserver>;

/// Observer that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl WorkflowObserver for NullObserver {
    fn on_pending_icon(&self, _job_id: &JobId, _message: &str) {}

    fn on_pending_url_name(
        &self,
        _job_id: &JobId,
        _taken_name: &str,
        _attempt: u32,
        _max_attempts: u32,
    ) {
    }

    fn on_completed(&self, _job_id: &JobId, _shareable_link: Option<&str>) {}

    fn on_failed(&self, _job_id: &JobId, _reason: &str) {}

    fn on_manual_completion_required(&self, _job_id: &JobId) {}
}
