use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::backend::client::BackendClientError;
use crate::backend::request::sanitize_url_name;
use crate::backend::status::{JobId, StatusSnapshot, UrlNameOutcome};
use crate::workflow::classify::{classify_pending, PendingRequest};
use crate::workflow::completion::detect_completion;
use crate::workflow::guard::HandledRequests;
use crate::workflow::phase::{PhaseTransition, WorkflowPhase};
use crate::workflow::retry::{RetryVerdict, UrlNameRetry, DEFAULT_MAX_URL_ATTEMPTS};
use crate::workflow::RequestKind;

pub const DEFAULT_TRANSPORT_FAILURE_LIMIT: u32 = 3;

/// Per-job bounds the machine enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowLimits {
    /// Consecutive failed polls tolerated before the job is declared lost.
    pub transport_failure_limit: u32,
    /// Url-name attempt budget used when the backend does not report its own.
    pub max_url_attempts: u32,
}

impl Default for WorkflowLimits {
    fn default() -> Self {
        Self {
            transport_failure_limit: DEFAULT_TRANSPORT_FAILURE_LIMIT,
            max_url_attempts: DEFAULT_MAX_URL_ATTEMPTS,
        }
    }
}

/// What the poll loop should do after feeding one observation to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    KeepPolling,
    /// Suspend and ask the user for an icon decision.
    PromptIcon { message: String },
    /// Suspend and ask the user for a replacement url name.
    PromptUrlName {
        taken_name: String,
        attempt: u32,
        max_attempts: u32,
    },
    Completed { shareable_link: Option<String> },
    ManualCompletionRequired,
    Failed { reason: String },
}

/// Result of submitting an icon decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconDecisionOutcome {
    /// Decision accepted; polling resumes.
    Resumed,
    /// The chosen file failed local validation; the job needs manual
    /// completion in Telegram.
    RejectedManualCompletion { reason: String },
}

/// Result of submitting a replacement url name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlNameDecisionOutcome {
    /// Name accepted; polling resumes.
    Resumed,
    /// The replacement is itself taken; the user is prompted again.
    StillTaken { attempt: u32, max_attempts: u32 },
    /// Accepting the name finished the pack in the same round trip.
    Completed { shareable_link: Option<String> },
    /// The attempt budget ran out; no further prompts.
    AttemptsExhausted,
}

/// Caller-facing failures of the workflow surface.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("job is not awaiting a {kind} decision (current phase: {phase})")]
    NotAwaiting {
        kind: RequestKind,
        phase: WorkflowPhase,
    },
    #[error("the {kind} request was already handled for this job")]
    AlreadyHandled { kind: RequestKind },
    #[error("replacement url name rejected: {message}")]
    InvalidUrlName { message: String },
    #[error("backend call failed: {0}")]
    Backend(#[from] BackendClientError),
    #[error("workflow is no longer running")]
    WorkflowGone,
}

/// State core of one pack-creation workflow.
///
/// Owns the phase, the idempotency guard, and the retry bookkeeping, and is
/// advanced purely by explicit observation calls. No I/O, no timers: the
/// driver feeds it snapshots, poll errors, and resolution replies, and acts
/// on the returned outcomes. This keeps every transition decision
/// synchronously testable.
#[derive(Debug)]
pub struct WorkflowMachine {
    job_id: JobId,
    phase: WorkflowPhase,
    handled: HandledRequests,
    retry: Option<UrlNameRetry>,
    limits: WorkflowLimits,
    consecutive_transport_failures: u32,
    saw_any_snapshot: bool,
    last_snapshot_clean: bool,
    any_resolve_succeeded: bool,
    transitions: Vec<PhaseTransition>,
}

impl WorkflowMachine {
    pub fn new(job_id: JobId, limits: WorkflowLimits) -> Self {
        Self {
            job_id,
            phase: WorkflowPhase::Idle,
            handled: HandledRequests::new(),
            retry: None,
            limits,
            consecutive_transport_failures: 0,
            saw_any_snapshot: false,
            last_snapshot_clean: false,
            any_resolve_succeeded: false,
            transitions: Vec::new(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn phase(&self) -> WorkflowPhase {
        self.phase
    }

    /// Every phase change so far, oldest first.
    pub fn transitions(&self) -> &[PhaseTransition] {
        self.transitions.as_slice()
    }

    pub fn begin(&mut self) {
        self.shift(WorkflowPhase::Starting, "pack creation requested");
    }

    /// The backend accepted the job and assigned its id.
    pub fn start_succeeded(&mut self, job_id: JobId) {
        self.job_id = job_id;
        self.shift(WorkflowPhase::Polling, "backend accepted the job");
    }

    /// The start call failed. Start is not idempotent (a blind resubmission
    /// could create a duplicate remote job), so every start failure is final.
    pub fn start_failed(&mut self, error: &BackendClientError) -> String {
        let reason = format!("failed to start pack creation: {error}");
        self.shift(WorkflowPhase::Failed, reason.clone());
        reason
    }

    /// Feeds one successfully polled snapshot through failure detection,
    /// completion detection, and pending-request classification. Confirmed
    /// completion outranks pending-request handling, so a final snapshot
    /// that is both complete and stale-flagged finishes the job instead of
    /// re-prompting; the detector's own `awaiting_user` check keeps it from
    /// ever preempting a genuine pending request.
    pub fn observe_snapshot(&mut self, snapshot: &StatusSnapshot) -> StepOutcome {
        self.consecutive_transport_failures = 0;
        self.saw_any_snapshot = true;

        if snapshot.reports_failure() {
            self.last_snapshot_clean = false;
            let reason = snapshot
                .error_message
                .as_deref()
                .map(str::trim)
                .filter(|message| !message.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!("backend reported status '{}'", snapshot.status.trim())
                });
            self.shift(WorkflowPhase::Failed, reason.clone());
            return StepOutcome::Failed { reason };
        }

        let pending = classify_pending(snapshot);
        self.last_snapshot_clean = matches!(pending, PendingRequest::None);

        if let Some(completion) = detect_completion(snapshot, &self.handled) {
            self.shift(WorkflowPhase::Completed, "backend confirmed completion");
            return StepOutcome::Completed {
                shareable_link: completion.shareable_link,
            };
        }

        match pending {
            PendingRequest::RetryExhausted {
                attempts,
                max_attempts,
            } => {
                self.retry = None;
                self.shift(
                    WorkflowPhase::ManualCompletionRequired,
                    format!("url name attempts exhausted ({attempts} of {max_attempts})"),
                );
                StepOutcome::ManualCompletionRequired
            }
            PendingRequest::IconRequest { message } => {
                if self.handled.has_handled(RequestKind::Icon) {
                    debug!(
                        job_id = %self.job_id,
                        "icon request already handled; continuing to poll"
                    );
                    return StepOutcome::KeepPolling;
                }
                self.handled.mark_handled(RequestKind::Icon);
                self.shift(WorkflowPhase::AwaitingIcon, "backend requested a pack icon");
                StepOutcome::PromptIcon { message }
            }
            PendingRequest::UrlNameConflict { taken_name } => {
                if self.handled.has_handled(RequestKind::UrlName) {
                    debug!(
                        job_id = %self.job_id,
                        "url-name conflict already handled; continuing to poll"
                    );
                    return StepOutcome::KeepPolling;
                }
                self.handled.mark_handled(RequestKind::UrlName);
                let max_attempts = snapshot
                    .max_url_attempts
                    .unwrap_or(self.limits.max_url_attempts);
                let retry = UrlNameRetry::first(taken_name.clone(), max_attempts);
                let attempt = retry.attempt();
                let max_attempts = retry.max_attempts();
                self.retry = Some(retry);
                self.shift(
                    WorkflowPhase::AwaitingUrlName,
                    "backend reported the url name as taken",
                );
                StepOutcome::PromptUrlName {
                    taken_name,
                    attempt,
                    max_attempts,
                }
            }
            PendingRequest::None => StepOutcome::KeepPolling,
        }
    }

    /// Feeds one failed poll. Transport failures are tolerated up to the
    /// configured consecutive bound; a missing job routes through the
    /// disappearance heuristic; anything else is a broken backend contract.
    pub fn observe_poll_error(&mut self, error: &BackendClientError) -> StepOutcome {
        match error {
            BackendClientError::NotFound => self.observe_not_found(),
            BackendClientError::Transport { message } => {
                self.consecutive_transport_failures += 1;
                if self.consecutive_transport_failures >= self.limits.transport_failure_limit {
                    let reason = format!(
                        "backend unreachable after {} consecutive poll failures: {message}",
                        self.consecutive_transport_failures
                    );
                    self.shift(WorkflowPhase::Failed, reason.clone());
                    StepOutcome::Failed { reason }
                } else {
                    warn!(
                        job_id = %self.job_id,
                        failures = self.consecutive_transport_failures,
                        limit = self.limits.transport_failure_limit,
                        %message,
                        "poll failed; will retry"
                    );
                    StepOutcome::KeepPolling
                }
            }
            other => {
                let reason = format!("unexpected poll failure: {other}");
                self.shift(WorkflowPhase::Failed, reason.clone());
                StepOutcome::Failed { reason }
            }
        }
    }

    /// The active-time budget ran out. The driver only charges time spent
    /// polling, never time spent awaiting a user decision.
    pub fn time_ceiling_exceeded(&mut self, ceiling: Duration) -> StepOutcome {
        let reason = format!("job exceeded the {ceiling:?} active-time ceiling");
        self.shift(WorkflowPhase::Failed, reason.clone());
        StepOutcome::Failed { reason }
    }

    /// Gate for an icon decision. Distinguishes "already handled" (the
    /// idempotency guard rejecting a duplicate before any backend call) from
    /// "nothing to decide".
    pub fn ensure_awaiting_icon(&self) -> Result<(), WorkflowError> {
        if self.phase == WorkflowPhase::AwaitingIcon {
            return Ok(());
        }
        if self.handled.has_handled(RequestKind::Icon) {
            return Err(WorkflowError::AlreadyHandled {
                kind: RequestKind::Icon,
            });
        }
        Err(WorkflowError::NotAwaiting {
            kind: RequestKind::Icon,
            phase: self.phase,
        })
    }

    /// Gate for a url-name decision; also validates the replacement name
    /// before anything reaches the backend.
    pub fn ensure_awaiting_url_name(&self, new_name: &str) -> Result<(), WorkflowError> {
        if self.phase == WorkflowPhase::AwaitingUrlName {
            sanitize_url_name(new_name).map_err(|error| WorkflowError::InvalidUrlName {
                message: error.to_string(),
            })?;
            return Ok(());
        }
        if self.handled.has_handled(RequestKind::UrlName) {
            return Err(WorkflowError::AlreadyHandled {
                kind: RequestKind::UrlName,
            });
        }
        Err(WorkflowError::NotAwaiting {
            kind: RequestKind::UrlName,
            phase: self.phase,
        })
    }

    /// The backend accepted the icon decision; polling resumes.
    pub fn icon_submitted(&mut self) -> IconDecisionOutcome {
        self.any_resolve_succeeded = true;
        self.shift(WorkflowPhase::Polling, "icon decision submitted");
        IconDecisionOutcome::Resumed
    }

    /// The chosen icon failed local validation. The backend's bot flow cannot
    /// recover from a rejected icon mid-conversation, so the job is handed to
    /// the user for manual completion.
    pub fn icon_rejected(&mut self, reason: impl Into<String>) -> IconDecisionOutcome {
        let reason = reason.into();
        self.shift(
            WorkflowPhase::ManualCompletionRequired,
            format!("icon rejected: {reason}"),
        );
        IconDecisionOutcome::RejectedManualCompletion { reason }
    }

    /// Feeds the backend's reply to a url-name submission. A still-taken
    /// reply answers our own call directly, so it re-prompts without going
    /// through the idempotency guard; the attempt budget is the only brake.
    pub fn url_name_submitted(&mut self, reply: &UrlNameOutcome) -> UrlNameDecisionOutcome {
        self.any_resolve_succeeded = true;

        if reply.completed {
            let shareable_link = reply
                .shareable_link
                .as_deref()
                .map(str::trim)
                .filter(|link| !link.is_empty())
                .map(str::to_string);
            self.retry = None;
            self.shift(
                WorkflowPhase::Completed,
                "url name accepted; backend finished the pack",
            );
            return UrlNameDecisionOutcome::Completed { shareable_link };
        }

        if reply.still_taken {
            // Missing retry state fails closed.
            let verdict = self
                .retry
                .as_mut()
                .map(UrlNameRetry::record_still_taken)
                .unwrap_or(RetryVerdict::Exhausted);
            return match verdict {
                RetryVerdict::PromptAgain {
                    attempt,
                    max_attempts,
                } => {
                    self.shift(
                        WorkflowPhase::AwaitingUrlName,
                        format!("url name still taken (attempt {attempt} of {max_attempts})"),
                    );
                    UrlNameDecisionOutcome::StillTaken {
                        attempt,
                        max_attempts,
                    }
                }
                RetryVerdict::Exhausted => {
                    self.retry = None;
                    self.shift(
                        WorkflowPhase::ManualCompletionRequired,
                        "url name attempts exhausted",
                    );
                    UrlNameDecisionOutcome::AttemptsExhausted
                }
            };
        }

        self.retry = None;
        self.shift(WorkflowPhase::Polling, "url name accepted");
        UrlNameDecisionOutcome::Resumed
    }

    fn observe_not_found(&mut self) -> StepOutcome {
        let clean_disappearance =
            self.saw_any_snapshot && (self.last_snapshot_clean || self.any_resolve_succeeded);
        if clean_disappearance {
            self.shift(
                WorkflowPhase::Completed,
                "job no longer listed after a clean run; treating as completed",
            );
            StepOutcome::Completed {
                shareable_link: None,
            }
        } else {
            let reason = String::from("job disappeared before reaching a terminal status");
            self.shift(WorkflowPhase::Failed, reason.clone());
            StepOutcome::Failed { reason }
        }
    }

    fn shift(&mut self, to: WorkflowPhase, reason: impl Into<String>) {
        let reason = reason.into();
        let from = self.phase;
        if !from.can_transition_to(to) {
            error!(
                job_id = %self.job_id,
                from = from.as_str(),
                to = to.as_str(),
                "phase change outside the transition table"
            );
        }
        info!(
            job_id = %self.job_id,
            from = from.as_str(),
            to = to.as_str(),
            %reason,
            "workflow phase change"
        );
        self.phase = to;
        self.transitions.push(PhaseTransition {
            from,
            to,
            reason,
            at: Utc::now(),
        });
    }
}
