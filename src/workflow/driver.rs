use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::client::{IconDecision, SharedRemoteJobClient};
use crate::backend::request::PackCreationRequest;
use crate::backend::status::JobId;
use crate::icon::validate_icon_file;
use crate::workflow::events::SharedWorkflowObserver;
use crate::workflow::machine::{
    IconDecisionOutcome, StepOutcome, UrlNameDecisionOutcome, WorkflowError, WorkflowLimits,
    WorkflowMachine,
};
use crate::workflow::phase::WorkflowPhase;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_ACTIVE_TIME_CEILING_SECS: u64 = 600;

const COMMAND_CHANNEL_CAPACITY: usize = 8;

/// Knobs for one spawned workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub poll_interval: Duration,
    pub limits: WorkflowLimits,
    /// Budget for time spent starting and polling. Time suspended on a user
    /// prompt is not charged. `None` disables the ceiling.
    pub active_time_ceiling: Option<Duration>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            limits: WorkflowLimits::default(),
            active_time_ceiling: Some(Duration::from_secs(DEFAULT_ACTIVE_TIME_CEILING_SECS)),
        }
    }
}

enum Command {
    Phase {
        reply: oneshot::Sender<WorkflowPhase>,
    },
    ResolveIcon {
        decision: IconDecision,
        reply: oneshot::Sender<Result<IconDecisionOutcome, WorkflowError>>,
    },
    ResolveUrlName {
        name: String,
        reply: oneshot::Sender<Result<UrlNameDecisionOutcome, WorkflowError>>,
    },
}

/// Caller side of one running workflow task.
///
/// Dropping the handle without joining abandons the workflow: polling keeps
/// running until the job reaches a terminal phase, but a prompt nobody can
/// answer stops the task.
pub struct WorkflowHandle {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: JoinHandle<WorkflowPhase>,
}

impl WorkflowHandle {
    pub async fn phase(&self) -> Result<WorkflowPhase, WorkflowError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(Command::Phase { reply })
            .await
            .map_err(|_| WorkflowError::WorkflowGone)?;
        answer.await.map_err(|_| WorkflowError::WorkflowGone)
    }

    pub async fn resolve_icon(
        &self,
        decision: IconDecision,
    ) -> Result<IconDecisionOutcome, WorkflowError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(Command::ResolveIcon { decision, reply })
            .await
            .map_err(|_| WorkflowError::WorkflowGone)?;
        answer.await.map_err(|_| WorkflowError::WorkflowGone)?
    }

    pub async fn resolve_url_name(
        &self,
        name: impl Into<String>,
    ) -> Result<UrlNameDecisionOutcome, WorkflowError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(Command::ResolveUrlName {
                name: name.into(),
                reply,
            })
            .await
            .map_err(|_| WorkflowError::WorkflowGone)?;
        answer.await.map_err(|_| WorkflowError::WorkflowGone)?
    }

    /// Requests a cooperative stop. The task winds down without emitting any
    /// observer event; cancellation is the caller's own decision, not an
    /// outcome worth reporting back.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the task and returns the phase it stopped in. Terminal
    /// unless the workflow was cancelled or abandoned mid-flight.
    pub async fn join(self) -> WorkflowPhase {
        self.task.await.unwrap_or(WorkflowPhase::Failed)
    }
}

/// Spawns the polling task for one pack-creation job.
///
/// One task per job; the task owns the `WorkflowMachine` and is its only
/// writer. Callers interact through the returned handle, which serializes
/// decisions onto the task's command channel.
pub fn spawn_workflow(
    client: SharedRemoteJobClient,
    observer: SharedWorkflowObserver,
    request: PackCreationRequest,
    settings: WorkflowSettings,
) -> WorkflowHandle {
    let (commands, inbox) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let provisional = JobId::new(format!("local-{}", Uuid::new_v4().simple()));
    let task = DriverTask {
        client,
        observer,
        machine: WorkflowMachine::new(provisional, settings.limits),
        request,
        settings,
        inbox,
        inbox_closed: false,
        cancel: cancel.clone(),
        stopwatch: ActiveStopwatch::default(),
    };
    WorkflowHandle {
        commands,
        cancel,
        task: tokio::spawn(task.run()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopStep {
    Continue,
    Stop,
}

struct DriverTask {
    client: SharedRemoteJobClient,
    observer: SharedWorkflowObserver,
    machine: WorkflowMachine,
    request: PackCreationRequest,
    settings: WorkflowSettings,
    inbox: mpsc::Receiver<Command>,
    inbox_closed: bool,
    cancel: CancellationToken,
    stopwatch: ActiveStopwatch,
}

impl DriverTask {
    async fn run(mut self) -> WorkflowPhase {
        self.stopwatch.start();
        self.machine.begin();

        tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!(job_id = %self.machine.job_id(), "workflow cancelled during start");
                return self.machine.phase();
            }
            started = self.client.start(&self.request) => match started {
                Ok(job_id) => self.machine.start_succeeded(job_id),
                Err(error) => {
                    let reason = self.machine.start_failed(&error);
                    self.observer.on_failed(self.machine.job_id(), reason.as_str());
                    return self.machine.phase();
                }
            }
        }

        loop {
            let step = if self.machine.phase().is_awaiting_input() {
                self.run_suspended().await
            } else {
                self.run_polling().await
            };
            if step == LoopStep::Stop || self.machine.phase().is_terminal() {
                break;
            }
        }
        self.stopwatch.pause();
        self.machine.phase()
    }

    /// Polls at the configured interval until the phase leaves `Polling`.
    /// The first tick fires immediately, so a freshly started or freshly
    /// resumed job is polled without waiting out a full interval.
    async fn run_polling(&mut self) -> LoopStep {
        self.stopwatch.start();
        let mut ticks = interval(self.settings.poll_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(job_id = %self.machine.job_id(), "workflow cancelled");
                    return LoopStep::Stop;
                }
                command = self.inbox.recv(), if !self.inbox_closed => match command {
                    Some(command) => self.serve_command(command).await,
                    None => self.inbox_closed = true,
                },
                _ = ticks.tick() => self.handle_tick().await,
            }
            if self.machine.phase() != WorkflowPhase::Polling {
                self.stopwatch.pause();
                return LoopStep::Continue;
            }
        }
    }

    /// A prompt is open: no polling, no active-time charge. Only a command
    /// or cancellation can move the workflow on.
    async fn run_suspended(&mut self) -> LoopStep {
        loop {
            if self.inbox_closed {
                warn!(
                    job_id = %self.machine.job_id(),
                    phase = self.machine.phase().as_str(),
                    "workflow abandoned while awaiting user input"
                );
                return LoopStep::Stop;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(job_id = %self.machine.job_id(), "workflow cancelled");
                    return LoopStep::Stop;
                }
                command = self.inbox.recv() => match command {
                    Some(command) => self.serve_command(command).await,
                    None => self.inbox_closed = true,
                },
            }
            if !self.machine.phase().is_awaiting_input() {
                return LoopStep::Continue;
            }
        }
    }

    async fn serve_command(&mut self, command: Command) {
        match command {
            Command::Phase { reply } => {
                let _ = reply.send(self.machine.phase());
            }
            Command::ResolveIcon { decision, reply } => {
                let _ = reply.send(self.resolve_icon(decision).await);
            }
            Command::ResolveUrlName { name, reply } => {
                let _ = reply.send(self.resolve_url_name(name).await);
            }
        }
    }

    async fn handle_tick(&mut self) {
        if let Some(ceiling) = self.settings.active_time_ceiling {
            if self.stopwatch.elapsed() >= ceiling {
                let outcome = self.machine.time_ceiling_exceeded(ceiling);
                self.apply_outcome(outcome);
                return;
            }
        }
        let polled = self.client.poll(self.machine.job_id()).await;
        // A cancel that landed mid-poll drops the result unapplied.
        if self.cancel.is_cancelled() {
            return;
        }
        let outcome = match polled {
            Ok(snapshot) => self.machine.observe_snapshot(&snapshot),
            Err(error) => self.machine.observe_poll_error(&error),
        };
        self.apply_outcome(outcome);
    }

    fn apply_outcome(&self, outcome: StepOutcome) {
        match outcome {
            StepOutcome::KeepPolling => {}
            StepOutcome::PromptIcon { message } => {
                self.observer
                    .on_pending_icon(self.machine.job_id(), message.as_str());
            }
            StepOutcome::PromptUrlName {
                taken_name,
                attempt,
                max_attempts,
            } => {
                self.observer.on_pending_url_name(
                    self.machine.job_id(),
                    taken_name.as_str(),
                    attempt,
                    max_attempts,
                );
            }
            StepOutcome::Completed { shareable_link } => {
                self.observer
                    .on_completed(self.machine.job_id(), shareable_link.as_deref());
            }
            StepOutcome::ManualCompletionRequired => {
                self.observer
                    .on_manual_completion_required(self.machine.job_id());
            }
            StepOutcome::Failed { reason } => {
                self.observer
                    .on_failed(self.machine.job_id(), reason.as_str());
            }
        }
    }

    /// Icon files are vetted locally before the backend sees the decision; a
    /// file the backend's bot flow would choke on must not reach it.
    async fn resolve_icon(
        &mut self,
        decision: IconDecision,
    ) -> Result<IconDecisionOutcome, WorkflowError> {
        self.machine.ensure_awaiting_icon()?;
        if let IconDecision::Use(path) = &decision {
            if let Err(rejection) = validate_icon_file(path) {
                let outcome = self.machine.icon_rejected(rejection.to_string());
                self.observer
                    .on_manual_completion_required(self.machine.job_id());
                return Ok(outcome);
            }
        }
        self.client
            .resolve_icon(self.machine.job_id(), &decision)
            .await?;
        Ok(self.machine.icon_submitted())
    }

    async fn resolve_url_name(
        &mut self,
        name: String,
    ) -> Result<UrlNameDecisionOutcome, WorkflowError> {
        self.machine.ensure_awaiting_url_name(name.as_str())?;
        let reply = self
            .client
            .resolve_url_name(self.machine.job_id(), name.as_str())
            .await?;
        let outcome = self.machine.url_name_submitted(&reply);
        match &outcome {
            UrlNameDecisionOutcome::StillTaken {
                attempt,
                max_attempts,
            } => {
                self.observer.on_pending_url_name(
                    self.machine.job_id(),
                    name.trim(),
                    *attempt,
                    *max_attempts,
                );
            }
            UrlNameDecisionOutcome::Completed { shareable_link } => {
                self.observer
                    .on_completed(self.machine.job_id(), shareable_link.as_deref());
            }
            UrlNameDecisionOutcome::AttemptsExhausted => {
                self.observer
                    .on_manual_completion_required(self.machine.job_id());
            }
            UrlNameDecisionOutcome::Resumed => {}
        }
        Ok(outcome)
    }
}

/// Accumulates time spent in active phases. Paused while a prompt is open so
/// user thinking time never counts against the ceiling.
#[derive(Debug, Default)]
struct ActiveStopwatch {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl ActiveStopwatch {
    fn start(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    fn elapsed(&self) -> Duration {
        let running = self
            .running_since
            .map(|since| since.elapsed())
            .unwrap_or_default();
        self.accumulated + running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stopwatch_freezes_while_paused() {
        let mut stopwatch = ActiveStopwatch::default();
        stopwatch.start();
        stopwatch.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        stopwatch.pause();
        stopwatch.pause();

        let frozen = stopwatch.elapsed();
        assert!(frozen >= Duration::from_millis(30));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stopwatch.elapsed(), frozen);
    }

    #[tokio::test]
    async fn stopwatch_accumulates_across_resumes() {
        let mut stopwatch = ActiveStopwatch::default();
        stopwatch.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        stopwatch.pause();
        let first = stopwatch.elapsed();

        stopwatch.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        stopwatch.pause();

        assert!(stopwatch.elapsed() >= first + Duration::from_millis(20));
    }
}
