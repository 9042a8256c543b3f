use std::fmt;

use chrono::{DateTime, Utc};

/// Where a pack-creation workflow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowPhase {
    Idle,
    Starting,
    Polling,
    AwaitingIcon,
    AwaitingUrlName,
    ManualCompletionRequired,
    Completed,
    Failed,
}

impl WorkflowPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Polling => "polling",
            Self::AwaitingIcon => "awaiting_icon",
            Self::AwaitingUrlName => "awaiting_url_name",
            Self::ManualCompletionRequired => "manual_completion_required",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal phases never transition again; a new job gets a new machine.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ManualCompletionRequired | Self::Completed | Self::Failed
        )
    }

    /// Phases in which polling is suspended and the poll timer is not armed.
    pub fn is_awaiting_input(self) -> bool {
        matches!(self, Self::AwaitingIcon | Self::AwaitingUrlName)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use WorkflowPhase::{
            AwaitingIcon, AwaitingUrlName, Completed, Failed, Idle, ManualCompletionRequired,
            Polling, Starting,
        };

        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Polling)
                | (Starting, Failed)
                | (Polling, AwaitingIcon)
                | (Polling, AwaitingUrlName)
                | (Polling, ManualCompletionRequired)
                | (Polling, Completed)
                | (Polling, Failed)
                | (AwaitingIcon, Polling)
                | (AwaitingIcon, ManualCompletionRequired)
                | (AwaitingIcon, Failed)
                | (AwaitingUrlName, Polling)
                | (AwaitingUrlName, AwaitingUrlName)
                | (AwaitingUrlName, Completed)
                | (AwaitingUrlName, ManualCompletionRequired)
                | (AwaitingUrlName, Failed)
        )
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded phase change, kept by the machine for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTransition {
    pub from: WorkflowPhase,
    pub to: WorkflowPhase,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_follow_the_workflow_shape() {
        use WorkflowPhase::*;

        let legal = [
            (Idle, Starting),
            (Starting, Polling),
            (Starting, Failed),
            (Polling, AwaitingIcon),
            (Polling, AwaitingUrlName),
            (Polling, ManualCompletionRequired),
            (Polling, Completed),
            (Polling, Failed),
            (AwaitingIcon, Polling),
            (AwaitingIcon, ManualCompletionRequired),
            (AwaitingUrlName, AwaitingUrlName),
            (AwaitingUrlName, Completed),
            (AwaitingUrlName, ManualCompletionRequired),
        ];
        for (from, to) in legal {
            assert!(
                from.can_transition_to(to),
                "{from} -> {to} should be legal"
            );
        }
    }

    #[test]
    fn terminal_phases_never_transition() {
        use WorkflowPhase::*;

        let every = [
            Idle,
            Starting,
            Polling,
            AwaitingIcon,
            AwaitingUrlName,
            ManualCompletionRequired,
            Completed,
            Failed,
        ];
        for terminal in [ManualCompletionRequired, Completed, Failed] {
            assert!(terminal.is_terminal());
            for next in every {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} -> {next} should be illegal"
                );
            }
        }
    }

    #[test]
    fn polling_never_jumps_back_to_start_phases() {
        use WorkflowPhase::*;

        assert!(!Polling.can_transition_to(Idle));
        assert!(!Polling.can_transition_to(Starting));
        assert!(!AwaitingIcon.can_transition_to(AwaitingUrlName));
        assert!(!AwaitingUrlName.can_transition_to(AwaitingIcon));
        assert!(!Idle.can_transition_to(Polling));
    }

    #[test]
    fn awaiting_phases_are_the_suspension_set() {
        use WorkflowPhase::*;

        assert!(AwaitingIcon.is_awaiting_input());
        assert!(AwaitingUrlName.is_awaiting_input());
        for other in [Idle, Starting, Polling, ManualCompletionRequired, Completed, Failed] {
            assert!(!other.is_awaiting_input(), "{other} is not a suspension phase");
        }
    }
}
