//! Saga lifecycle status and the transitions between statuses.

use serde::{Deserialize, Serialize};

/// Where a saga is in its lifecycle.
///
/// ```text
/// Pending ──► Running ──┬──► Completed
///    ▲                  ├──► Compensating ──► Failed
///    └ (re-execute) ◄───┴──► Failed (orchestrator fault)
/// ```
///
/// A finished saga (`Completed` or `Failed`) may be started again, which
/// moves it back to `Running` on the same context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    /// Built, not yet executed.
    #[default]
    Pending,
    Running,
    /// A step failed; completed steps are being undone.
    Compensating,
    Completed,
    Failed,
}

impl SagaStatus {
    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Orchestrator faults bypass this check and always end in `Failed`.
    pub fn can_transition_to(self, next: SagaStatus) -> bool {
        use SagaStatus::*;
        matches!(
            (self, next),
            (Pending | Completed | Failed, Running)
                | (Running, Compensating | Completed | Failed)
                | (Compensating, Failed)
        )
    }

    /// `Completed` and `Failed` end a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SagaStatus::Pending => "PENDING",
            SagaStatus::Running => "RUNNING",
            SagaStatus::Compensating => "COMPENSATING",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SagaStatus::*;
    use super::*;

    const ALL: [SagaStatus; 5] = [Pending, Running, Compensating, Completed, Failed];

    #[test]
    fn test_allowed_transitions() {
        let allowed: Vec<_> = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();

        assert_eq!(
            allowed,
            vec![
                (Pending, Running),
                (Running, Compensating),
                (Running, Completed),
                (Running, Failed),
                (Compensating, Failed),
                (Completed, Running),
                (Failed, Running),
            ]
        );
    }

    #[test]
    fn test_compensation_cannot_complete() {
        assert!(!Compensating.can_transition_to(Completed));
        assert!(!Compensating.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Compensating));
    }

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![Completed, Failed]);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(SagaStatus::default(), Pending);
        assert_eq!(Compensating.to_string(), "COMPENSATING");
        let json = serde_json::to_string(&Running).unwrap();
        assert_eq!(json, "\"RUNNING\"");
        let back: SagaStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Running);
    }
}
