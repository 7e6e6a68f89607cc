//! Lifecycle of a single query.

use std::fmt;

use serde::{Deserialize, Serialize};

/// ```text
/// RECEIVED -> AUTHORIZING -> DENIED
///                         -> REWRITING -> RESOLVING_COMPUTE -> EXECUTING -> SUCCEEDED
///                                                                       -> FAILED
/// ```
///
/// Every non-terminal state after `AUTHORIZING` may also move to `FAILED`
/// (internal errors, cancellation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryState {
    Received,
    Authorizing,
    Denied,
    Rewriting,
    ResolvingCompute,
    Executing,
    Succeeded,
    Failed,
}

impl QueryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Denied | Self::Succeeded | Self::Failed)
    }

    pub fn can_transition_to(self, next: QueryState) -> bool {
        use QueryState::*;
        matches!(
            (self, next),
            (Received, Authorizing)
                | (Received, Denied)
                | (Received, Failed)
                | (Authorizing, Denied)
                | (Authorizing, Rewriting)
                | (Authorizing, Failed)
                | (Rewriting, ResolvingCompute)
                | (Rewriting, Denied)
                | (Rewriting, Failed)
                | (ResolvingCompute, Executing)
                | (ResolvingCompute, Failed)
                | (Executing, Succeeded)
                | (Executing, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Authorizing => "AUTHORIZING",
            Self::Denied => "DENIED",
            Self::Rewriting => "REWRITING",
            Self::ResolvingCompute => "RESOLVING_COMPUTE",
            Self::Executing => "EXECUTING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let path = [
            QueryState::Received,
            QueryState::Authorizing,
            QueryState::Rewriting,
            QueryState::ResolvingCompute,
            QueryState::Executing,
            QueryState::Succeeded,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [QueryState::Denied, QueryState::Succeeded, QueryState::Failed] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(QueryState::Executing));
            assert!(!terminal.can_transition_to(QueryState::Failed));
        }
    }

    #[test]
    fn test_no_execution_after_denial_path() {
        assert!(!QueryState::Authorizing.can_transition_to(QueryState::Executing));
        assert!(!QueryState::Executing.can_transition_to(QueryState::Denied));
    }
}
