use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

/// Run的状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Discovering,
    Retrieving,
    Scraping,
    Scoring,
    Synthesizing,
    Refining,
    Archiving,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Cancelled
        )
    }

    /// 合法的状态迁移。Discovering与Refining可以跳过
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Failed | Cancelled)
                | (Idle, Discovering | Retrieving)
                | (Discovering, Retrieving)
                | (Retrieving, Scraping)
                | (Scraping, Scoring)
                | (Scoring, Synthesizing)
                | (Synthesizing, Refining | Archiving)
                | (Refining, Archiving)
                | (Archiving, Completed)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Discovering => "discovering",
            RunState::Retrieving => "retrieving",
            RunState::Scraping => "scraping",
            RunState::Scoring => "scoring",
            RunState::Synthesizing => "synthesizing",
            RunState::Refining => "refining",
            RunState::Archiving => "archiving",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid run state transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: RunState,
    pub to: RunState,
}

/// 持有状态的唯一写端，通过watch发布给RunHandle
pub struct StateTracker {
    tx: watch::Sender<RunState>,
}

impl StateTracker {
    pub fn new() -> (Self, watch::Receiver<RunState>) {
        let (tx, rx) = watch::channel(RunState::Idle);
        (Self { tx }, rx)
    }

    pub fn current(&self) -> RunState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.tx.subscribe()
    }

    pub fn advance(&self, next: RunState) -> Result<(), InvalidTransition> {
        let from = self.current();
        if !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        tracing::debug!(%from, to = %next, "run state changed");
        self.tx.send_replace(next);
        Ok(())
    }
}
