//! Build session bookkeeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use strum::Display;

use super::toolchain::ToolKind;
use crate::diagnostic::Diagnostic;
use crate::output::{EventSink, PipelineEvent};

/// What a session was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SessionKind {
    /// Format only.
    Format,
    /// Format, compile, link, execute.
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Idle,
    Formatting,
    Compiling,
    Linking,
    Ready,
    Failed,
    TimedOut,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::TimedOut)
    }
}

/// A stage ended with toolchain diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub stage: ToolKind,
    /// Raw diagnostic text, shown verbatim.
    pub message: String,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// A standalone format succeeded; `BuildSession::source` holds the
    /// formatted text.
    Formatted,
    /// The module was built and ran to completion in a frame.
    Ready { module: Vec<u8> },
    Failed(Failure),
    TimedOut,
}

impl SessionOutcome {
    /// The state the session settled in. A successful standalone format
    /// returns to idle.
    pub fn state(&self) -> SessionState {
        match self {
            Self::Formatted => SessionState::Idle,
            Self::Ready { .. } => SessionState::Ready,
            Self::Failed(_) => SessionState::Failed,
            Self::TimedOut => SessionState::TimedOut,
        }
    }
}

/// One settled run or format invocation.
#[derive(Debug, Clone)]
pub struct BuildSession {
    pub kind: SessionKind,
    /// The source after formatting, or the submitted text when formatting
    /// did not succeed.
    pub source: String,
    pub stdout: String,
    pub stderr: String,
    pub outcome: SessionOutcome,
    pub elapsed: Duration,
}

impl BuildSession {
    pub fn state(&self) -> SessionState {
        self.outcome.state()
    }

    pub fn module(&self) -> Option<&[u8]> {
        match &self.outcome {
            SessionOutcome::Ready { module } => Some(module),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.outcome {
            SessionOutcome::Failed(f) => Some(f),
            _ => None,
        }
    }
}

/// Gate between a session and its event sink.
///
/// Once settled, every further event is dropped, so a stage that completes
/// after the deadline cannot report anything.
pub(crate) struct SessionGuard {
    kind: SessionKind,
    sink: Arc<dyn EventSink>,
    settled: AtomicBool,
    state: Mutex<SessionState>,
}

impl SessionGuard {
    pub(crate) fn new(kind: SessionKind, sink: Arc<dyn EventSink>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            sink,
            settled: AtomicBool::new(false),
            state: Mutex::new(SessionState::Idle),
        })
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub(crate) fn emit(&self, event: PipelineEvent) {
        if self.is_settled() {
            log::debug!("{} session settled, dropping {:?}", self.kind, event);
            return;
        }
        self.sink.emit(event);
    }

    /// Move to `state`. A terminal state settles the session.
    pub(crate) fn transition(&self, state: SessionState) {
        if state.is_terminal() {
            self.settle(state, None);
            return;
        }
        if self.is_settled() {
            return;
        }
        log::debug!("{} session: {} -> {}", self.kind, self.state(), state);
        self.set_state(state);
        self.sink.emit(PipelineEvent::StateChanged {
            kind: self.kind,
            state,
        });
    }

    /// Settle the session in `state`, followed by `extra` if given. Returns
    /// `false` (and emits nothing) if it had already settled.
    pub(crate) fn settle(&self, state: SessionState, extra: Option<PipelineEvent>) -> bool {
        if self.settled.swap(true, Ordering::AcqRel) {
            return false;
        }
        log::debug!("{} session settled: {}", self.kind, state);
        self.set_state(state);
        self.sink.emit(PipelineEvent::StateChanged {
            kind: self.kind,
            state,
        });
        if let Some(event) = extra {
            self.sink.emit(event);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::CollectingSink;

    #[test]
    fn test_guard_drops_events_after_settle() {
        let sink = Arc::new(CollectingSink::new());
        let guard = SessionGuard::new(SessionKind::Run, sink.clone());
        assert_eq!(guard.state(), SessionState::Idle);

        guard.transition(SessionState::Compiling);
        assert!(guard.settle(
            SessionState::TimedOut,
            Some(PipelineEvent::TimedOut {
                limit: Duration::from_secs(1)
            })
        ));
        guard.transition(SessionState::Linking);
        guard.emit(PipelineEvent::FrameCreated { module_size: 1 });
        assert!(!guard.settle(SessionState::Ready, None));

        assert_eq!(
            sink.states(),
            vec![SessionState::Compiling, SessionState::TimedOut]
        );
        assert_eq!(sink.len(), 3);
        assert_eq!(guard.state(), SessionState::TimedOut);
        assert!(guard.is_settled());
    }

    #[test]
    fn test_terminal_transition_settles() {
        let sink = Arc::new(CollectingSink::new());
        let guard = SessionGuard::new(SessionKind::Format, sink.clone());

        guard.transition(SessionState::Formatting);
        guard.transition(SessionState::Failed);
        assert!(guard.is_settled());
        assert!(!guard.settle(SessionState::TimedOut, None));
        guard.transition(SessionState::Compiling);
        guard.emit(PipelineEvent::FrameCreated { module_size: 1 });

        assert_eq!(
            sink.states(),
            vec![SessionState::Formatting, SessionState::Failed]
        );
        assert_eq!(sink.len(), 2);
        assert_eq!(guard.state(), SessionState::Failed);
    }

    #[test]
    fn test_outcome_states() {
        assert_eq!(SessionOutcome::Formatted.state(), SessionState::Idle);
        assert!(SessionOutcome::TimedOut.state().is_terminal());
        assert!(!SessionState::Linking.is_terminal());
        assert_eq!(SessionState::TimedOut.to_string(), "timed_out");
    }
}
