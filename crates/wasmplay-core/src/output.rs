//! Pipeline events and the sinks that receive them.

use std::sync::Mutex;
use std::time::Duration;

use crate::diagnostic::Diagnostic;
use crate::pipeline::{SessionKind, SessionState, ToolKind};

/// Events a build session reports to whatever presents it.
///
/// Core emits every variant; clients decide what to show. Once a session has
/// settled no further events are emitted for it.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The session moved to a new state.
    StateChanged {
        kind: SessionKind,
        state: SessionState,
    },
    /// Formatting succeeded; the editor buffer should be replaced.
    Formatted { source: String },
    /// A tool wrote to stdout and/or stderr.
    Output {
        tool: ToolKind,
        stdout: String,
        stderr: String,
    },
    /// Positioned diagnostics to highlight in the editor.
    Diagnostics {
        tool: ToolKind,
        diagnostics: Vec<Diagnostic>,
    },
    /// The module was handed to a fresh execution frame.
    FrameCreated { module_size: usize },
    /// The session exceeded its time budget.
    TimedOut { limit: Duration },
    /// An infrastructure failure (cache, manifest, toolchain launch). Kept
    /// apart from compiler diagnostics.
    EnvironmentError { message: String },
}

/// Receives pipeline events.
///
/// The CLI implements this with a terminal renderer; tests use
/// [`CollectingSink`].
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Records every event, in order.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PipelineEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.lock().clone()
    }

    /// Just the state transitions.
    pub fn states(&self) -> Vec<SessionState> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::StateChanged { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: PipelineEvent) {
        self.lock().push(event);
    }
}
