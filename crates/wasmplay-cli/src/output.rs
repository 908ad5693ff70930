//! Terminal rendering of pipeline events.
//!
//! Tool output goes to the matching stream; status lines go to stderr so
//! stdout stays the program's (or formatter's) text.

use std::io::{self, Write};

use wasmplay_core::{EventSink, PipelineEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// CLI event sink: tool output verbatim, status in brackets.
#[derive(Default)]
pub struct TerminalSink {
    verbose: bool,
}

impl TerminalSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    fn render(&self, event: &PipelineEvent) -> Vec<(Stream, String)> {
        match event {
            PipelineEvent::Output { stdout, stderr, .. } => {
                let mut out = Vec::new();
                if !stdout.is_empty() {
                    out.push((Stream::Stdout, stdout.clone()));
                }
                if !stderr.is_empty() {
                    out.push((Stream::Stderr, stderr.clone()));
                }
                out
            }
            PipelineEvent::TimedOut { limit } => vec![(
                Stream::Stderr,
                format!("[exceeded time limit of {}s]\n", limit.as_secs()),
            )],
            PipelineEvent::EnvironmentError { message } => {
                vec![(Stream::Stderr, format!("[environment error: {}]\n", message))]
            }
            _ if !self.verbose => Vec::new(),
            PipelineEvent::StateChanged { kind, state } => {
                vec![(Stream::Stderr, format!("[{}: {}]\n", kind, state))]
            }
            PipelineEvent::Diagnostics { tool, diagnostics } => vec![(
                Stream::Stderr,
                format!("[{}: {} diagnostic(s)]\n", tool, diagnostics.len()),
            )],
            PipelineEvent::FrameCreated { module_size } => vec![(
                Stream::Stderr,
                format!("[frame created: {} byte module]\n", module_size),
            )],
            PipelineEvent::Formatted { .. } => Vec::new(),
        }
    }
}

impl EventSink for TerminalSink {
    fn emit(&self, event: PipelineEvent) {
        for (stream, text) in self.render(&event) {
            // a closed terminal is not worth failing the session over
            let _ = match stream {
                Stream::Stdout => {
                    let mut out = io::stdout().lock();
                    out.write_all(text.as_bytes()).and_then(|_| out.flush())
                }
                Stream::Stderr => io::stderr().lock().write_all(text.as_bytes()),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wasmplay_core::pipeline::ToolKind;
    use wasmplay_core::{SessionKind, SessionState};

    #[test]
    fn test_output_goes_to_matching_streams() {
        let sink = TerminalSink::new(false);
        let lines = sink.render(&PipelineEvent::Output {
            tool: ToolKind::Compile,
            stdout: "hi\n".into(),
            stderr: "/tmp/main.go:1:1: bad\n".into(),
        });
        assert_eq!(
            lines,
            vec![
                (Stream::Stdout, "hi\n".to_string()),
                (Stream::Stderr, "/tmp/main.go:1:1: bad\n".to_string()),
            ]
        );
    }

    #[test]
    fn test_timeout_always_shown() {
        let sink = TerminalSink::new(false);
        let lines = sink.render(&PipelineEvent::TimedOut {
            limit: Duration::from_secs(30),
        });
        assert_eq!(lines.len(), 1);
        assert!(lines[0].1.contains("exceeded time limit of 30s"));
    }

    #[test]
    fn test_states_only_when_verbose() {
        let event = PipelineEvent::StateChanged {
            kind: SessionKind::Run,
            state: SessionState::Linking,
        };
        assert!(TerminalSink::new(false).render(&event).is_empty());
        let lines = TerminalSink::new(true).render(&event);
        assert_eq!(lines, vec![(Stream::Stderr, "[run: linking]\n".to_string())]);
    }
}
