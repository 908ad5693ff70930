//! Build pipeline: format -> compile -> link -> execute.
//!
//! A [`Pipeline`] drives one session at a time against the shared VFS:
//!
//! ```text
//! Idle -> Formatting -> Compiling -> Linking -> Ready(module)
//!                 \            \          \
//!                  `-----------`----------`--> Failed(diagnostic) | TimedOut
//! ```
//!
//! Stages run strictly in sequence. The whole session, including the wait
//! for the execution frame, races a deadline fixed at session creation;
//! when the deadline wins the in-flight stage is dropped and its session
//! guard swallows anything it still tries to report.
//!
//! Toolchain diagnostics end a session in `Failed` and are never errors.
//! `Err(PipelineError)` is reserved for environment failures (cache,
//! manifest, toolchain launch, frame creation).

pub mod frame;
pub mod session;
pub mod toolchain;

use std::sync::Arc;

use tokio::time::Instant;

pub use frame::{BOOTSTRAP, FrameError, FrameHost, FrameNotifier, FrameSignals};
pub use session::{BuildSession, Failure, SessionKind, SessionOutcome, SessionState};
pub use toolchain::{ToolExit, ToolKind, Toolchain, ToolchainError};

use session::SessionGuard;

use crate::cache::CacheError;
use crate::config::PlaygroundConfig;
use crate::diagnostic;
use crate::importcfg::{ImportConfig, parse_imports};
use crate::manifest::{Manifest, ManifestError};
use crate::output::{EventSink, PipelineEvent};
use crate::vfs::{FsError, Vfs};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("a build session is already in flight")]
    Busy,
    #[error("playground not loaded")]
    NotLoaded,
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Text gathered while a session runs. Lives outside the stage future so it
/// survives a timeout.
struct Draft {
    source: String,
    stdout: String,
    stderr: String,
}

/// Result of one toolchain invocation.
enum StageResult {
    Ok,
    Failed(Failure),
}

pub struct Pipeline {
    config: PlaygroundConfig,
    vfs: Arc<Vfs>,
    toolchain: Arc<dyn Toolchain>,
    frames: Arc<dyn FrameHost>,
    sink: Arc<dyn EventSink>,
}

impl Pipeline {
    pub fn new(
        config: PlaygroundConfig,
        vfs: Arc<Vfs>,
        toolchain: Arc<dyn Toolchain>,
        frames: Arc<dyn FrameHost>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            vfs,
            toolchain,
            frames,
            sink,
        }
    }

    pub fn config(&self) -> &PlaygroundConfig {
        &self.config
    }

    pub fn vfs(&self) -> &Arc<Vfs> {
        &self.vfs
    }

    /// Format `source` on its own.
    pub async fn format(&self, source: &str) -> Result<BuildSession, PipelineError> {
        self.session(SessionKind::Format, source, None).await
    }

    /// Format, compile and link `source`, then execute it in a new frame.
    pub async fn run(
        &self,
        source: &str,
        manifest: &Manifest,
    ) -> Result<BuildSession, PipelineError> {
        self.session(SessionKind::Run, source, Some(manifest)).await
    }

    async fn session(
        &self,
        kind: SessionKind,
        source: &str,
        manifest: Option<&Manifest>,
    ) -> Result<BuildSession, PipelineError> {
        let started = Instant::now();
        let deadline = started + self.config.timeout();
        let guard = SessionGuard::new(kind, self.sink.clone());
        let mut draft = Draft {
            source: source.to_string(),
            stdout: String::new(),
            stderr: String::new(),
        };

        let result = tokio::time::timeout_at(
            deadline,
            self.drive(kind, &guard, &mut draft, manifest),
        )
        .await;

        let outcome = match result {
            Ok(Ok(outcome)) => {
                guard.settle(outcome.state(), None);
                outcome
            }
            Ok(Err(e)) => {
                log::warn!("{} session aborted: {}", kind, e);
                guard.settle(
                    SessionState::Failed,
                    Some(PipelineEvent::EnvironmentError {
                        message: e.to_string(),
                    }),
                );
                return Err(e);
            }
            Err(_) => {
                log::debug!("{} session exceeded {:?}", kind, self.config.timeout());
                guard.settle(
                    SessionState::TimedOut,
                    Some(PipelineEvent::TimedOut {
                        limit: self.config.timeout(),
                    }),
                );
                // whatever the dropped stage left on fds 1/2 is discarded
                self.vfs.clear_output();
                SessionOutcome::TimedOut
            }
        };

        Ok(BuildSession {
            kind,
            source: draft.source,
            stdout: draft.stdout,
            stderr: draft.stderr,
            outcome,
            elapsed: started.elapsed(),
        })
    }

    async fn drive(
        &self,
        kind: SessionKind,
        guard: &SessionGuard,
        draft: &mut Draft,
        manifest: Option<&Manifest>,
    ) -> Result<SessionOutcome, PipelineError> {
        self.reset_workspace()?;

        if let StageResult::Failed(f) = self.format_stage(guard, draft).await? {
            return Ok(SessionOutcome::Failed(f));
        }
        let Some(manifest) = manifest.filter(|_| kind == SessionKind::Run) else {
            return Ok(SessionOutcome::Formatted);
        };

        let imports = parse_imports(&draft.source);

        guard.transition(SessionState::Compiling);
        let compile_cfg = ImportConfig::compile(&imports, manifest);
        self.vfs.write_file(
            &self.config.compile_importcfg_path(),
            compile_cfg.to_string().as_bytes(),
        )?;
        if let StageResult::Failed(f) = self
            .invoke(guard, draft, ToolKind::Compile, self.compile_args())
            .await?
        {
            return Ok(SessionOutcome::Failed(f));
        }
        if !self.vfs.exists(&self.config.main_archive_path()) {
            return Ok(SessionOutcome::Failed(missing_output(
                ToolKind::Compile,
                &self.config.main_archive_path(),
            )));
        }

        guard.transition(SessionState::Linking);
        let link_cfg = ImportConfig::link(
            &imports,
            manifest,
            &self.config.main_archive_path(),
            self.config.link_scope,
        );
        self.vfs.write_file(
            &self.config.link_importcfg_path(),
            link_cfg.to_string().as_bytes(),
        )?;
        if let StageResult::Failed(f) = self
            .invoke(guard, draft, ToolKind::Link, self.link_args())
            .await?
        {
            return Ok(SessionOutcome::Failed(f));
        }
        let module = match self.vfs.read_file(&self.config.module_path()).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) | Err(FsError::NotFound(_)) => {
                return Ok(SessionOutcome::Failed(missing_output(
                    ToolKind::Link,
                    &self.config.module_path(),
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let signals = self.frames.create(&module, BOOTSTRAP).await?;
        guard.emit(PipelineEvent::FrameCreated {
            module_size: module.len(),
        });
        signals.wait().await?;

        Ok(SessionOutcome::Ready { module })
    }

    async fn format_stage(
        &self,
        guard: &SessionGuard,
        draft: &mut Draft,
    ) -> Result<StageResult, PipelineError> {
        guard.transition(SessionState::Formatting);
        let path = self.config.source_path();
        self.vfs.write_file(&path, draft.source.as_bytes())?;

        let args = vec!["-w".to_string(), path.clone()];
        let result = self.invoke(guard, draft, ToolKind::Format, args).await?;
        if let StageResult::Failed(_) = result {
            return Ok(result);
        }

        let bytes = self.vfs.read_file(&path).await?;
        let formatted = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                return Ok(StageResult::Failed(Failure {
                    stage: ToolKind::Format,
                    message: "formatter produced invalid UTF-8".to_string(),
                    diagnostics: Vec::new(),
                }));
            }
        };
        draft.source = formatted.clone();
        guard.emit(PipelineEvent::Formatted { source: formatted });
        Ok(StageResult::Ok)
    }

    /// Run one tool and classify its output. Any stderr text, or a non-zero
    /// exit, fails the stage.
    async fn invoke(
        &self,
        guard: &SessionGuard,
        draft: &mut Draft,
        tool: ToolKind,
        args: Vec<String>,
    ) -> Result<StageResult, PipelineError> {
        self.vfs.clear_output();
        log::debug!("running {} {:?}", tool, args);
        let exit = self.toolchain.run(tool, &args, &self.vfs).await?;

        let stdout = String::from_utf8_lossy(&self.vfs.take_stdout()).into_owned();
        let stderr = String::from_utf8_lossy(&self.vfs.take_stderr()).into_owned();
        draft.stdout.push_str(&stdout);
        draft.stderr.push_str(&stderr);
        if !stdout.is_empty() || !stderr.is_empty() {
            guard.emit(PipelineEvent::Output {
                tool,
                stdout,
                stderr: stderr.clone(),
            });
        }

        if stderr.trim().is_empty() && exit.success() {
            return Ok(StageResult::Ok);
        }

        // Only records pointing into the user's source are highlighted. The
        // message keeps everything.
        let source_path = self.config.source_path();
        let diagnostics: Vec<_> = diagnostic::parse(&stderr)
            .into_iter()
            .filter(|d| d.refers_to(&source_path))
            .collect();
        if !diagnostics.is_empty() {
            guard.emit(PipelineEvent::Diagnostics {
                tool,
                diagnostics: diagnostics.clone(),
            });
        }
        let message = if stderr.trim().is_empty() {
            format!("{} exited with status {}", tool, exit.code)
        } else {
            stderr
        };
        Ok(StageResult::Failed(Failure {
            stage: tool,
            message,
            diagnostics,
        }))
    }

    fn compile_args(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            self.config.main_archive_path(),
            "-p".to_string(),
            "main".to_string(),
            "-complete".to_string(),
            "-pack".to_string(),
            "-importcfg".to_string(),
            self.config.compile_importcfg_path(),
            self.config.source_path(),
        ]
    }

    fn link_args(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            self.config.module_path(),
            "-importcfg".to_string(),
            self.config.link_importcfg_path(),
            self.config.main_archive_path(),
        ]
    }

    /// Remove outputs of a previous session so a silent tool can't pass off
    /// stale artifacts as its own.
    fn reset_workspace(&self) -> Result<(), FsError> {
        self.vfs.clear_output();
        self.vfs.mkdir(&self.config.work_dir, true)?;
        for path in [self.config.main_archive_path(), self.config.module_path()] {
            match self.vfs.unlink(&path) {
                Ok(()) | Err(FsError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn missing_output(stage: ToolKind, path: &str) -> Failure {
    Failure {
        stage,
        message: format!("{} produced no output at {}", stage, path),
        diagnostics: Vec::new(),
    }
}
