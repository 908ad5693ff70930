//! End-to-end: precompile a store on disk, serve it through the asset cache,
//! and run a program through the playground.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;
use wasmplay_core::cache::{AssetCache, DirFetcher, DirStore};
use wasmplay_core::importcfg::ImportConfig;
use wasmplay_core::pipeline::{
    FrameError, FrameHost, FrameSignals, ToolExit, ToolKind, Toolchain, ToolchainError,
};
use wasmplay_core::precompile::{BuildDriver, BuildOutput};
use wasmplay_core::vfs::BoxFuture;
use wasmplay_core::{
    CollectingSink, PipelineEvent, Playground, PlaygroundConfig, PrecompileTarget, Precompiler,
    SessionState, Vfs,
};

/// Pretends `fmt` depends on `errors`.
struct TinyStdDriver {
    scratch: PathBuf,
}

impl BuildDriver for TinyStdDriver {
    fn list_std(&self) -> BoxFuture<'_, io::Result<Vec<String>>> {
        Box::pin(async move { Ok(vec!["fmt".to_string()]) })
    }

    fn is_available<'a>(&'a self, _package: &'a str) -> BoxFuture<'a, io::Result<bool>> {
        Box::pin(async move { Ok(true) })
    }

    fn fetch<'a>(&'a self, _package: &'a str) -> BoxFuture<'a, io::Result<BuildOutput>> {
        Box::pin(async move { Ok(BuildOutput::default()) })
    }

    fn build<'a>(&'a self, _package: &'a str) -> BoxFuture<'a, io::Result<BuildOutput>> {
        Box::pin(async move {
            let work = self.scratch.join("go-build1");
            let b1 = work.join("b001");
            let b2 = work.join("b002");
            std::fs::create_dir_all(&b1)?;
            std::fs::create_dir_all(&b2)?;
            std::fs::write(b1.join("_pkg_.a"), b"!<arch>\nfmt")?;
            std::fs::write(b2.join("_pkg_.a"), b"!<arch>\nerrors")?;
            std::fs::write(
                b1.join("importcfg"),
                format!("packagefile errors={}\n", b2.join("_pkg_.a").display()),
            )?;
            Ok(BuildOutput {
                success: true,
                stdout: String::new(),
                stderr: format!("WORK={}\n", work.display()),
            })
        })
    }
}

/// Checks that every archive the import configuration names can be read
/// through the VFS, then produces placeholder outputs.
struct CheckingToolchain {
    archive_reads: AtomicUsize,
}

impl Toolchain for CheckingToolchain {
    fn run<'a>(
        &'a self,
        tool: ToolKind,
        args: &'a [String],
        vfs: &'a Arc<Vfs>,
    ) -> BoxFuture<'a, Result<ToolExit, ToolchainError>> {
        Box::pin(async move {
            if let Some(i) = args.iter().position(|a| a == "-importcfg") {
                let text = String::from_utf8_lossy(&vfs.read_file(&args[i + 1]).await?).into_owned();
                for (import, archive) in ImportConfig::parse(&text).entries() {
                    if import == "command-line-arguments" {
                        continue;
                    }
                    vfs.read_file(archive).await?;
                    self.archive_reads.fetch_add(1, Ordering::SeqCst);
                }
            }
            if let Some(i) = args.iter().position(|a| a == "-o") {
                let payload: &[u8] = match tool {
                    ToolKind::Link => b"\0asm\x01\0\0\0",
                    _ => b"!<arch>\nmain",
                };
                vfs.write_file(&args[i + 1], payload)?;
            }
            Ok(ToolExit::SUCCESS)
        })
    }
}

struct InstantFrames {
    created: AtomicUsize,
}

impl FrameHost for InstantFrames {
    fn create<'a>(
        &'a self,
        module: &'a [u8],
        bootstrap: &'a str,
    ) -> BoxFuture<'a, Result<FrameSignals, FrameError>> {
        Box::pin(async move {
            assert!(module.starts_with(b"\0asm"));
            assert!(!bootstrap.is_empty());
            self.created.fetch_add(1, Ordering::SeqCst);
            let (notifier, signals) = FrameSignals::channel();
            notifier.complete();
            Ok(signals)
        })
    }
}

async fn precompile_into(site: &Path, scratch: &Path) {
    let store = site.join("prebuilt");
    let mut pc = Precompiler::new(
        Box::new(TinyStdDriver {
            scratch: scratch.to_path_buf(),
        }),
        store.clone(),
        store.join("manifest.txt"),
    );
    let report = pc.precompile(&[PrecompileTarget::Std]).await.unwrap();
    assert_eq!(report.archived(), 2);
}

#[tokio::test]
async fn test_precompiled_store_drives_a_full_run() {
    let dir = TempDir::new().unwrap();
    let site = dir.path().join("site");
    let scratch = dir.path().join("scratch");
    std::fs::create_dir_all(&scratch).unwrap();
    precompile_into(&site, &scratch).await;

    let cache = Arc::new(AssetCache::new(
        Arc::new(DirStore::open(dir.path().join("cache")).unwrap()),
        Arc::new(DirFetcher::new(site.clone())),
    ));
    let toolchain = Arc::new(CheckingToolchain {
        archive_reads: AtomicUsize::new(0),
    });
    let frames = Arc::new(InstantFrames {
        created: AtomicUsize::new(0),
    });
    let sink = Arc::new(CollectingSink::new());
    let playground = Playground::new(
        PlaygroundConfig::default(),
        cache,
        toolchain.clone(),
        frames.clone(),
        sink.clone(),
    );

    let manifest = playground.load().await.unwrap();
    assert_eq!(manifest.get("fmt"), Some("/prebuilt/fmt.a"));
    assert_eq!(manifest.get("errors"), Some("/prebuilt/errors.a"));

    let source = "package main\n\nimport \"fmt\"\n\nfunc main() { fmt.Println(\"hi\") }\n";
    let session = playground.run(source).await.unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    assert!(!session.module().unwrap().is_empty());
    assert_eq!(frames.created.load(Ordering::SeqCst), 1);
    // fmt once for compile, once for link
    assert_eq!(toolchain.archive_reads.load(Ordering::SeqCst), 2);
    assert_eq!(
        sink.states(),
        vec![
            SessionState::Formatting,
            SessionState::Compiling,
            SessionState::Linking,
            SessionState::Ready,
        ]
    );
    assert!(
        sink.events()
            .iter()
            .any(|e| matches!(e, PipelineEvent::FrameCreated { .. }))
    );
}

#[tokio::test]
async fn test_missing_manifest_is_reported_as_environment_error() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(AssetCache::new(
        Arc::new(DirStore::open(dir.path().join("cache")).unwrap()),
        Arc::new(DirFetcher::new(dir.path().join("empty-site"))),
    ));
    let sink = Arc::new(CollectingSink::new());
    let playground = Playground::new(
        PlaygroundConfig::default(),
        cache,
        Arc::new(CheckingToolchain {
            archive_reads: AtomicUsize::new(0),
        }),
        Arc::new(InstantFrames {
            created: AtomicUsize::new(0),
        }),
        sink.clone(),
    );

    let err = playground.load().await.unwrap_err();
    assert!(err.to_string().contains("manifest.txt"));
    assert!(matches!(
        sink.events().as_slice(),
        [PipelineEvent::EnvironmentError { .. }]
    ));
}
