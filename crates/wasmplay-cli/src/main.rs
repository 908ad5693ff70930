mod cli;
mod config;
mod frame;
mod output;
mod toolchain;

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use wasmplay_core::cache::{AssetCache, CacheStore, DirFetcher, DirStore, Fetcher, HttpFetcher, MemoryStore};
use wasmplay_core::precompile::GoDriver;
use wasmplay_core::{Playground, PrecompileTarget, Precompiler, SessionOutcome};

use crate::cli::{Cli, Command};
use crate::config::CliConfig;
use crate::frame::FileFrameHost;
use crate::output::TerminalSink;
use crate::toolchain::{HostToolchain, find_wasm_exec};

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

fn core_err(e: impl std::fmt::Display) -> io::Error {
    io::Error::other(e.to_string())
}

async fn precompile(
    config: &CliConfig,
    std: bool,
    packages: Vec<String>,
    store: Option<PathBuf>,
    manifest: Option<PathBuf>,
    module_dir: Option<PathBuf>,
    timeout: Option<u64>,
) -> io::Result<()> {
    let store = match store {
        Some(dir) => dir,
        None if config.asset_root_is_url() => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "asset_root is a URL; pass --store to choose a local store directory",
            ));
        }
        None => Path::new(&config.asset_root).join("prebuilt"),
    };
    let manifest = manifest.unwrap_or_else(|| store.join("manifest.txt"));

    let mut driver = GoDriver::new(config.go_bin.clone());
    if let Some(dir) = module_dir {
        driver = driver.with_dir(dir);
    }
    if let Some(secs) = timeout {
        driver = driver.with_timeout(Duration::from_secs(secs));
    }
    let targets: Vec<PrecompileTarget> = if std {
        vec![PrecompileTarget::Std]
    } else {
        packages.into_iter().map(PrecompileTarget::Package).collect()
    };

    let mut precompiler = Precompiler::new(Box::new(driver), store.clone(), manifest.clone());
    let report = precompiler.precompile(&targets).await.map_err(core_err)?;

    for failed in &report.failed {
        eprintln!("[failed: {}]\n{}", failed.package, failed.output);
    }
    println!(
        "{} built, {} skipped, {} failed, {} archives added to {}",
        report.built.len(),
        report.skipped.len(),
        report.failed.len(),
        report.archived(),
        manifest.display()
    );
    if report.is_success() {
        Ok(())
    } else {
        Err(io::Error::other(format!(
            "{} package(s) failed to build",
            report.failed.len()
        )))
    }
}

fn asset_cache(config: &CliConfig) -> io::Result<Arc<AssetCache>> {
    let store: Arc<dyn CacheStore> = match &config.cache_dir {
        Some(dir) => Arc::new(DirStore::open(dir.clone())?),
        None => Arc::new(MemoryStore::new()),
    };
    let fetcher: Arc<dyn Fetcher> = if config.asset_root_is_url() {
        let base = url::Url::parse(&config.asset_root)
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, format!("invalid asset_root: {}", e)))?;
        Arc::new(HttpFetcher::new(base, FETCH_TIMEOUT)?)
    } else {
        Arc::new(DirFetcher::new(PathBuf::from(&config.asset_root)))
    };
    Ok(Arc::new(AssetCache::new(store, fetcher)))
}

async fn playground(config: &CliConfig, verbose: bool) -> io::Result<Playground> {
    let wasm_exec = find_wasm_exec(&config.go_bin).await;
    Ok(Playground::new(
        config.playground.clone(),
        asset_cache(config)?,
        Arc::new(HostToolchain::new(config.go_bin.clone())?),
        Arc::new(FileFrameHost::new(config.out_dir.clone(), wasm_exec)),
        Arc::new(TerminalSink::new(verbose)),
    ))
}

fn session_result(outcome: &SessionOutcome) -> io::Result<()> {
    match outcome {
        SessionOutcome::Formatted | SessionOutcome::Ready { .. } => Ok(()),
        SessionOutcome::Failed(failure) => Err(io::Error::other(format!(
            "{} failed",
            failure.stage
        ))),
        SessionOutcome::TimedOut => Err(io::Error::new(ErrorKind::TimedOut, "exceeded time limit")),
    }
}

async fn fmt(config: &CliConfig, file: &Path, write: bool, verbose: bool) -> io::Result<()> {
    let source = std::fs::read_to_string(file)?;
    let playground = playground(config, verbose).await?;
    let session = playground.format(&source).await.map_err(core_err)?;
    session_result(&session.outcome)?;
    if write {
        if session.source != source {
            wasmplay_core::safe_io::atomic_write(file, session.source.as_bytes())?;
        }
    } else {
        print!("{}", session.source);
    }
    Ok(())
}

async fn run(config: &CliConfig, file: &Path, verbose: bool) -> io::Result<()> {
    let source = std::fs::read_to_string(file)?;
    let playground = playground(config, verbose).await?;
    playground.load().await.map_err(core_err)?;
    let session = playground.run(&source).await.map_err(core_err)?;
    log::info!(
        "{} session settled as {} after {:?}",
        session.kind,
        session.state(),
        session.elapsed
    );
    session_result(&session.outcome)
}

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse_args()?;
    let mut config = CliConfig::load(cli.config.as_deref())?;
    config.apply_overrides(&cli.overrides()?)?;

    match cli.command {
        Command::Precompile {
            std,
            packages,
            store,
            manifest,
            module_dir,
            timeout,
        } => precompile(&config, std, packages, store, manifest, module_dir, timeout).await,
        Command::Fmt { file, write } => fmt(&config, &file, write, cli.verbose).await,
        Command::Run {
            file,
            site,
            cache_dir,
            out,
        } => {
            if let Some(site) = site {
                config.asset_root = site;
            }
            if let Some(dir) = cache_dir {
                config.cache_dir = Some(dir);
            }
            if let Some(dir) = out {
                config.out_dir = dir;
            }
            run(&config, &file, cli.verbose).await
        }
    }
}
