//! Offline package compiler and archiver.
//!
//! Builds packages for the wasm target with a forced full rebuild and a kept
//! work directory, then harvests every archive the build produced into a
//! flat package store and appends one manifest line per archive:
//!
//! ```text
//! go build -a -work  ->  WORK=/tmp/go-build123
//!                          b001/_pkg_.a          (the requested package)
//!                          b001/importcfg        packagefile fmt=.../b002/_pkg_.a
//!                          b002/importcfg        ...
//!                  copy -> <store>/fmt.a, manifest: fmt -> /prebuilt/fmt.a
//! ```
//!
//! A package whose build fails, cannot be launched, or reports no work
//! directory is recorded in the report and the batch carries on. Store and
//! manifest I/O errors abort it.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use indexmap::IndexMap;

use crate::importcfg::ImportConfig;
use crate::manifest::{self, PackageRecord};
use crate::vfs::BoxFuture;

/// Action directory of the package named on the command line.
const ROOT_ACTION: &str = "b001";
/// Archive file each action directory compiles into.
const ACTION_ARCHIVE: &str = "_pkg_.a";
const WORK_MARKER: &str = "WORK=";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecompileTarget {
    /// Every buildable package in the standard library.
    Std,
    /// One named package, fetched first if it is not available locally.
    Package(String),
}

/// Captured result of one toolchain invocation.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl BuildOutput {
    /// The kept work directory announced on stderr, if any.
    pub fn work_dir(&self) -> Option<PathBuf> {
        self.stderr
            .lines()
            .chain(self.stdout.lines())
            .find_map(|line| line.trim().strip_prefix(WORK_MARKER))
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
    }

    /// Combined output for failure reports.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Host toolchain operations the archiver needs.
pub trait BuildDriver: Send + Sync {
    /// Import paths of the standard library.
    fn list_std(&self) -> BoxFuture<'_, io::Result<Vec<String>>>;
    /// Whether `package` resolves without fetching.
    fn is_available<'a>(&'a self, package: &'a str) -> BoxFuture<'a, io::Result<bool>>;
    /// Download `package` into the module cache.
    fn fetch<'a>(&'a self, package: &'a str) -> BoxFuture<'a, io::Result<BuildOutput>>;
    /// Full rebuild of `package` for wasm, keeping the work directory.
    fn build<'a>(&'a self, package: &'a str) -> BoxFuture<'a, io::Result<BuildOutput>>;
}

/// Drives the `go` command.
pub struct GoDriver {
    go_bin: PathBuf,
    dir: Option<PathBuf>,
    timeout: Duration,
}

impl GoDriver {
    pub fn new(go_bin: PathBuf) -> Self {
        Self {
            go_bin,
            dir: None,
            timeout: Duration::from_secs(600),
        }
    }

    /// Run commands inside `dir` (a module root, for non-std packages).
    pub fn with_dir(mut self, dir: PathBuf) -> Self {
        self.dir = Some(dir);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn output(&self, args: &[&str]) -> io::Result<BuildOutput> {
        let mut cmd = tokio::process::Command::new(&self.go_bin);
        cmd.args(args)
            .env("GOOS", "js")
            .env("GOARCH", "wasm")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        log::debug!("running {} {}", self.go_bin.display(), args.join(" "));

        let child = cmd.spawn().map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to spawn {}: {}", self.go_bin.display(), e),
            )
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                io::Error::new(
                    ErrorKind::TimedOut,
                    format!("go {} timed out after {:?}", args.join(" "), self.timeout),
                )
            })??;

        Ok(BuildOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn null_device() -> &'static str {
    if cfg!(windows) { "NUL" } else { "/dev/null" }
}

impl BuildDriver for GoDriver {
    fn list_std(&self) -> BoxFuture<'_, io::Result<Vec<String>>> {
        Box::pin(async move {
            let out = self.output(&["list", "std"]).await?;
            if !out.success {
                return Err(io::Error::other(format!("go list std failed: {}", out.stderr)));
            }
            Ok(out
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect())
        })
    }

    fn is_available<'a>(&'a self, package: &'a str) -> BoxFuture<'a, io::Result<bool>> {
        Box::pin(async move { Ok(self.output(&["list", package]).await?.success) })
    }

    fn fetch<'a>(&'a self, package: &'a str) -> BoxFuture<'a, io::Result<BuildOutput>> {
        Box::pin(async move { self.output(&["get", package]).await })
    }

    fn build<'a>(&'a self, package: &'a str) -> BoxFuture<'a, io::Result<BuildOutput>> {
        Box::pin(async move {
            self.output(&["build", "-a", "-work", "-o", null_device(), package])
                .await
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PrecompileError {
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPackage {
    pub package: String,
    pub output: String,
}

#[derive(Debug, Clone, Default)]
pub struct PrecompileReport {
    /// Roots built successfully.
    pub built: Vec<String>,
    /// Roots skipped because they were already processed or archived.
    pub skipped: Vec<String>,
    pub failed: Vec<FailedPackage>,
    /// Records appended to the manifest, in order.
    pub records: Vec<PackageRecord>,
}

impl PrecompileReport {
    pub fn archived(&self) -> usize {
        self.records.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Whether a `go list std` entry should be built as a root. Skipped entries
/// are still archived whenever they show up as dependencies.
fn is_std_root(import: &str) -> bool {
    !(import.starts_with("cmd/")
        || import.starts_with("vendor/")
        || import.split('/').any(|seg| seg == "internal"))
}

/// Everything learned from one work directory.
struct WorkScan {
    /// import path -> archive, in discovery order
    archives: IndexMap<String, PathBuf>,
    /// import path -> direct imports
    deps: HashMap<String, BTreeSet<String>>,
}

fn scan_work_dir(work: &Path, root: &str) -> io::Result<WorkScan> {
    let mut actions: Vec<PathBuf> = std::fs::read_dir(work)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    actions.sort();

    let mut archives: IndexMap<String, PathBuf> = IndexMap::new();
    let mut action_deps: Vec<(PathBuf, BTreeSet<String>)> = Vec::new();

    let root_archive = work.join(ROOT_ACTION).join(ACTION_ARCHIVE);
    if root_archive.is_file() {
        archives.insert(root.to_string(), root_archive);
    }

    for action in &actions {
        for cfg_name in ["importcfg", "importcfg.link"] {
            let cfg_path = action.join(cfg_name);
            let text = match std::fs::read_to_string(&cfg_path) {
                Ok(text) => text,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            let cfg = ImportConfig::parse(&text);
            if cfg_name == "importcfg" {
                action_deps.push((
                    action.clone(),
                    cfg.entries().iter().map(|(i, _)| i.clone()).collect(),
                ));
            }
            for (import, archive) in cfg.entries() {
                archives
                    .entry(import.clone())
                    .or_insert_with(|| PathBuf::from(archive));
            }
        }
    }

    // An action directory's identity is whichever import maps to its archive.
    let by_archive: HashMap<&Path, &str> = archives
        .iter()
        .map(|(import, archive)| (archive.as_path(), import.as_str()))
        .collect();
    let mut deps = HashMap::new();
    for (action, imports) in action_deps {
        let archive = action.join(ACTION_ARCHIVE);
        if let Some(import) = by_archive.get(archive.as_path()) {
            deps.insert(import.to_string(), imports);
        }
    }

    Ok(WorkScan { archives, deps })
}

pub struct Precompiler {
    driver: Box<dyn BuildDriver>,
    store_dir: PathBuf,
    manifest_path: PathBuf,
    url_prefix: String,
    processed: HashSet<String>,
    copied: HashSet<String>,
}

impl Precompiler {
    /// Archives go to `store_dir`; manifest lines address them as
    /// `/<store dir name>/<import>.a`.
    pub fn new(driver: Box<dyn BuildDriver>, store_dir: PathBuf, manifest_path: PathBuf) -> Self {
        let store_name = store_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "prebuilt".to_string());
        Self {
            driver,
            store_dir,
            manifest_path,
            url_prefix: format!("/{}", store_name),
            processed: HashSet::new(),
            copied: HashSet::new(),
        }
    }

    /// Override the path prefix written into manifest lines.
    pub fn with_url_prefix(mut self, prefix: &str) -> Self {
        self.url_prefix = format!("/{}", prefix.trim_matches('/'));
        self
    }

    pub fn stored_path(&self, import: &str) -> String {
        format!("{}/{}.a", self.url_prefix, import)
    }

    fn store_file(&self, import: &str) -> PathBuf {
        self.store_dir.join(format!("{}.a", import))
    }

    pub async fn precompile(
        &mut self,
        targets: &[PrecompileTarget],
    ) -> Result<PrecompileReport, PrecompileError> {
        std::fs::create_dir_all(&self.store_dir)?;
        let mut report = PrecompileReport::default();

        for target in targets {
            match target {
                PrecompileTarget::Std => {
                    let roots: Vec<String> = self
                        .driver
                        .list_std()
                        .await?
                        .into_iter()
                        .filter(|p| is_std_root(p))
                        .collect();
                    log::info!("precompiling {} standard packages", roots.len());
                    for root in roots {
                        self.process_root(&root, &mut report).await?;
                    }
                }
                PrecompileTarget::Package(package) => {
                    if let Err(output) = self.ensure_available(package).await {
                        fail(&mut report, package, output);
                        continue;
                    }
                    self.process_root(package, &mut report).await?;
                }
            }
        }

        Ok(report)
    }

    /// Fetch `package` unless the toolchain can already see it. The error
    /// is the captured output to report.
    async fn ensure_available(&self, package: &str) -> Result<(), String> {
        match self.driver.is_available(package).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => return Err(format!("go list {} failed: {}", package, e)),
        }
        log::info!("fetching {}", package);
        match self.driver.fetch(package).await {
            Ok(out) if out.success => Ok(()),
            Ok(out) => Err(out.combined()),
            Err(e) => Err(format!("go get {} failed: {}", package, e)),
        }
    }

    async fn process_root(
        &mut self,
        package: &str,
        report: &mut PrecompileReport,
    ) -> Result<(), PrecompileError> {
        if self.processed.contains(package) || self.copied.contains(package) {
            report.skipped.push(package.to_string());
            return Ok(());
        }
        self.processed.insert(package.to_string());

        let out = match self.driver.build(package).await {
            Ok(out) => out,
            Err(e) => {
                fail(report, package, format!("go build {} failed: {}", package, e));
                return Ok(());
            }
        };
        let work = out.work_dir();

        if !out.success {
            if let Some(work) = &work {
                remove_work_dir(work);
            }
            fail(report, package, out.combined());
            return Ok(());
        }

        let Some(work) = work else {
            fail(
                report,
                package,
                format!("build did not report a work directory\n{}", out.combined()),
            );
            return Ok(());
        };

        let result = self.archive(&work, package, report);
        remove_work_dir(&work);
        result?;
        report.built.push(package.to_string());
        Ok(())
    }

    fn archive(
        &mut self,
        work: &Path,
        package: &str,
        report: &mut PrecompileReport,
    ) -> Result<(), PrecompileError> {
        let mut scan = scan_work_dir(work, package)?;
        for (import, archive) in &scan.archives {
            if self.copied.contains(import) {
                continue;
            }
            let dest = self.store_file(import);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(archive, &dest).map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("failed to copy {} -> {}: {}", archive.display(), dest.display(), e),
                )
            })?;

            let mut record = PackageRecord::new(import.as_str(), self.stored_path(import));
            record.deps = scan.deps.remove(import).unwrap_or_default();
            manifest::append_record(&self.manifest_path, &record)?;
            log::debug!("archived {}", record.line());

            self.copied.insert(import.clone());
            report.records.push(record);
        }
        Ok(())
    }
}

/// Record a package that could not be built. Its siblings carry on.
fn fail(report: &mut PrecompileReport, package: &str, output: String) {
    log::warn!("precompile of {} failed", package);
    report.failed.push(FailedPackage {
        package: package.to_string(),
        output,
    });
}

fn remove_work_dir(work: &Path) {
    if let Err(e) = std::fs::remove_dir_all(work) {
        log::warn!("failed to remove work dir {}: {}", work.display(), e);
    }
}
