//! CLI argument parsing with clap.

use std::io::{self, ErrorKind};
use std::path::PathBuf;

use clap::error::ErrorKind as ClapErrorKind;
use clap::{Parser, Subcommand};

/// wasmplay - Go playground toolchain for WebAssembly
#[derive(Parser, Debug)]
#[command(
    name = "wasmplay",
    version,
    about = "Precompile Go packages for wasm and run programs against the store"
)]
pub struct Cli {
    /// Config file (default: ./wasmplay.toml if present)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override a config value for this invocation (repeatable, KEY=VALUE)
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE", global = true)]
    pub set: Vec<String>,

    /// Show session states and tool diagnostics summaries
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Build packages for wasm and archive them with their dependencies
    Precompile {
        /// Precompile every standard-library package
        #[arg(long, conflicts_with = "packages")]
        std: bool,
        /// Import paths to precompile
        #[arg(value_name = "PACKAGE", required_unless_present = "std")]
        packages: Vec<String>,
        /// Archive store directory (default: <asset_root>/prebuilt)
        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,
        /// Manifest file (default: <store>/manifest.txt)
        #[arg(long, value_name = "FILE")]
        manifest: Option<PathBuf>,
        /// Go module root to build non-std packages in
        #[arg(long, value_name = "DIR")]
        module_dir: Option<PathBuf>,
        /// Per-invocation limit for each go command, in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
    /// Format a Go source file
    Fmt {
        file: PathBuf,
        /// Write the result back instead of printing it
        #[arg(short = 'w', long)]
        write: bool,
    },
    /// Compile, link and stage a Go program as an execution frame
    Run {
        file: PathBuf,
        /// Asset root: a directory or an http(s) URL
        #[arg(long, value_name = "DIR|URL")]
        site: Option<String>,
        /// Persistent cache directory
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
        /// Where the execution frame is written
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
}

impl Cli {
    /// Parse CLI arguments from the environment. Help and version requests
    /// print and exit here.
    pub fn parse_args() -> io::Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        match Self::try_parse_from(&args) {
            Ok(cli) => Ok(cli),
            Err(e)
                if matches!(
                    e.kind(),
                    ClapErrorKind::DisplayHelp
                        | ClapErrorKind::DisplayVersion
                        | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) =>
            {
                e.exit()
            }
            Err(e) => Err(clap_to_io(e)),
        }
    }

    /// Parse CLI arguments from a slice (testable version)
    #[cfg(test)]
    pub fn parse_from_args(args: &[String]) -> io::Result<Self> {
        Self::try_parse_from(args).map_err(clap_to_io)
    }

    /// Parse `-s/--set KEY=VALUE` pairs.
    pub fn overrides(&self) -> io::Result<Vec<(String, String)>> {
        self.set
            .iter()
            .map(|s| {
                let (k, v) = s.split_once('=').ok_or_else(|| {
                    io::Error::new(
                        ErrorKind::InvalidInput,
                        format!("--set value must be KEY=VALUE, got: {}", s),
                    )
                })?;
                Ok((k.to_string(), v.to_string()))
            })
            .collect()
    }
}

fn clap_to_io(e: clap::Error) -> io::Error {
    let msg = e.to_string();
    match e.kind() {
        ClapErrorKind::UnknownArgument
        | ClapErrorKind::InvalidValue
        | ClapErrorKind::MissingRequiredArgument
        | ClapErrorKind::ArgumentConflict => io::Error::new(ErrorKind::InvalidInput, msg),
        _ => io::Error::other(msg),
    }
}
