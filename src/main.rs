//! wheelfix - Vendor native library dependencies into Python wheels.
//!
//! Repairs Windows wheels natively and drives auditwheel / delocate on Linux
//! and macOS.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use wheelfix::platform::{AuditwheelCommand, DelocateCommand, ExternalRepair};
use wheelfix::repair::{read_module, RepairOptions, DEFAULT_HASH_LEN, MAX_HASH_LEN};
use wheelfix::{discover, repair_wheel_with_progress, Exclusions, FsModuleSource, RenameMap};

/// Default output directory, relative to the working directory.
const DEFAULT_OUTPUT_DIR: &str = "wheelhouse";

/// Vendor native library dependencies into Python wheels.
#[derive(Parser, Debug)]
#[command(name = "wheelfix")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Vendor DLL dependencies into a Windows wheel
    Windows {
        /// Wheel to repair
        #[arg(long, value_name = "PATH")]
        wheel: PathBuf,

        /// Directory holding the candidate DLLs
        #[arg(long, value_name = "PATH")]
        dll_dir: PathBuf,

        /// Additional library name pattern to leave out (regex, anchored at the start)
        #[arg(short, long, value_name = "REGEX")]
        exclude: Vec<String>,

        /// Do not exclude python3*.dll and api-ms-win-crt-*.dll
        #[arg(long)]
        no_default_excludes: bool,

        /// Directory the repaired wheel is written to
        #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
        output_dir: PathBuf,

        /// Hex digits of the content hash in renamed libraries
        #[arg(long, default_value_t = DEFAULT_HASH_LEN)]
        hash_len: usize,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,
    },

    /// Vendor shared libraries into a Linux wheel with auditwheel
    Linux {
        /// Wheel to repair
        #[arg(long, value_name = "PATH")]
        wheel: PathBuf,

        /// Platform tag (defaults to the host, e.g. linux_x86_64)
        #[arg(long)]
        plat: Option<String>,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,
    },

    /// Vendor dylibs into a macOS wheel with delocate
    Macos {
        /// Wheel to repair
        #[arg(long, value_name = "PATH")]
        wheel: PathBuf,

        /// Directory the repaired wheel is written to
        #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
        output_dir: PathBuf,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,
    },

    /// Show the local dependency graph of a module
    Deps {
        /// Module to inspect (.pyd or .dll)
        #[arg(long, value_name = "PATH")]
        module: PathBuf,

        /// Directory holding the candidate DLLs
        #[arg(long, value_name = "PATH")]
        dll_dir: PathBuf,

        /// Additional library name pattern to leave out (regex, anchored at the start)
        #[arg(short, long, value_name = "REGEX")]
        exclude: Vec<String>,

        /// Do not exclude python3*.dll and api-ms-win-crt-*.dll
        #[arg(long)]
        no_default_excludes: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Windows {
            wheel,
            dll_dir,
            exclude,
            no_default_excludes,
            output_dir,
            hash_len,
            verbosity,
        } => {
            setup_logging(verbosity);
            let exclusions = build_exclusions(&exclude, no_default_excludes)?;
            cmd_windows(&wheel, &dll_dir, exclusions, output_dir, hash_len)
        }
        Commands::Linux {
            wheel,
            plat,
            verbosity,
        } => {
            setup_logging(verbosity);
            cmd_linux(&wheel, plat)
        }
        Commands::Macos {
            wheel,
            output_dir,
            verbosity,
        } => {
            setup_logging(verbosity);
            cmd_macos(&wheel, &output_dir)
        }
        Commands::Deps {
            module,
            dll_dir,
            exclude,
            no_default_excludes,
        } => {
            setup_logging(1);
            let exclusions = build_exclusions(&exclude, no_default_excludes)?;
            cmd_deps(&module, &dll_dir, &exclusions)
        }
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

fn build_exclusions(extra: &[String], no_defaults: bool) -> Result<Exclusions> {
    let base = if no_defaults {
        Exclusions::none()
    } else {
        Exclusions::windows_defaults()
    };
    base.extend(extra).context("invalid --exclude pattern")
}

fn ensure_file(path: &Path, what: &str) -> Result<()> {
    if !path.is_file() {
        bail!("{} not found: {}", what, path.display());
    }
    Ok(())
}

fn ensure_dir(path: &Path, what: &str) -> Result<()> {
    if !path.is_dir() {
        bail!("{} is not a directory: {}", what, path.display());
    }
    Ok(())
}

fn cmd_windows(
    wheel: &Path,
    dll_dir: &Path,
    exclusions: Exclusions,
    output_dir: PathBuf,
    hash_len: usize,
) -> Result<()> {
    ensure_file(wheel, "wheel")?;
    ensure_dir(dll_dir, "DLL directory")?;
    if hash_len == 0 || hash_len > MAX_HASH_LEN {
        bail!("--hash-len must be between 1 and {}, got {}", MAX_HASH_LEN, hash_len);
    }

    let options = RepairOptions {
        exclusions,
        output_dir,
        hash_len,
        ..Default::default()
    };

    let report = repair_wheel_with_progress(wheel, dll_dir, &options, |action| {
        println!("{action}");
    })
    .map_err(|e| {
        let stage = e.stage();
        anyhow::Error::new(e).context(format!(
            "failed to repair {} ({} stage)",
            wheel.display(),
            stage
        ))
    })?;

    info!(
        "vendored {} libraries into {}",
        report.renames.len(),
        report.primary
    );
    println!("done: path to repaired wheel: {}", report.output.display());
    Ok(())
}

fn cmd_linux(wheel: &Path, plat: Option<String>) -> Result<()> {
    ensure_file(wheel, "wheel")?;
    let mut cmd = AuditwheelCommand::new(wheel);
    if let Some(plat) = plat {
        cmd = cmd.with_plat(plat);
    }
    cmd.run().context("auditwheel repair failed")?;
    Ok(())
}

fn cmd_macos(wheel: &Path, output_dir: &Path) -> Result<()> {
    ensure_file(wheel, "wheel")?;
    DelocateCommand::new(wheel, output_dir)
        .run()
        .context("delocate-wheel failed")?;
    Ok(())
}

fn cmd_deps(module: &Path, dll_dir: &Path, exclusions: &Exclusions) -> Result<()> {
    ensure_file(module, "module")?;
    ensure_dir(dll_dir, "DLL directory")?;

    let basename = module
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("invalid module path: {}", module.display()))?;
    let data = fs::read(module).with_context(|| format!("failed to read {}", module.display()))?;

    let source = FsModuleSource::open(dll_dir)?;
    let root = read_module(basename, module.to_path_buf(), &data)?;
    let graph = discover(root, &source, exclusions)?;
    let renames = RenameMap::compute(&graph, &source, DEFAULT_HASH_LEN)?;

    for node in graph.nodes() {
        println!("{}", node.module.basename);
        for dep in &node.dependencies {
            println!("    {} -> {}", dep, renames.get(dep).unwrap_or(dep));
        }
    }
    println!("{} local dependencies", graph.len() - 1);
    Ok(())
}
