//! Repair on Linux and macOS through the platform's established tools.
//!
//! `auditwheel` and `delocate` already vendor and rename shared libraries
//! for ELF and Mach-O wheels. These wrappers only assemble their command
//! lines and check the exit status.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::info;

use crate::error::{Error, Result};

/// Libraries guaranteed by the manylinux2014 policy, never vendored.
pub const MANYLINUX_EXCLUDES: &[&str] = &[
    "libdl.so.2",
    "librt.so.1",
    "libc.so.6",
    "libm.so.6",
    "libpthread.so.0",
];

/// Returns the platform tag of the running host (`linux_x86_64` and so on).
pub fn host_platform_tag() -> String {
    format!("linux_{}", std::env::consts::ARCH)
}

/// An external repair tool invocation.
pub trait ExternalRepair {
    /// Program name.
    fn program(&self) -> &str;

    /// Arguments passed to the program.
    fn args(&self) -> Vec<OsString>;

    /// Runs the tool to completion.
    fn run(&self) -> Result<()> {
        let program = self.program();
        let args = self.args();
        info!("running {} {:?}", program, args);

        let status = Command::new(program)
            .args(&args)
            .status()
            .map_err(|source| Error::ToolLaunch {
                tool: program.to_string(),
                source,
            })?;
        if !status.success() {
            return Err(Error::ExternalTool {
                tool: program.to_string(),
                status,
            });
        }
        Ok(())
    }
}

/// `auditwheel repair` for ELF wheels.
#[derive(Debug, Clone)]
pub struct AuditwheelCommand {
    /// Wheel to repair
    pub wheel: PathBuf,
    /// Platform tag for the repaired wheel
    pub plat: String,
    /// Libraries left out of the wheel
    pub excludes: Vec<String>,
}

impl AuditwheelCommand {
    /// Creates the invocation with the host tag and the manylinux exclusions.
    pub fn new<P: AsRef<Path>>(wheel: P) -> Self {
        Self {
            wheel: wheel.as_ref().to_path_buf(),
            plat: host_platform_tag(),
            excludes: MANYLINUX_EXCLUDES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Overrides the platform tag.
    pub fn with_plat(mut self, plat: impl Into<String>) -> Self {
        self.plat = plat.into();
        self
    }
}

impl ExternalRepair for AuditwheelCommand {
    fn program(&self) -> &str {
        "auditwheel"
    }

    fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "repair".into(),
            "--plat".into(),
            self.plat.clone().into(),
            "--strip".into(),
        ];
        for lib in &self.excludes {
            args.push("--exclude".into());
            args.push(lib.into());
        }
        args.push(self.wheel.clone().into_os_string());
        args
    }
}

/// `delocate-wheel` for Mach-O wheels.
#[derive(Debug, Clone)]
pub struct DelocateCommand {
    /// Wheel to repair
    pub wheel: PathBuf,
    /// Directory the repaired wheel is written to
    pub wheel_dir: PathBuf,
}

impl DelocateCommand {
    /// Creates the invocation.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(wheel: P, wheel_dir: Q) -> Self {
        Self {
            wheel: wheel.as_ref().to_path_buf(),
            wheel_dir: wheel_dir.as_ref().to_path_buf(),
        }
    }
}

impl ExternalRepair for DelocateCommand {
    fn program(&self) -> &str {
        "delocate-wheel"
    }

    fn args(&self) -> Vec<OsString> {
        vec![
            "--dylibs-only".into(),
            "--wheel-dir".into(),
            self.wheel_dir.clone().into_os_string(),
            self.wheel.clone().into_os_string(),
        ]
    }
}
