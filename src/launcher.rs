//! # Process Launcher
//!
//! Replaces the `ssm-env` process with the workload. The binary is located
//! via `PATH` before any secret is fetched, so a typo in the command fails
//! fast. `argv[0]` is passed through as given.

use std::convert::Infallible;
use std::ffi::OsString;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(
        "no command is given, ssm-env can't determine the entrypoint (command), please specify it \
         explicitly or let the webhook query it"
    )]
    NoCommand,
    #[error("binary not found: {program:?}")]
    BinaryNotFound {
        program: OsString,
        #[source]
        source: which::Error,
    },
    #[error("failed to exec {program:?}: {source}")]
    Exec {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Workload command line, split off the launcher's own argv
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    /// argv as given, starting with the program name
    pub argv: Vec<OsString>,
    /// Absolute path of the program
    pub binary: PathBuf,
}

impl Workload {
    /// Builds the workload from the launcher's argv (`argv[0]` is the launcher)
    pub fn from_args(args: impl IntoIterator<Item = OsString>) -> Result<Self, LaunchError> {
        let argv: Vec<OsString> = args.into_iter().skip(1).collect();
        let program = argv.first().ok_or(LaunchError::NoCommand)?;
        let binary = which::which(program).map_err(|source| LaunchError::BinaryNotFound {
            program: program.clone(),
            source,
        })?;

        Ok(Self { argv, binary })
    }

    /// Replaces the current process with the workload
    ///
    /// The new process sees exactly `environment`. Only returns on failure.
    pub fn exec(self, environment: Vec<(OsString, OsString)>) -> Result<Infallible, LaunchError> {
        info!(binary = %self.binary.display(), argv = ?self.argv, "Spawning process");

        let mut command = Command::new(&self.binary);
        if let Some((arg0, rest)) = self.argv.split_first() {
            command.arg0(arg0).args(rest);
        }
        command.env_clear().envs(environment);

        let source = command.exec();
        Err(LaunchError::Exec {
            program: self.binary,
            source,
        })
    }
}
