//! Error types for configuration loading and process supervision.
//!
//! Configuration errors are fatal and abort startup. Process errors are local
//! to a single supervised process and never take down the rest of the set.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Problems with the configuration file. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no processes defined in configuration")]
    NoProcesses,

    #[error("{kind} {index} is missing a shortname")]
    MissingShortname { kind: &'static str, index: usize },

    #[error("{kind} {index} ({shortname}) is missing a command")]
    MissingCommand {
        kind: &'static str,
        index: usize,
        shortname: String,
    },

    #[error("duplicate shortname {0:?}")]
    DuplicateShortname(String),

    #[error("config file already exists at {0}")]
    AlreadyExists(PathBuf),

    #[error("failed to write config file {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures of a single process's start or stop.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("process {0} has been stopped")]
    AlreadyStopped(String),

    #[error("failed to spawn {shortname}")]
    Spawn {
        shortname: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to send SIGTERM to {shortname}")]
    Signal {
        shortname: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to kill {shortname}")]
    Kill {
        shortname: String,
        #[source]
        source: io::Error,
    },

    #[error("failed waiting for {shortname} to exit")]
    Wait {
        shortname: String,
        #[source]
        source: io::Error,
    },
}
