//! Configuration management for rennen.
//!
//! This module defines the structure of the `ren.json` configuration file,
//! loads and validates it, and writes the starter file for `ren init`.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::process::ProcessSpec;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "./ren.json";

/// Top-level configuration structure corresponding to `ren.json`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Long-running processes, one tab each. Started on launch.
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
    /// Shortcut commands run on demand from the overview.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<ProcessConfig>,
}

/// Configuration for a single process or command.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProcessConfig {
    /// Unique name, also used as the tab label.
    #[serde(default)]
    pub shortname: String,
    /// Shell command line.
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub description: String,
}

impl Config {
    /// Checks the invariants the supervisor relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processes.is_empty() {
            return Err(ConfigError::NoProcesses);
        }
        let mut seen = HashSet::new();
        let entries = self
            .processes
            .iter()
            .enumerate()
            .map(|(idx, p)| ("process", idx, p))
            .chain(
                self.commands
                    .iter()
                    .enumerate()
                    .map(|(idx, p)| ("command", idx, p)),
            );
        for (kind, idx, entry) in entries {
            let shortname = entry.shortname.trim();
            if shortname.is_empty() {
                return Err(ConfigError::MissingShortname {
                    kind,
                    index: idx + 1,
                });
            }
            if entry.command.trim().is_empty() {
                return Err(ConfigError::MissingCommand {
                    kind,
                    index: idx + 1,
                    shortname: shortname.to_string(),
                });
            }
            if !seen.insert(shortname) {
                return Err(ConfigError::DuplicateShortname(shortname.to_string()));
            }
        }
        Ok(())
    }

    pub fn process_specs(&self) -> Vec<ProcessSpec> {
        self.processes.iter().map(ProcessSpec::from).collect()
    }

    pub fn command_specs(&self) -> Vec<ProcessSpec> {
        self.commands.iter().map(ProcessSpec::from).collect()
    }

    /// The starter configuration written by `ren init`.
    pub fn sample() -> Self {
        Self {
            processes: vec![ProcessConfig {
                shortname: "test".to_string(),
                command: "echo 'hello world'".to_string(),
                description: "a sample process".to_string(),
            }],
            commands: Vec::new(),
        }
    }
}

impl From<&ProcessConfig> for ProcessSpec {
    fn from(config: &ProcessConfig) -> Self {
        ProcessSpec {
            shortname: config.shortname.trim().to_string(),
            command: config.command.clone(),
            description: config.description.clone(),
        }
    }
}

/// Loads, parses and validates the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Writes the sample configuration, refusing to touch an existing file.
pub fn write_default_config(path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        Err(err) => return Err(write_err(err)),
    };
    let mut body = serde_json::to_string_pretty(&Config::sample()).map_err(|source| {
        ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        }
    })?;
    body.push('\n');
    file.write_all(body.as_bytes()).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_processes_and_commands() {
        let raw = r#"
{
  "processes": [
    { "shortname": "api", "command": "cargo run", "description": "backend" },
    { "shortname": "web", "command": "pnpm dev" }
  ],
  "commands": [
    { "shortname": "migrate", "command": "make migrate" }
  ]
}
"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.processes.len(), 2);
        assert_eq!(config.processes[0].description, "backend");
        assert_eq!(config.processes[1].description, "");
        assert_eq!(config.commands[0].shortname, "migrate");
        let specs = config.process_specs();
        assert_eq!(specs[1].shortname, "web");
        assert_eq!(specs[1].command, "pnpm dev");
    }

    #[test]
    fn rejects_empty_process_list() {
        let config: Config = serde_json::from_str(r#"{ "processes": [] }"#).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::NoProcesses)));

        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::NoProcesses)));
    }

    #[test]
    fn rejects_missing_fields() {
        let config: Config =
            serde_json::from_str(r#"{ "processes": [ { "command": "ls" } ] }"#).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingShortname { index: 1, .. })
        ));

        let config: Config = serde_json::from_str(
            r#"{ "processes": [ { "shortname": "a", "command": "ls" }, { "shortname": "b", "command": "  " } ] }"#,
        )
        .unwrap();
        match config.validate() {
            Err(ConfigError::MissingCommand {
                index, shortname, ..
            }) => {
                assert_eq!(index, 2);
                assert_eq!(shortname, "b");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_duplicate_shortnames_across_commands() {
        let config: Config = serde_json::from_str(
            r#"{ "processes": [ { "shortname": "a", "command": "ls" } ],
                 "commands": [ { "shortname": "a", "command": "pwd" } ] }"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateShortname(name)) if name == "a"
        ));
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ren.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
        let missing = dir.path().join("missing.json");
        assert!(matches!(load_config(&missing), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn init_writes_once_then_refuses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ren.json");
        write_default_config(&path).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.processes[0].shortname, "test");
        assert_eq!(config.processes[0].command, "echo 'hello world'");

        let before = std::fs::read_to_string(&path).unwrap();
        assert!(matches!(
            write_default_config(&path),
            Err(ConfigError::AlreadyExists(_))
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }
}
