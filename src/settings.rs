//! TOML configuration for the server binaries.
//!
//! Everything is optional: explicit CLI flags override file values and
//! built-in defaults fill the rest.

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Settings file errors.
#[derive(Debug)]
pub enum Error {
    /// The file could not be read.
    Io(io::Error),
    /// The file is not valid TOML for these settings.
    Parse(toml::de::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "cannot read settings: {err}"),
            Error::Parse(err) => write!(f, "cannot parse settings: {err}"),
        }
    }
}

impl std::error::Error for Error {}

/// Settings shared by the server binaries.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    /// Interface to bind, `0.0.0.0` when absent.
    pub listen: Option<String>,
    /// Extent store working directory (extent server only).
    pub extent_dir: Option<PathBuf>,
    /// Paxos membership section (lock server only).
    pub paxos: Option<PaxosSettings>,
}

/// Paxos roster for a replicated lock service.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaxosSettings {
    /// This node's Paxos address (`host:port`).
    pub listen: String,
    /// The full member roster, first member bootstraps the view.
    pub members: Vec<String>,
    /// Directory for the durable Paxos log.
    pub log_dir: Option<PathBuf>,
}

impl ServerSettings {
    /// Reads settings from `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&text).map_err(Error::Parse)
    }

    /// Reads settings when a path was given, defaults otherwise.
    pub fn load_optional(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ServerSettings;

    #[test]
    fn test_parse_full_settings() {
        let text = r#"
            listen = "127.0.0.1"
            extent_dir = "/var/lib/extentfs"

            [paxos]
            listen = "127.0.0.1:9001"
            members = ["127.0.0.1:9001", "127.0.0.1:9002", "127.0.0.1:9003"]
            log_dir = "/var/lib/extentfs/paxos"
        "#;
        let settings: ServerSettings = toml::from_str(text).expect("parse");
        assert_eq!(settings.listen.as_deref(), Some("127.0.0.1"));
        let paxos = settings.paxos.expect("paxos section");
        assert_eq!(paxos.members.len(), 3);
        assert_eq!(paxos.listen, "127.0.0.1:9001");
    }

    #[test]
    fn test_empty_settings() {
        let settings: ServerSettings = toml::from_str("").expect("parse");
        assert!(settings.listen.is_none());
        assert!(settings.paxos.is_none());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(toml::from_str::<ServerSettings>("mystery = 1").is_err());
    }
}
