//! Server identity: version, startup-reported settings, and the key used to
//! share a type registry between connections.

use std::fmt;

use crate::error::{Error, Result};
use crate::opts::ServerAddress;

/// PostgreSQL server version as reported by `server_version`.
///
/// Accepts `16`, `16.2`, `9.6.24`, `17beta1` and trailing build text such as
/// `16.2 (Debian 16.2-1.pgdg120+2)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: Option<u32>,
    pub revision: Option<u32>,
    /// Pre-release tag such as `beta1` or `devel`
    pub tag: Option<String>,
}

impl Version {
    pub fn new(major: u32, minor: Option<u32>, revision: Option<u32>) -> Self {
        Self {
            major,
            minor,
            revision,
            tag: None,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || Error::Protocol(format!("Invalid version string: {}", s));

        // Build information after the first space is dropped
        let head = s.trim().split_whitespace().next().ok_or_else(invalid)?;

        let digits_end = |part: &str| {
            part.char_indices()
                .find(|(_, c)| !c.is_ascii_digit())
                .map_or(part.len(), |(i, _)| i)
        };

        let mut numbers = Vec::with_capacity(3);
        let mut tag = None;
        for part in head.split('.') {
            let end = digits_end(part);
            let (number, rest) = part.split_at(end);
            if number.is_empty() {
                return Err(invalid());
            }
            numbers.push(number.parse::<u32>().map_err(|_e| invalid())?);
            if !rest.is_empty() {
                tag = Some(rest.to_string());
                break;
            }
            if numbers.len() == 3 {
                break;
            }
        }

        let mut numbers = numbers.into_iter();
        let major = numbers.next().ok_or_else(invalid)?;
        Ok(Self {
            major,
            minor: numbers.next(),
            revision: numbers.next(),
            tag,
        })
    }

    pub fn minor_value(&self) -> u32 {
        self.minor.unwrap_or(0)
    }

    pub fn revision_value(&self) -> u32 {
        self.revision.unwrap_or(0)
    }

    /// True if this version is at least `major.minor`.
    pub fn is_minimum(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor_value()) >= (major, minor)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.major)?;
        if let Some(minor) = self.minor {
            write!(f, ".{}", minor)?;
            if let Some(revision) = self.revision {
                write!(f, ".{}", revision)?;
            }
        }
        if let Some(tag) = &self.tag {
            write!(f, "{}", tag)?;
        }
        Ok(())
    }
}

/// Facts about the server learned during startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerInfo {
    pub version: Version,
    pub encoding: String,
    pub integer_datetimes: bool,
}

impl ServerInfo {
    /// Build from the ParameterStatus values sent during startup.
    pub fn from_params(params: &[(String, String)]) -> Result<Self> {
        let lookup = |name: &str| {
            params
                .iter()
                .rev()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };

        let version = lookup("server_version")
            .ok_or_else(|| Error::Protocol("server did not report server_version".into()))
            .and_then(Version::parse)?;

        Ok(Self {
            version,
            encoding: lookup("server_encoding").unwrap_or("UTF8").to_string(),
            integer_datetimes: lookup("integer_datetimes").is_none_or(|v| v == "on"),
        })
    }
}

/// Identity of a server endpoint, used to share a type registry.
///
/// Two connections with equal `ServerConnectionInfo` see the same catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerConnectionInfo {
    pub server: ServerInfo,
    pub address: ServerAddress,
    pub database: String,
}

impl ServerConnectionInfo {
    pub fn new(server: ServerInfo, address: ServerAddress, database: impl Into<String>) -> Self {
        Self {
            server,
            address,
            database: database.into(),
        }
    }
}
