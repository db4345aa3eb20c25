//! Connection options.

use std::path::PathBuf;
use std::time::Duration;

use no_panic::no_panic;
use url::Url;

use crate::error::Error;

/// Default PostgreSQL port.
pub const DEFAULT_PORT: u16 = 5432;

/// SSL connection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Don't use SSL
    Disable,
    /// Try SSL, fall back to unencrypted if not supported
    #[default]
    Prefer,
    /// Require SSL connection
    Require,
}

/// One candidate server endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServerAddress {
    /// TCP host and port. The host is resolved at connect time.
    Tcp { host: String, port: u16 },
    /// Full path of a Unix-domain socket file.
    Unix(PathBuf),
}

impl ServerAddress {
    /// Build the socket path PostgreSQL listens on inside `dir`.
    pub fn unix_in_dir(dir: impl Into<PathBuf>, port: u16) -> Self {
        let mut path: PathBuf = dir.into();
        path.push(format!(".s.PGSQL.{}", port));
        ServerAddress::Unix(path)
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, ServerAddress::Unix(_))
    }
}

impl std::fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerAddress::Tcp { host, port } => write!(f, "{}:{}", host, port),
            ServerAddress::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Connection options for PostgreSQL.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Candidate addresses, tried in order until one completes the handshake.
    ///
    /// Default: `[]`
    pub addresses: Vec<ServerAddress>,

    /// Username for authentication.
    ///
    /// Default: `""`
    pub user: String,

    /// Database name to use.
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// Password for authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Application name to report to the server.
    ///
    /// Default: `None`
    pub application_name: Option<String>,

    /// SSL connection mode.
    ///
    /// Default: `SslMode::Prefer`
    pub ssl_mode: SslMode,

    /// Additional startup parameters.
    ///
    /// Default: `[]`
    pub params: Vec<(String, String)>,

    /// Abort batches on the first failure or on a row-returning entry.
    ///
    /// Default: `false`
    pub strict_mode: bool,

    /// Number of named server-side statements kept per connection.
    ///
    /// Default: `50`
    pub prepared_statement_cache_size: usize,

    /// Number of statement descriptions kept per connection.
    ///
    /// Default: `250`
    pub description_cache_size: usize,

    /// Wait limit for user requests. Zero waits forever.
    ///
    /// Default: `0s`
    pub query_timeout: Duration,

    /// Wait limit for catalog and session-setup requests. Zero waits forever.
    ///
    /// Default: `60s`
    pub internal_query_timeout: Duration,

    /// Share the type registry with other connections to the same server.
    ///
    /// Default: `true`
    pub shared_registry: bool,
}

impl Default for Opts {
    #[no_panic]
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            user: String::new(),
            database: None,
            password: None,
            application_name: None,
            ssl_mode: SslMode::Prefer,
            params: Vec::new(),
            strict_mode: false,
            prepared_statement_cache_size: 50,
            description_cache_size: 250,
            query_timeout: Duration::ZERO,
            internal_query_timeout: Duration::from_secs(60),
            shared_registry: true,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value {
        "true" | "True" | "1" | "yes" | "on" => Ok(true),
        "false" | "False" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidUsage(format!("Invalid {}: {}", key, value))),
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, Error> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| Error::InvalidUsage(format!("Invalid {}: {} ({})", key, value, e)))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, Error> {
    value
        .parse()
        .map_err(|e| Error::InvalidUsage(format!("Invalid {}: {} ({})", key, value, e)))
}

/// Parse one `host[:port]` entry of a comma-separated host list.
fn parse_host_entry(entry: &str) -> Result<ServerAddress, Error> {
    let invalid = || Error::InvalidUsage(format!("Invalid host entry: '{}'", entry));

    let (host, port) = if let Some(rest) = entry.strip_prefix('[') {
        // [v6addr]:port
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        match tail.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if tail.is_empty() => (host, None),
            None => return Err(invalid()),
        }
    } else {
        match entry.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (entry, None),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
        None => DEFAULT_PORT,
    };
    Ok(ServerAddress::Tcp {
        host: host.to_string(),
        port,
    })
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Build options from a URL with a single host.
    ///
    /// Use `TryFrom<&str>` for host lists.
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["postgres", "postgresql", "pg"].contains(&url.scheme()) {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'postgres://' or 'pg://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts {
            user: url.username().to_string(),
            password: url.password().map(|s| s.to_string()),
            database: url.path().strip_prefix('/').and_then(|s| {
                if s.is_empty() {
                    None
                } else {
                    Some(s.to_string())
                }
            }),
            ..Opts::default()
        };

        let port = url.port().unwrap_or(DEFAULT_PORT);
        if let Some(host) = url.host_str().filter(|h| !h.is_empty()) {
            opts.addresses.push(ServerAddress::Tcp {
                host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
                port,
            });
        }

        opts.apply_query(url, port)?;

        if opts.addresses.is_empty() {
            opts.addresses.push(ServerAddress::Tcp {
                host: "localhost".to_string(),
                port,
            });
        }
        Ok(opts)
    }
}

impl Opts {
    /// Supported query parameters:
    /// - `sslmode`: disable, prefer, require
    /// - `application_name`: application name
    /// - `host`: a directory adds a Unix-domain candidate
    /// - `strict_mode`: true/false
    /// - `prepared_statement_cache_size`, `description_cache_size`: entry counts
    /// - `query_timeout`, `internal_query_timeout`: milliseconds, 0 = forever
    /// - `shared_registry`: true/false
    ///
    /// Anything else is sent as a startup parameter.
    fn apply_query(&mut self, url: &Url, port: u16) -> Result<(), Error> {
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "sslmode" => {
                    self.ssl_mode = match value.as_ref() {
                        "disable" => SslMode::Disable,
                        "prefer" => SslMode::Prefer,
                        "require" => SslMode::Require,
                        _ => {
                            return Err(Error::InvalidUsage(format!(
                                "Invalid sslmode: expected one of ['disable', 'prefer', 'require'], got {}",
                                value
                            )));
                        }
                    };
                }
                "application_name" => {
                    self.application_name = Some(value.to_string());
                }
                "host" if value.starts_with('/') => {
                    self.addresses
                        .push(ServerAddress::unix_in_dir(value.as_ref(), port));
                }
                "strict_mode" => self.strict_mode = parse_bool(&key, &value)?,
                "shared_registry" => self.shared_registry = parse_bool(&key, &value)?,
                "prepared_statement_cache_size" => {
                    self.prepared_statement_cache_size = parse_usize(&key, &value)?;
                }
                "description_cache_size" => {
                    self.description_cache_size = parse_usize(&key, &value)?;
                }
                "query_timeout" => self.query_timeout = parse_millis(&key, &value)?,
                "internal_query_timeout" => {
                    self.internal_query_timeout = parse_millis(&key, &value)?;
                }
                _ => {
                    self.params.push((key.to_string(), value.to_string()));
                }
            }
        }
        Ok(())
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    /// Parse a PostgreSQL connection URL.
    ///
    /// Format: `postgres://[user[:password]@][host[:port][,host[:port]..]][/database][?param1=value1&..]`
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| Error::InvalidUsage(format!("Invalid URL: {}", s)))?;

        let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let (authority, tail) = rest.split_at(authority_end);
        let (userinfo, hosts) = match authority.rsplit_once('@') {
            Some((userinfo, hosts)) => (Some(userinfo), hosts),
            None => (None, authority),
        };

        if !hosts.contains(',') {
            let url =
                Url::parse(s).map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
            return Self::try_from(&url);
        }

        // The url crate accepts a single authority only; parse the rest
        // against a placeholder host and fill in the host list ourselves.
        let placeholder = match userinfo {
            Some(userinfo) => format!("{}://{}@placeholder{}", scheme, userinfo, tail),
            None => format!("{}://placeholder{}", scheme, tail),
        };
        let url = Url::parse(&placeholder)
            .map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
        let mut opts = Self::try_from(&url)?;

        let listed = hosts
            .split(',')
            .map(parse_host_entry)
            .collect::<Result<Vec<_>, _>>()?;
        let unix: Vec<_> = opts
            .addresses
            .drain(..)
            .filter(ServerAddress::is_unix)
            .collect();
        opts.addresses = listed;
        opts.addresses.extend(unix);
        Ok(opts)
    }
}
