//! Connection URI parsing.
//!
//! Accepts `mongodb://[user[:password]@]host[:port][,host[:port]...][/database][?key=value&...]`
//! and the `mongodb+srv://` variant. Only the structure is validated here;
//! whether the hosts are reachable is the driver's concern.
//!
//! Credentials, the database path and option values are percent-decoded.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use crate::error::PoolError;

/// Default server port.
pub const DEFAULT_PORT: u16 = 27017;

const SCHEME: &str = "mongodb://";
const SRV_SCHEME: &str = "mongodb+srv://";

// RFC 3986 unreserved characters pass through unescaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A server address from the URI host list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    /// Hostname or IP address.
    pub host: String,
    /// Port (default: 27017).
    pub port: u16,
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A validated connection URI.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionUri {
    raw: String,
    srv: bool,
    username: Option<String>,
    password: Option<String>,
    hosts: Vec<ServerAddress>,
    database: Option<String>,
    options: BTreeMap<String, String>,
}

impl ConnectionUri {
    /// Parse and validate a connection URI.
    pub fn parse(uri: &str) -> Result<Self, PoolError> {
        let uri = uri.trim();
        let (rest, srv) = if let Some(rest) = uri.strip_prefix(SRV_SCHEME) {
            (rest, true)
        } else if let Some(rest) = uri.strip_prefix(SCHEME) {
            (rest, false)
        } else {
            return Err(invalid(format!(
                "uri must start with {SCHEME} or {SRV_SCHEME}"
            )));
        };

        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, Some(query)),
            None => (rest, None),
        };
        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, Some(path)),
            None => (rest, None),
        };
        let (userinfo, hostlist) = match authority.rsplit_once('@') {
            Some((userinfo, hostlist)) => (Some(userinfo), hostlist),
            None => (None, authority),
        };

        let (username, password) = match userinfo {
            Some(userinfo) => {
                let (user, pass) = match userinfo.split_once(':') {
                    Some((user, pass)) => (user, Some(decode(pass, "password")?)),
                    None => (userinfo, None),
                };
                if user.is_empty() {
                    return Err(invalid("empty username"));
                }
                (Some(decode(user, "username")?), pass)
            }
            None => (None, None),
        };

        let hosts = hostlist
            .split(',')
            .map(parse_host)
            .collect::<Result<Vec<_>, _>>()?;
        if srv && hosts.len() != 1 {
            return Err(invalid("srv uri must name exactly one host"));
        }

        let database = path
            .filter(|p| !p.is_empty())
            .map(|p| decode(p, "database"))
            .transpose()?;

        let mut options = BTreeMap::new();
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid(format!("invalid option: {pair}")))?;
            if key.is_empty() {
                return Err(invalid(format!("invalid option: {pair}")));
            }
            options.insert(key.to_ascii_lowercase(), decode(value, key)?);
        }

        Ok(Self {
            raw: uri.to_string(),
            srv,
            username,
            password,
            hosts,
            database,
            options,
        })
    }

    /// The URI exactly as given (trimmed).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether this is a `mongodb+srv://` URI.
    #[must_use]
    pub fn is_srv(&self) -> bool {
        self.srv
    }

    /// The username, if credentials were supplied.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// The password, if supplied.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// The seed host list.
    #[must_use]
    pub fn hosts(&self) -> &[ServerAddress] {
        &self.hosts
    }

    /// The default database from the URI path.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Look up a query option. Keys are case-insensitive.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// All query options, keys lowercased.
    #[must_use]
    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }
}

impl FromStr for ConnectionUri {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Credentials stay out of logs.
impl fmt::Debug for ConnectionUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionUri")
            .field("srv", &self.srv)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("hosts", &self.hosts)
            .field("database", &self.database)
            .field("options", &self.options)
            .finish()
    }
}

impl fmt::Display for ConnectionUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.srv { SRV_SCHEME } else { SCHEME })?;
        if let Some(user) = &self.username {
            write!(f, "{}@", utf8_percent_encode(user, COMPONENT))?;
        }
        let mut first = true;
        for host in &self.hosts {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{host}")?;
        }
        if let Some(db) = &self.database {
            write!(f, "/{}", utf8_percent_encode(db, COMPONENT))?;
        }
        Ok(())
    }
}

fn parse_host(host: &str) -> Result<ServerAddress, PoolError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    // Bracketed IPv6 literal: [::1]:27017
    if let Some(rest) = host.strip_prefix('[') {
        let (addr, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid(format!("unterminated ipv6 literal: {host}")))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => parse_port(port)?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => return Err(invalid(format!("invalid host: {host}"))),
        };
        return Ok(ServerAddress {
            host: addr.to_string(),
            port,
        });
    }
    match host.split_once(':') {
        Some((name, port)) => {
            if name.is_empty() {
                return Err(invalid(format!("invalid host: {host}")));
            }
            Ok(ServerAddress {
                host: name.to_string(),
                port: parse_port(port)?,
            })
        }
        None => Ok(ServerAddress {
            host: host.to_string(),
            port: DEFAULT_PORT,
        }),
    }
}

fn parse_port(port: &str) -> Result<u16, PoolError> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid(format!("invalid port: {port}"))),
        Ok(port) => Ok(port),
    }
}

// `percent_decode_str` passes stray `%` through, so escapes are checked first.
fn decode(component: &str, what: &str) -> Result<String, PoolError> {
    let bytes = component.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return Err(invalid(format!("malformed escape in {what}")));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    percent_decode_str(component)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| invalid(format!("{what} is not valid utf-8 after decoding")))
}

fn invalid(message: impl Into<String>) -> PoolError {
    PoolError::Configuration(format!("invalid connection uri: {}", message.into()))
}
