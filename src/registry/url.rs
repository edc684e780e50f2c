//! Service names as accepted by the registry bootstrap.
//!
//! Accepted forms: `name`, `/name`, `//host/name`, `//host:port/name` and
//! `//:port/name`. Host and port fall back to the bootstrap configuration
//! when omitted.

use std::fmt;

/// A service name that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed service name '{name}': {reason}")]
pub struct MalformedName {
    pub name: String,
    pub reason: &'static str,
}

/// Parsed service name with optional registry location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUrl {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: String,
}

impl ServiceUrl {
    pub fn parse(raw: &str) -> Result<Self, MalformedName> {
        let malformed = |reason| MalformedName {
            name: raw.to_string(),
            reason,
        };

        let (host, port, name) = match raw.strip_prefix("//") {
            Some(rest) => {
                let (authority, name) = rest
                    .split_once('/')
                    .ok_or_else(|| malformed("missing service name"))?;
                let (host, port) = split_authority(authority).map_err(malformed)?;
                (host, port, name)
            }
            None => (None, None, raw.strip_prefix('/').unwrap_or(raw)),
        };

        if name.is_empty() {
            return Err(malformed("empty service name"));
        }
        if name.contains('/') {
            return Err(malformed("service name contains '/'"));
        }

        Ok(Self {
            host,
            port,
            name: name.to_string(),
        })
    }
}

fn split_authority(authority: &str) -> Result<(Option<String>, Option<u16>), &'static str> {
    let (host, port) = match authority.strip_prefix('[') {
        // Bracketed IPv6 literal.
        Some(rest) => {
            let (host, tail) = rest.split_once(']').ok_or("unterminated '['")?;
            let port = match tail {
                "" => None,
                tail => Some(tail.strip_prefix(':').ok_or("garbage after host")?),
            };
            (host, port)
        }
        None => match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        },
    };

    let port = match port {
        None => None,
        Some(port) => match port.parse::<u16>() {
            Ok(0) | Err(_) => return Err("invalid port"),
            Ok(port) => Some(port),
        },
    };
    let host = (!host.is_empty()).then(|| host.to_string());
    Ok((host, port))
}

impl fmt::Display for ServiceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.is_none() && self.port.is_none() {
            return f.write_str(&self.name);
        }
        f.write_str("//")?;
        if let Some(host) = &self.host {
            if host.contains(':') {
                write!(f, "[{}]", host)?;
            } else {
                f.write_str(host)?;
            }
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "/{}", self.name)
    }
}
