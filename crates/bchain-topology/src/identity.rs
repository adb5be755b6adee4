//! Which entry of the replica list is "this node".

use crate::error::{ConfigError, Result};

/// How the local replica is identified within the configured list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalIdentity {
    /// Explicit position in the list (useful when every replica runs on
    /// localhost).
    Index(usize),
    /// Exact address match.
    Address(String),
    /// First entry whose host part equals this host name.
    Host(String),
}

impl LocalIdentity {
    /// Pick the local address out of `addrs`.
    pub fn select<'a>(&self, addrs: &'a [String]) -> Result<&'a str> {
        match self {
            LocalIdentity::Index(index) => addrs
                .get(*index)
                .map(String::as_str)
                .ok_or(ConfigError::IndexOutOfRange {
                    index: *index,
                    n: addrs.len(),
                }),
            LocalIdentity::Address(addr) => addrs
                .iter()
                .find(|a| *a == addr)
                .map(String::as_str)
                .ok_or_else(|| ConfigError::LocalAddressNotFound { local: addr.clone() }),
            LocalIdentity::Host(host) => {
                for addr in addrs {
                    if host_of(addr)? == host.as_str() {
                        return Ok(addr.as_str());
                    }
                }
                Err(ConfigError::HostNotFound { host: host.clone() })
            }
        }
    }
}

/// Host part of a `host:port` address. Bracketed IPv6 hosts are unwrapped.
pub fn host_of(addr: &str) -> Result<&str> {
    let malformed = || ConfigError::MalformedAddress {
        address: addr.to_string(),
    };
    let (host, port) = addr.rsplit_once(':').ok_or_else(malformed)?;
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']').ok_or_else(malformed),
        None => Ok(host),
    }
}
