//! Configuration errors raised before any network activity.

use thiserror::Error;

/// Result type for topology resolution.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Invalid chain configuration. Always fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No replica addresses were configured.
    #[error("no replica addresses provided")]
    NoAddresses,

    /// Chain length is not of the form 3f+1 with f >= 1.
    #[error("chain length must be 3f+1 with f >= 1, got {n}")]
    InvalidChainSize { n: usize },

    /// The same address appears more than once.
    #[error("duplicate replica address {address}")]
    DuplicateAddress { address: String },

    /// The local address is not part of the chain.
    #[error("local address {local} not found in replica list")]
    LocalAddressNotFound { local: String },

    /// Explicit local index does not address an entry.
    #[error("index out of bounds {index}; must be less than {n}")]
    IndexOutOfRange { index: usize, n: usize },

    /// No entry matches the local host name.
    #[error("couldn't find host '{host}' in replica list")]
    HostNotFound { host: String },

    /// An address could not be split into host and port.
    #[error("malformed replica address {address}")]
    MalformedAddress { address: String },

    /// A configuration value failed to parse.
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
