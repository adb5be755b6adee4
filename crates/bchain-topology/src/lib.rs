//! bchain Topology
//!
//! Role assignment for a statically ordered replica chain.
//!
//! # Chain Sizing
//!
//! The chain always has `n = 3f + 1` replicas for some fault parameter
//! `f >= 1`. Roles are derived purely from list position:
//!
//! ```text
//! index:   0      1     ...    2f+1        ...    n-1
//!          head ─────────────▶ proxy-tail ──────▶ tail
//!
//!          ChainMessage flows head → tail
//!          AckMessage   flows tail → head
//! ```
//!
//! Every node knows its predecessor (absent at the head) and its successor
//! (absent at the tail). The proxy-tail is exposed for consumers but carries
//! no behavior of its own.
//!
//! Resolution is pure: no network activity happens until a [`ChainTopology`]
//! has been produced, and any [`ConfigError`] is fatal to startup.

mod error;
mod identity;
mod position;
mod resolve;

pub use error::{ConfigError, Result};
pub use identity::{host_of, LocalIdentity};
pub use position::Position;
pub use resolve::{chain_size_for, fault_parameter, resolve, ChainTopology};

/// Smallest fault parameter a chain may be built for.
pub const MIN_FAULTS: usize = 1;

/// Smallest valid chain: `3 * MIN_FAULTS + 1`.
pub const MIN_CHAIN_LEN: usize = 3 * MIN_FAULTS + 1;

const _: () = assert!(MIN_CHAIN_LEN == 4);
