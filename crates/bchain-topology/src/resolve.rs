//! Topology resolution: ordered address list + local address → roles.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::identity::LocalIdentity;
use crate::position::Position;
use crate::MIN_CHAIN_LEN;

/// Number of replicas needed to tolerate `f` faults.
pub const fn chain_size_for(f: usize) -> usize {
    3 * f + 1
}

/// Recover `f` from a chain length, rejecting lengths not of the form 3f+1.
pub fn fault_parameter(n: usize) -> Result<usize> {
    if n < MIN_CHAIN_LEN || (n - 1) % 3 != 0 {
        return Err(ConfigError::InvalidChainSize { n });
    }
    Ok((n - 1) / 3)
}

/// Immutable role assignment for one replica.
///
/// Computed once at startup and shared by reference with every consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChainTopology {
    addrs: Vec<String>,
    index: usize,
    f: usize,
    position: Position,
}

impl ChainTopology {
    /// Resolve roles for the replica identified by `identity`.
    pub fn from_identity(addrs: Vec<String>, identity: &LocalIdentity) -> Result<Self> {
        validate(&addrs)?;
        let local = identity.select(&addrs)?.to_string();
        resolve(addrs, &local)
    }

    /// All replica addresses in chain order.
    pub fn addresses(&self) -> &[String] {
        &self.addrs
    }

    /// Chain length `n`.
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Always false: a resolved chain has at least four replicas.
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Fault parameter `f` where `n = 3f + 1`.
    pub fn faults(&self) -> usize {
        self.f
    }

    /// This replica's index in the chain.
    pub fn index(&self) -> usize {
        self.index
    }

    /// This replica's address.
    pub fn local(&self) -> &str {
        &self.addrs[self.index]
    }

    pub fn head(&self) -> &str {
        &self.addrs[0]
    }

    pub fn tail(&self) -> &str {
        &self.addrs[self.addrs.len() - 1]
    }

    /// Index of the proxy-tail, `2f + 1`.
    pub fn proxy_tail_index(&self) -> usize {
        2 * self.f + 1
    }

    /// Replica at position `2f + 1`. Reserved for ack-quorum logic.
    pub fn proxy_tail(&self) -> &str {
        &self.addrs[self.proxy_tail_index()]
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn successor(&self) -> Option<&str> {
        self.position.successor()
    }

    pub fn predecessor(&self) -> Option<&str> {
        self.position.predecessor()
    }

    pub fn is_head(&self) -> bool {
        self.position.is_head()
    }

    pub fn is_tail(&self) -> bool {
        self.position.is_tail()
    }

    pub fn is_proxy_tail(&self) -> bool {
        self.index == self.proxy_tail_index()
    }
}

/// Resolve the role assignment for `local` within `addrs`.
///
/// Fails if the chain is not 3f+1 long, contains duplicates, or does not
/// contain `local`.
pub fn resolve(addrs: Vec<String>, local: &str) -> Result<ChainTopology> {
    let f = validate(&addrs)?;
    let index = addrs
        .iter()
        .position(|a| a == local)
        .ok_or_else(|| ConfigError::LocalAddressNotFound {
            local: local.to_string(),
        })?;

    debug!(n = addrs.len(), f, index, local, "resolved chain position");

    let position = Position::at(&addrs, index);
    Ok(ChainTopology {
        addrs,
        index,
        f,
        position,
    })
}

fn validate(addrs: &[String]) -> Result<usize> {
    if addrs.is_empty() {
        return Err(ConfigError::NoAddresses);
    }
    let f = fault_parameter(addrs.len())?;

    let mut seen = HashSet::with_capacity(addrs.len());
    for addr in addrs {
        if !seen.insert(addr.as_str()) {
            return Err(ConfigError::DuplicateAddress {
                address: addr.clone(),
            });
        }
    }
    Ok(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chain(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn four_node_example() {
        let addrs = chain(&["A", "B", "C", "D"]);
        let topo = resolve(addrs, "B").unwrap();

        assert_eq!(topo.head(), "A");
        assert_eq!(topo.tail(), "D");
        assert_eq!(topo.proxy_tail(), "D");
        assert_eq!(topo.successor(), Some("C"));
        assert_eq!(topo.predecessor(), Some("A"));
        assert_eq!(topo.faults(), 1);
    }

    #[test]
    fn seven_node_proxy_tail_is_not_tail() {
        let addrs = chain(&["a", "b", "c", "d", "e", "f", "g"]);
        let topo = resolve(addrs, "f").unwrap();

        assert_eq!(topo.faults(), 2);
        assert_eq!(topo.proxy_tail_index(), 5);
        assert!(topo.is_proxy_tail());
        assert!(!topo.is_tail());
        assert_eq!(topo.tail(), "g");
    }

    #[test]
    fn rejects_bad_sizes() {
        for n in [0usize, 1, 2, 3, 5, 6, 8, 9, 11] {
            let addrs: Vec<String> = (0..n).map(|i| format!("n{}", i)).collect();
            let local = addrs.first().cloned().unwrap_or_default();
            let err = resolve(addrs, &local).unwrap_err();
            assert!(
                matches!(
                    err,
                    ConfigError::InvalidChainSize { .. } | ConfigError::NoAddresses
                ),
                "n={} gave {:?}",
                n,
                err
            );
        }
    }

    #[test]
    fn rejects_missing_local() {
        let err = resolve(chain(&["A", "B", "C", "D"]), "E").unwrap_err();
        assert_eq!(
            err,
            ConfigError::LocalAddressNotFound {
                local: "E".to_string()
            }
        );
    }

    #[test]
    fn rejects_duplicates() {
        let err = resolve(chain(&["A", "B", "B", "D"]), "A").unwrap_err();
        assert_eq!(
            err,
            ConfigError::DuplicateAddress {
                address: "B".to_string()
            }
        );
    }

    #[test]
    fn from_identity_by_index() {
        let topo =
            ChainTopology::from_identity(chain(&["A", "B", "C", "D"]), &LocalIdentity::Index(2))
                .unwrap();
        assert_eq!(topo.local(), "C");
        assert_eq!(topo.successor(), Some("D"));
    }

    #[test]
    fn from_identity_checks_size_first() {
        let err = ChainTopology::from_identity(chain(&["A", "B", "C"]), &LocalIdentity::Index(7))
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidChainSize { n: 3 });
    }

    proptest! {
        #[test]
        fn roles_follow_position(
            (f, addrs) in (1usize..8).prop_flat_map(|f| {
                let names: Vec<String> = (0..chain_size_for(f)).map(|i| format!("10.0.0.{}:7000", i)).collect();
                (Just(f), Just(names).prop_shuffle())
            })
        ) {
            let n = chain_size_for(f);

            let mut heads = 0;
            let mut tails = 0;
            let mut proxies = 0;
            for i in 0..n {
                let topo = resolve(addrs.clone(), &addrs[i]).unwrap();
                prop_assert_eq!(topo.index(), i);
                prop_assert_eq!(topo.head(), addrs[0].as_str());
                prop_assert_eq!(topo.tail(), addrs[n - 1].as_str());
                prop_assert_eq!(topo.proxy_tail(), addrs[2 * f + 1].as_str());

                if i < n - 1 {
                    prop_assert_eq!(topo.successor(), Some(addrs[i + 1].as_str()));
                } else {
                    prop_assert_eq!(topo.successor(), None);
                }
                if i > 0 {
                    prop_assert_eq!(topo.predecessor(), Some(addrs[i - 1].as_str()));
                } else {
                    prop_assert_eq!(topo.predecessor(), None);
                }

                heads += topo.is_head() as usize;
                tails += topo.is_tail() as usize;
                proxies += topo.is_proxy_tail() as usize;
            }
            prop_assert_eq!(heads, 1);
            prop_assert_eq!(tails, 1);
            prop_assert_eq!(proxies, 1);
        }

        #[test]
        fn non_3f1_sizes_rejected(n in 2usize..64) {
            prop_assume!((n - 1) % 3 != 0);
            let addrs: Vec<String> = (0..n).map(|i| format!("h{}", i)).collect();
            let res = resolve(addrs, "h0");
            prop_assert_eq!(res, Err(ConfigError::InvalidChainSize { n }));
        }
    }
}
