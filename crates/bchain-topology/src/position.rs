//! Chain adjacency.
//!
//! A node sits in exactly one of three places. Encoding the place as an enum
//! keeps the neighbor fields honest: a tail cannot carry a successor and a
//! head cannot carry a predecessor.

/// Where a node sits in the chain, together with its immediate neighbors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Position {
    /// First replica. Accepts new operations.
    Head { successor: String },
    /// Interior replica. Forwards operations and relays acks.
    Middle { predecessor: String, successor: String },
    /// Last replica. Completes operations and originates acks.
    Tail { predecessor: String },
}

impl Position {
    /// Build the position for index `i` of `addrs`.
    ///
    /// Callers guarantee `addrs.len() >= 2` and `i < addrs.len()`.
    pub(crate) fn at(addrs: &[String], i: usize) -> Self {
        let last = addrs.len() - 1;
        if i == 0 {
            Position::Head {
                successor: addrs[1].clone(),
            }
        } else if i == last {
            Position::Tail {
                predecessor: addrs[last - 1].clone(),
            }
        } else {
            Position::Middle {
                predecessor: addrs[i - 1].clone(),
                successor: addrs[i + 1].clone(),
            }
        }
    }

    /// The next replica toward the tail, if any.
    pub fn successor(&self) -> Option<&str> {
        match self {
            Position::Head { successor } | Position::Middle { successor, .. } => Some(successor),
            Position::Tail { .. } => None,
        }
    }

    /// The previous replica toward the head, if any.
    pub fn predecessor(&self) -> Option<&str> {
        match self {
            Position::Middle { predecessor, .. } | Position::Tail { predecessor } => {
                Some(predecessor)
            }
            Position::Head { .. } => None,
        }
    }

    pub fn is_head(&self) -> bool {
        matches!(self, Position::Head { .. })
    }

    pub fn is_tail(&self) -> bool {
        matches!(self, Position::Tail { .. })
    }
}
