//! Deterministic arbiter ranking.
//!
//! Every node ranks candidates the same way: higher priority first, then the
//! lower identity hash. Candidates that hear a better-ranked peer yield, so
//! concurrent elections converge without a consensus round.

use std::cmp::Reverse;

use sha2::{Digest, Sha256};

use crate::types::{PeerIdentity, Priority};

/// Sort key: smaller ranks higher.
pub type ElectionRank = (Reverse<Priority>, u64, PeerIdentity);

/// First 8 bytes of SHA-256(identity), big-endian.
pub fn identity_hash(identity: &PeerIdentity) -> u64 {
    let digest = Sha256::digest(identity.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Ranking key. The identity itself breaks the (astronomically unlikely) hash tie.
pub fn rank(priority: Priority, identity: &PeerIdentity) -> ElectionRank {
    (Reverse(priority), identity_hash(identity), *identity)
}

/// Whether candidate `a` beats candidate `b`.
pub fn outranks(a: (Priority, &PeerIdentity), b: (Priority, &PeerIdentity)) -> bool {
    rank(a.0, a.1) < rank(b.0, b.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> PeerIdentity {
        PeerIdentity::from_bytes([b; 32])
    }

    #[test]
    fn hash_is_stable() {
        let expected = {
            let d = Sha256::digest([5u8; 32]);
            u64::from_be_bytes(d[..8].try_into().unwrap())
        };
        assert_eq!(identity_hash(&id(5)), expected);
    }

    #[test]
    fn priority_beats_hash() {
        let (a, b) = (id(1), id(2));
        assert!(outranks((Priority::High, &a), (Priority::Normal, &b)));
        assert!(outranks((Priority::High, &b), (Priority::Normal, &a)));
    }

    #[test]
    fn equal_priority_lower_hash_wins() {
        let (a, b) = (id(1), id(2));
        let a_first = identity_hash(&a) < identity_hash(&b);
        assert_eq!(outranks((Priority::Normal, &a), (Priority::Normal, &b)), a_first);
        assert_eq!(outranks((Priority::Normal, &b), (Priority::Normal, &a)), !a_first);
    }

    #[test]
    fn never_outranks_itself() {
        let a = id(3);
        assert!(!outranks((Priority::Normal, &a), (Priority::Normal, &a)));
    }
}
