//! Algorithm descriptors and the per-process algorithm container.
//!
//! A descriptor is the wire record each side offers during the handshake.
//! Two descriptors describe the same algorithm when identifier, key size and
//! strength all match. Strength is only ever used to pick a winner.

use std::{cmp::Ordering, collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Offer record for one algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlgorithmDescriptor {
    /// Stable identifier, e.g. `RSA-2048` or `AES-256`
    pub identifier: String,
    /// Key size in bits
    pub key_size: u32,
    /// Comparison key for negotiation; higher wins
    pub strength: u32,
    /// Block size in bits (symmetric algorithms only)
    pub block_size: Option<u32>,
}

impl AlgorithmDescriptor {
    /// Whether `other` names the same algorithm (identifier, key size and
    /// strength).
    pub fn matches(&self, other: &Self) -> bool {
        self.identifier == other.identifier
            && self.key_size == other.key_size
            && self.strength == other.strength
    }

    /// Total order used to break ties deterministically.
    fn rank(&self, other: &Self) -> Ordering {
        self.strength
            .cmp(&other.strength)
            .then_with(|| self.key_size.cmp(&other.key_size))
            .then_with(|| self.identifier.cmp(&other.identifier))
    }
}

impl fmt::Display for AlgorithmDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bits, strength {})", self.identifier, self.key_size, self.strength)
    }
}

/// An algorithm that can be offered during negotiation.
pub trait Algorithm: Clone + fmt::Debug + Send + Sync + 'static {
    /// Offer record for this algorithm.
    fn descriptor(&self) -> AlgorithmDescriptor;
}

/// Strongest entry of `local` that `remote` also offers.
///
/// Both peers compute the same answer from the same two sets regardless of
/// the order either set was sent in: the intersection is symmetric and ties
/// on strength fall back to key size, then identifier.
pub fn select_strongest<'a>(
    local: &'a [AlgorithmDescriptor],
    remote: &[AlgorithmDescriptor],
) -> Option<&'a AlgorithmDescriptor> {
    local.iter().filter(|l| remote.iter().any(|r| r.matches(l))).max_by(|a, b| a.rank(b))
}

/// Algorithms a process supports, keyed by identifier.
///
/// Filled once at startup and read by every handshake afterwards. Adding an
/// algorithm whose identifier is already present replaces it.
#[derive(Debug, Clone)]
pub struct AlgorithmContainer<A> {
    algorithms: BTreeMap<String, A>,
}

impl<A> Default for AlgorithmContainer<A> {
    fn default() -> Self {
        Self { algorithms: BTreeMap::new() }
    }
}

impl<A: Algorithm> AlgorithmContainer<A> {
    /// Create an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `algorithm`, replacing any entry with the same identifier.
    pub fn add_algorithm(&mut self, algorithm: A) {
        let identifier = algorithm.descriptor().identifier;
        self.algorithms.insert(identifier, algorithm);
    }

    /// Remove the entry with `algorithm`'s identifier. Returns `false` if
    /// there was none.
    pub fn remove_algorithm(&mut self, algorithm: &A) -> bool {
        self.algorithms.remove(&algorithm.descriptor().identifier).is_some()
    }

    /// Descriptors of every registered algorithm, ordered by identifier.
    pub fn supported_algorithms(&self) -> Vec<AlgorithmDescriptor> {
        self.algorithms.values().map(Algorithm::descriptor).collect()
    }

    /// Registered algorithm with `identifier`.
    pub fn get(&self, identifier: &str) -> Option<&A> {
        self.algorithms.get(identifier)
    }

    /// Strongest local algorithm that also appears in `remote`.
    pub fn select_strongest(&self, remote: &[AlgorithmDescriptor]) -> Option<A> {
        let local = self.supported_algorithms();
        let chosen = select_strongest(&local, remote)?;
        self.algorithms.get(&chosen.identifier).cloned()
    }

    /// Number of registered algorithms.
    pub fn len(&self) -> usize {
        self.algorithms.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.algorithms.is_empty()
    }
}

impl<A: Algorithm> FromIterator<A> for AlgorithmContainer<A> {
    fn from_iter<T: IntoIterator<Item = A>>(iter: T) -> Self {
        let mut container = Self::new();
        for algorithm in iter {
            container.add_algorithm(algorithm);
        }
        container
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn desc(identifier: &str, key_size: u32, strength: u32) -> AlgorithmDescriptor {
        AlgorithmDescriptor { identifier: identifier.to_string(), key_size, strength, block_size: None }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Fake(AlgorithmDescriptor);

    impl Algorithm for Fake {
        fn descriptor(&self) -> AlgorithmDescriptor {
            self.0.clone()
        }
    }

    #[test]
    fn picks_strongest_common_entry() {
        let local = vec![desc("A", 128, 1), desc("B", 256, 5), desc("C", 512, 9)];
        let remote = vec![desc("A", 128, 1), desc("B", 256, 5)];

        assert_eq!(select_strongest(&local, &remote), Some(&desc("B", 256, 5)));
    }

    #[test]
    fn disjoint_offers_select_nothing() {
        let local = vec![desc("A", 128, 1)];
        let remote = vec![desc("B", 128, 1)];

        assert_eq!(select_strongest(&local, &remote), None);
    }

    #[test]
    fn partial_match_is_not_a_match() {
        let local = vec![desc("RSA", 1024, 1024)];
        let remote = vec![desc("RSA", 1024, 2048), desc("RSA", 2048, 1024)];

        assert_eq!(select_strongest(&local, &remote), None);
    }

    #[test]
    fn last_registration_wins() {
        let mut container = AlgorithmContainer::new();
        container.add_algorithm(Fake(desc("X", 128, 1)));
        container.add_algorithm(Fake(desc("X", 256, 2)));

        assert_eq!(container.len(), 1);
        assert_eq!(container.get("X"), Some(&Fake(desc("X", 256, 2))));
    }

    #[test]
    fn remove_is_noop_when_absent() {
        let mut container: AlgorithmContainer<Fake> =
            [Fake(desc("X", 128, 1))].into_iter().collect();

        assert!(!container.remove_algorithm(&Fake(desc("Y", 128, 1))));
        assert!(container.remove_algorithm(&Fake(desc("X", 999, 9))));
        assert!(container.is_empty());
    }

    #[test]
    fn container_selects_registered_algorithm() {
        let container: AlgorithmContainer<Fake> =
            [Fake(desc("A", 128, 1)), Fake(desc("B", 256, 2))].into_iter().collect();

        let chosen = container.select_strongest(&[desc("A", 128, 1), desc("B", 256, 2)]);
        assert_eq!(chosen, Some(Fake(desc("B", 256, 2))));
    }

    fn arbitrary_offers() -> impl Strategy<Value = Vec<AlgorithmDescriptor>> {
        prop::collection::vec(
            (prop::sample::select(vec!["A", "B", "C", "D"]), 0u32..4, 0u32..4)
                .prop_map(|(id, key, strength)| desc(id, key * 128, strength)),
            1..8,
        )
    }

    proptest! {
        #[test]
        fn both_sides_agree_regardless_of_order(
            local in arbitrary_offers(),
            remote in arbitrary_offers(),
            seed in any::<u64>(),
        ) {
            let mut shuffled_local = local.clone();
            let mut shuffled_remote = remote.clone();
            let len = shuffled_local.len();
            shuffled_local.rotate_left((seed as usize) % len);
            shuffled_remote.reverse();

            let ours = select_strongest(&local, &remote);
            let theirs = select_strongest(&shuffled_remote, &shuffled_local);

            // PROPERTY: Both ends pick the same algorithm (or both fail)
            prop_assert_eq!(ours.is_some(), theirs.is_some());
            if let (Some(ours), Some(theirs)) = (ours, theirs) {
                prop_assert!(ours.matches(theirs));
            }
        }
    }
}
