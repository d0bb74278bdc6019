//! Deterministic ordering and seeded tie-breaking.
//!
//! Every decision that could otherwise depend on container traversal
//! order goes through this module:
//!
//! - [`order`] sorts entities by id with a byte-wise comparator
//!   (locale independent).
//! - [`TieBreaker`] produces a seeded permutation of candidate ids. The
//!   permutation is keyed by SHA-256 over the seed and the *sorted* id
//!   sequence, and the digest seeds a ChaCha8 stream, so it is identical
//!   on every platform and independent of the order candidates are
//!   passed in.

use std::cmp::Ordering;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

/// An entity with a stable string id.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Byte-wise lexicographic id comparison.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    a.as_bytes().cmp(b.as_bytes())
}

/// Returns references to `entities` sorted by id.
pub fn order<T: Keyed>(entities: &[T]) -> Vec<&T> {
    let mut sorted: Vec<&T> = entities.iter().collect();
    sorted.sort_by(|a, b| compare_ids(a.key(), b.key()));
    sorted
}

/// Seeded tie-break over candidate ids.
///
/// # Examples
///
/// ```
/// use u_assign::determinism::TieBreaker;
///
/// let tb = TieBreaker::new(42);
/// let a = tb.permutation(&["R03", "R01", "R02"]);
/// let b = tb.permutation(&["R03", "R01", "R02"]);
/// assert_eq!(a, b);
///
/// let mut sorted = a.clone();
/// sorted.sort();
/// assert_eq!(sorted, vec![0, 1, 2]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TieBreaker {
    seed: u64,
}

impl TieBreaker {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns indices into `candidates` in tie-break priority order.
    pub fn permutation<S: AsRef<str>>(&self, candidates: &[S]) -> Vec<usize> {
        let id = |i: usize| candidates[i].as_ref();

        let mut sorted: Vec<usize> = (0..candidates.len()).collect();
        sorted.sort_by(|&a, &b| compare_ids(id(a), id(b)).then(a.cmp(&b)));

        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        for &i in &sorted {
            hasher.update(id(i).as_bytes());
            hasher.update([0u8]);
        }
        let key: [u8; 32] = hasher.finalize().into();
        let mut rng = ChaCha8Rng::from_seed(key);

        // Ranks are drawn in sorted-id order so the caller's order is irrelevant.
        let mut ranked: Vec<(u64, usize)> = sorted.iter().map(|&i| (rng.next_u64(), i)).collect();
        ranked.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| compare_ids(id(a.1), id(b.1)))
                .then(a.1.cmp(&b.1))
        });
        ranked.into_iter().map(|(_, i)| i).collect()
    }

    /// Selects one candidate; `None` when there are no candidates.
    pub fn select<S: AsRef<str>>(&self, candidates: &[S]) -> Option<usize> {
        self.permutation(candidates).first().copied()
    }
}

/// Selects one of `candidates` deterministically for `seed`.
pub fn tie_break<S: AsRef<str>>(seed: u64, candidates: &[S]) -> Option<usize> {
    TieBreaker::new(seed).select(candidates)
}
