//! Canonical table of rank assignments
//!
//! The 24 orderings of four players in lexicographic order. Entry `i` maps
//! player index to finishing rank (0 is first place). Index 0 is the identity
//! and index 23 is `[3, 2, 1, 0]`. Rank-model weights index their logits by
//! this order, so it must never change.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use crate::consts::{NUM_PERMUTATIONS, NUM_PLAYERS};
use crate::{BrainError, Result};

pub type RankAssignment = [usize; NUM_PLAYERS];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermutationTable {
    perms: [RankAssignment; NUM_PERMUTATIONS],
}

impl Default for PermutationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PermutationTable {
    pub fn new() -> Self {
        let mut perms = [[0; NUM_PLAYERS]; NUM_PERMUTATIONS];
        let mut idx = 0;
        for a in 0..NUM_PLAYERS {
            for b in 0..NUM_PLAYERS {
                for c in 0..NUM_PLAYERS {
                    for d in 0..NUM_PLAYERS {
                        if a != b && a != c && a != d && b != c && b != d && c != d {
                            perms[idx] = [a, b, c, d];
                            idx += 1;
                        }
                    }
                }
            }
        }
        PermutationTable { perms }
    }

    pub fn len(&self) -> usize {
        self.perms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.perms.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RankAssignment> {
        self.perms.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RankAssignment> {
        self.perms.iter()
    }

    /// Index of `ranks` in the table, the classification target
    pub fn label_for(&self, ranks: &RankAssignment) -> Result<usize> {
        self.perms
            .iter()
            .position(|p| p == ranks)
            .ok_or_else(|| BrainError::InvalidRankAssignment(ranks.to_vec()))
    }

    /// Labels for a batch of assignments, failing on the first invalid one
    pub fn labels(&self, batch: &[RankAssignment]) -> Result<Vec<usize>> {
        batch.iter().map(|ranks| self.label_for(ranks)).collect()
    }

    /// Indicator matrix `[24, players * ranks]`
    ///
    /// Entry `[i, p * 4 + r]` is 1 when permutation `i` puts player `p` at
    /// rank `r`. Multiplying permutation probabilities by it yields the
    /// flattened player-by-rank probability matrix.
    pub fn assignment_matrix<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let width = NUM_PLAYERS * NUM_PLAYERS;
        let mut values = vec![0.0f32; NUM_PERMUTATIONS * width];
        for (i, perm) in self.perms.iter().enumerate() {
            for (player, &rank) in perm.iter().enumerate() {
                values[i * width + player * NUM_PLAYERS + rank] = 1.0;
            }
        }
        Tensor::from_data(TensorData::new(values, [NUM_PERMUTATIONS, width]), device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_lexicographic_order() {
        let table = PermutationTable::new();
        assert_eq!(table.len(), 24);
        assert_eq!(table.get(0), Some(&[0, 1, 2, 3]));
        assert_eq!(table.get(1), Some(&[0, 1, 3, 2]));
        assert_eq!(table.get(6), Some(&[1, 0, 2, 3]));
        assert_eq!(table.get(23), Some(&[3, 2, 1, 0]));
        assert!(table.get(24).is_none());

        let perms: Vec<_> = table.iter().collect();
        assert!(perms.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_label_round_trip() {
        let table = PermutationTable::new();
        for (i, perm) in table.iter().enumerate() {
            assert_eq!(table.label_for(perm).unwrap(), i);
        }
        assert_eq!(table.label_for(&[0, 1, 2, 3]).unwrap(), 0);
    }

    #[test]
    fn test_invalid_assignments() {
        let table = PermutationTable::new();

        let err = table.label_for(&[0, 0, 1, 2]).unwrap_err();
        assert!(matches!(err, BrainError::InvalidRankAssignment(ref r) if r == &vec![0, 0, 1, 2]));
        assert!(table.label_for(&[0, 1, 2, 4]).is_err());
    }

    #[test]
    fn test_batched_labels() {
        let table = PermutationTable::new();
        let labels = table.labels(&[[3, 2, 1, 0], [0, 1, 2, 3], [1, 0, 2, 3]]).unwrap();
        assert_eq!(labels, vec![23, 0, 6]);

        assert!(table.labels(&[[0, 1, 2, 3], [1, 1, 1, 1]]).is_err());
        assert!(table.labels(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_assignment_matrix_counts() {
        let device = Default::default();
        let matrix = PermutationTable::new().assignment_matrix::<NdArray<f32>>(&device);
        assert_eq!(matrix.dims(), [24, 16]);

        // each permutation assigns four players, each (player, rank) pair occurs 6 times
        let per_perm = matrix.clone().sum_dim(1).into_data().to_vec::<f32>().unwrap();
        assert!(per_perm.iter().all(|&n| n == 4.0));
        let per_pair = matrix.sum_dim(0).into_data().to_vec::<f32>().unwrap();
        assert!(per_pair.iter().all(|&n| n == 6.0));
    }
}
