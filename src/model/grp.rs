//! Rank model
//!
//! A stacked GRU reads the per-round score snapshots of a game and a small
//! MLP turns the final hidden state of every layer into 24 logits, one per
//! finishing order in [`PermutationTable`].
//!
//! Sequences of different lengths are batched by [`PackedSequences`]: sorted
//! by descending length, zero padded, and tagged with the indices that bring
//! results back to the caller's order. Each layer's state is read at the last
//! valid step of each sequence, so padding never leaks into the result.

use std::path::Path;

use burn::module::{Ignored, Module};
use burn::nn::gru::{Gru, GruConfig};
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation::{relu, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};

use super::checkpoint::{load_module, save_module};
use super::perms::{PermutationTable, RankAssignment};
use crate::consts::{GRP_SIZE, NUM_PERMUTATIONS, NUM_PLAYERS};
use crate::{BrainError, GrpSection, Result};

/// Configuration for the rank model
#[derive(Debug, Clone)]
pub struct GrpConfig {
    pub hidden_size: usize,
    pub num_layers: usize,
}

impl Default for GrpConfig {
    fn default() -> Self {
        GrpConfig {
            hidden_size: 64,
            num_layers: 2,
        }
    }
}

impl GrpConfig {
    pub fn from_config(section: &GrpSection) -> Self {
        GrpConfig {
            hidden_size: section.hidden_size,
            num_layers: section.num_layers,
        }
    }
}

fn index_tensor<B: Backend>(indices: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let values: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
    Tensor::from_data(TensorData::new(values, [indices.len()]), device)
}

/// Length-sorted, zero-padded batch of round sequences
#[derive(Debug, Clone)]
pub struct PackedSequences<B: Backend> {
    /// [batch, max_len, GRP_SIZE], longest sequence first
    data: Tensor<B, 3>,
    /// True lengths in sorted order
    lengths: Vec<usize>,
    /// `sorted_indices[k]` is the caller position of sorted row `k`
    sorted_indices: Vec<usize>,
    /// `unsorted_indices[i]` is the sorted row of caller position `i`
    unsorted_indices: Vec<usize>,
}

impl<B: Backend> PackedSequences<B> {
    /// Pack sequences of shape [len, GRP_SIZE] given in any order
    pub fn pack(sequences: Vec<Tensor<B, 2>>) -> Result<Self> {
        let first = sequences
            .first()
            .ok_or_else(|| BrainError::InvalidInput("empty sequence batch".to_string()))?;
        let device = first.device();

        let mut lengths = Vec::with_capacity(sequences.len());
        for (i, seq) in sequences.iter().enumerate() {
            let [len, width] = seq.dims();
            if width != GRP_SIZE {
                return Err(BrainError::shape("rank model sequence", [len, GRP_SIZE], [len, width]));
            }
            if len == 0 {
                return Err(BrainError::InvalidInput(format!("sequence {} is empty", i)));
            }
            lengths.push(len);
        }
        let max_len = lengths.iter().copied().max().unwrap_or(0);

        let padded: Vec<Tensor<B, 2>> = sequences
            .into_iter()
            .zip(&lengths)
            .map(|(seq, &len)| {
                if len < max_len {
                    Tensor::cat(vec![seq, Tensor::zeros([max_len - len, GRP_SIZE], &device)], 0)
                } else {
                    seq
                }
            })
            .collect();

        Ok(Self::sorted(Tensor::stack(padded, 0), lengths))
    }

    /// Pack an already padded batch [batch, steps, GRP_SIZE] with its true lengths
    pub fn from_padded(data: Tensor<B, 3>, lengths: Vec<usize>) -> Result<Self> {
        let [batch, steps, width] = data.dims();
        if batch == 0 {
            return Err(BrainError::InvalidInput("empty sequence batch".to_string()));
        }
        if width != GRP_SIZE {
            return Err(BrainError::shape("padded sequences", [batch, steps, GRP_SIZE], [batch, steps, width]));
        }
        if lengths.len() != batch {
            return Err(BrainError::shape("sequence lengths", batch, lengths.len()));
        }
        if let Some(i) = lengths.iter().position(|&len| len == 0 || len > steps) {
            return Err(BrainError::InvalidInput(format!(
                "sequence {} has length {} outside 1..={}",
                i, lengths[i], steps
            )));
        }
        Ok(Self::sorted(data, lengths))
    }

    fn sorted(data: Tensor<B, 3>, lengths: Vec<usize>) -> Self {
        let device = data.device();

        // stable, so equal lengths keep caller order
        let mut sorted_indices: Vec<usize> = (0..lengths.len()).collect();
        sorted_indices.sort_by(|&a, &b| lengths[b].cmp(&lengths[a]));

        let mut unsorted_indices = vec![0; lengths.len()];
        for (sorted_pos, &caller) in sorted_indices.iter().enumerate() {
            unsorted_indices[caller] = sorted_pos;
        }

        let data = data.select(0, index_tensor::<B>(&sorted_indices, &device));
        let lengths = sorted_indices.iter().map(|&i| lengths[i]).collect();

        PackedSequences {
            data,
            lengths,
            sorted_indices,
            unsorted_indices,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.lengths.len()
    }

    pub fn max_len(&self) -> usize {
        self.data.dims()[1]
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn sorted_indices(&self) -> &[usize] {
        &self.sorted_indices
    }

    pub fn unsorted_indices(&self) -> &[usize] {
        &self.unsorted_indices
    }
}

/// Recurrent rank model
#[derive(Module, Debug)]
pub struct Grp<B: Backend> {
    layers: Vec<Gru<B>>,
    fc1: Linear<B>,
    fc2: Linear<B>,
    perms: Ignored<PermutationTable>,
    hidden_size: usize,
}

impl<B: Backend> Grp<B> {
    pub fn new(device: &B::Device, config: &GrpConfig) -> Self {
        let layers = (0..config.num_layers)
            .map(|layer| {
                let d_input = if layer == 0 { GRP_SIZE } else { config.hidden_size };
                GruConfig::new(d_input, config.hidden_size, true).init(device)
            })
            .collect();
        let state_width = config.hidden_size * config.num_layers;

        log::debug!(
            "Rank model: {} GRU layers x {} hidden, head {} -> {}",
            config.num_layers,
            config.hidden_size,
            state_width,
            NUM_PERMUTATIONS
        );

        Grp {
            layers,
            fc1: LinearConfig::new(state_width, state_width).init(device),
            fc2: LinearConfig::new(state_width, NUM_PERMUTATIONS).init(device),
            perms: Ignored(PermutationTable::new()),
            hidden_size: config.hidden_size,
        }
    }

    pub fn perms(&self) -> &PermutationTable {
        &self.perms
    }

    /// Logits [batch, 24] for sequences of shape [len, GRP_SIZE], in caller order
    pub fn forward(&self, sequences: Vec<Tensor<B, 2>>) -> Result<Tensor<B, 2>> {
        let packed = PackedSequences::pack(sequences)?;
        self.forward_packed(&packed)
    }

    /// Logits [batch, 24] for a packed batch, in the order it was packed from
    pub fn forward_packed(&self, packed: &PackedSequences<B>) -> Result<Tensor<B, 2>> {
        let [batch, steps, width] = packed.data.dims();
        if width != GRP_SIZE {
            return Err(BrainError::shape("packed sequences", GRP_SIZE, width));
        }
        let device = packed.data.device();

        let last_steps: Vec<usize> = packed
            .lengths
            .iter()
            .enumerate()
            .map(|(row, &len)| row * steps + len - 1)
            .collect();
        let last_steps = index_tensor::<B>(&last_steps, &device);

        let mut x = packed.data.clone();
        let mut states = Vec::with_capacity(self.layers.len());
        for gru in &self.layers {
            x = gru.forward(x, None);
            let flat = x.clone().reshape([batch * steps, self.hidden_size]);
            states.push(flat.select(0, last_steps.clone()));
        }

        let state = Tensor::cat(states, 1)
            .select(0, index_tensor::<B>(&packed.unsorted_indices, &device));

        let x = relu(self.fc1.forward(state));
        Ok(self.fc2.forward(x))
    }

    /// Player-by-rank probabilities [batch, 4, 4] from logits [batch, 24]
    ///
    /// Entry `[n, p, r]` sums the probabilities of every finishing order
    /// that puts player `p` at rank `r`.
    pub fn calc_matrix(&self, logits: Tensor<B, 2>) -> Result<Tensor<B, 3>> {
        let [batch, width] = logits.dims();
        if width != NUM_PERMUTATIONS {
            return Err(BrainError::shape("rank logits", [batch, NUM_PERMUTATIONS], [batch, width]));
        }
        let assignment = self.perms.assignment_matrix::<B>(&logits.device());
        let probs = softmax(logits, 1);
        Ok(probs.matmul(assignment).reshape([batch, NUM_PLAYERS, NUM_PLAYERS]))
    }

    /// Classification target of one final ranking
    pub fn get_label(&self, rank_by_player: &RankAssignment) -> Result<usize> {
        self.perms.label_for(rank_by_player)
    }

    /// Classification targets [batch] for a batch of final rankings
    pub fn labels(&self, rank_by_player: &[RankAssignment], device: &B::Device) -> Result<Tensor<B, 1, Int>> {
        let labels = self.perms.labels(rank_by_player)?;
        Ok(index_tensor::<B>(&labels, device))
    }

    /// One [len, GRP_SIZE] tensor per game from host rows
    pub fn sequences_from_rows(rows: &[Vec<[f32; GRP_SIZE]>], device: &B::Device) -> Result<Vec<Tensor<B, 2>>> {
        rows.iter()
            .enumerate()
            .map(|(i, game)| {
                if game.is_empty() {
                    return Err(BrainError::InvalidInput(format!("sequence {} is empty", i)));
                }
                let values: Vec<f32> = game.iter().flatten().copied().collect();
                Ok(Tensor::from_data(TensorData::new(values, [game.len(), GRP_SIZE]), device))
            })
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_module(self, path)
    }

    pub fn load(self, path: &Path, device: &B::Device) -> Result<Self> {
        load_module(self, path, device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f64>;

    fn sequence(len: usize, device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 2> {
        Tensor::random([len, GRP_SIZE], Distribution::Normal(0.0, 1.0), device)
    }

    fn values<const D: usize>(t: Tensor<TestBackend, D>) -> Vec<f64> {
        t.into_data().to_vec::<f64>().unwrap()
    }

    fn assert_close(a: &[f64], b: &[f64], tol: f64) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < tol, "{} vs {}", x, y);
        }
    }

    #[test]
    fn test_mixed_lengths_give_logits_and_matrix() {
        let device = Default::default();
        let grp = Grp::<TestBackend>::new(&device, &GrpConfig::default());

        let logits = grp.forward(vec![sequence(3, &device), sequence(5, &device)]).unwrap();
        assert_eq!(logits.dims(), [2, 24]);

        let matrix = grp.calc_matrix(logits).unwrap();
        assert_eq!(matrix.dims(), [2, 4, 4]);

        for sum in values(matrix.clone().sum_dim(2)) {
            assert!((sum - 1.0).abs() < 1e-6, "player row sums to {}", sum);
        }
        for sum in values(matrix.sum_dim(1)) {
            assert!((sum - 1.0).abs() < 1e-6, "rank column sums to {}", sum);
        }
    }

    #[test]
    fn test_matrix_of_arbitrary_logits_is_doubly_stochastic() {
        let device = Default::default();
        let grp = Grp::<TestBackend>::new(&device, &GrpConfig::default());

        let logits = Tensor::random([5, 24], Distribution::Normal(0.0, 5.0), &device);
        let matrix = grp.calc_matrix(logits).unwrap();

        let rows = values(matrix.clone().sum_dim(2));
        let cols = values(matrix.sum_dim(1));
        assert_close(&rows, &[1.0; 20], 1e-6);
        assert_close(&cols, &[1.0; 20], 1e-6);
    }

    #[test]
    fn test_confident_identity_logits() {
        let device = Default::default();
        let grp = Grp::<TestBackend>::new(&device, &GrpConfig::default());

        let mut raw = vec![0.0; 24];
        raw[0] = 50.0;
        let logits = Tensor::<TestBackend, 2>::from_data(TensorData::new(raw, [1, 24]), &device);
        let matrix = values(grp.calc_matrix(logits).unwrap());

        for p in 0..4 {
            for r in 0..4 {
                let expected = if p == r { 1.0 } else { 0.0 };
                assert!((matrix[p * 4 + r] - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_batch_order_does_not_change_results() {
        let device = Default::default();
        let grp = Grp::<TestBackend>::new(&device, &GrpConfig::default());

        let a = sequence(2, &device);
        let b = sequence(6, &device);
        let c = sequence(4, &device);

        let forward = values(grp.forward(vec![a.clone(), b.clone(), c.clone()]).unwrap());
        let shuffled = values(grp.forward(vec![c, a, b]).unwrap());

        assert_close(&forward[0..24], &shuffled[24..48], 1e-9);
        assert_close(&forward[24..48], &shuffled[48..72], 1e-9);
        assert_close(&forward[48..72], &shuffled[0..24], 1e-9);
    }

    #[test]
    fn test_padding_does_not_leak() {
        let device = Default::default();
        let grp = Grp::<TestBackend>::new(&device, &GrpConfig::default());

        let short = sequence(2, &device);
        let alone = values(grp.forward(vec![short.clone()]).unwrap());
        let batched = values(grp.forward(vec![short, sequence(9, &device)]).unwrap());

        assert_close(&alone, &batched[0..24], 1e-9);
    }

    #[test]
    fn test_pre_padded_entry_point_matches() {
        let device = Default::default();
        let grp = Grp::<TestBackend>::new(&device, &GrpConfig { hidden_size: 16, num_layers: 3 });

        let a = sequence(3, &device);
        let b = sequence(5, &device);
        let padded = Tensor::stack(
            vec![
                Tensor::cat(vec![a.clone(), Tensor::zeros([2, GRP_SIZE], &device)], 0),
                b.clone(),
            ],
            0,
        );

        let packed = PackedSequences::from_padded(padded, vec![3, 5]).unwrap();
        assert_eq!(packed.lengths(), &[5, 3]);
        assert_eq!(packed.sorted_indices(), &[1, 0]);
        assert_eq!(packed.unsorted_indices(), &[1, 0]);

        let from_padded = values(grp.forward_packed(&packed).unwrap());
        let from_list = values(grp.forward(vec![a, b]).unwrap());
        assert_close(&from_padded, &from_list, 1e-9);
    }

    #[test]
    fn test_invalid_batches() {
        let device = Default::default();
        let grp = Grp::<TestBackend>::new(&device, &GrpConfig::default());

        assert!(matches!(grp.forward(vec![]), Err(BrainError::InvalidInput(_))));

        let wide = Tensor::random([3, 8], Distribution::Default, &device);
        assert!(matches!(grp.forward(vec![wide]), Err(BrainError::ShapeMismatch { .. })));

        let padded = Tensor::<TestBackend, 3>::zeros([2, 4, GRP_SIZE], &device);
        assert!(PackedSequences::from_padded(padded.clone(), vec![4, 0]).is_err());
        assert!(PackedSequences::from_padded(padded, vec![4]).is_err());

        let logits = Tensor::zeros([1, 23], &device);
        assert!(grp.calc_matrix(logits).is_err());
    }

    #[test]
    fn test_labels() {
        let device = Default::default();
        let grp = Grp::<TestBackend>::new(&device, &GrpConfig::default());

        assert_eq!(grp.get_label(&[0, 1, 2, 3]).unwrap(), 0);
        let labels = grp.labels(&[[3, 2, 1, 0], [1, 0, 2, 3]], &device).unwrap();
        let labels: Vec<i64> = labels.into_data().iter::<i64>().collect();
        assert_eq!(labels, vec![23, 6]);

        assert!(matches!(
            grp.get_label(&[2, 2, 1, 0]),
            Err(BrainError::InvalidRankAssignment(_))
        ));
    }

    #[test]
    fn test_sequences_from_rows() {
        let device = Default::default();
        let rows = vec![
            vec![[0.0, 0.0, 0.0, 2.5, 2.5, 2.5, 2.5]],
            vec![[0.0, 0.0, 0.0, 2.5, 2.5, 2.5, 2.5], [1.0, 0.0, 1.0, 3.3, 2.2, 2.5, 1.9]],
        ];
        let seqs = Grp::<TestBackend>::sequences_from_rows(&rows, &device).unwrap();
        assert_eq!(seqs[0].dims(), [1, GRP_SIZE]);
        assert_eq!(seqs[1].dims(), [2, GRP_SIZE]);

        let second = values(seqs[1].clone());
        assert!((second[7] - 1.0).abs() < 1e-9);

        assert!(Grp::<TestBackend>::sequences_from_rows(&[vec![]], &device).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grp");

        let config = GrpConfig { hidden_size: 8, num_layers: 2 };
        let grp = Grp::<TestBackend>::new(&device, &config);
        grp.save(&path).unwrap();

        let loaded = Grp::<TestBackend>::new(&device, &config).load(&path, &device).unwrap();
        let seq = sequence(4, &device);
        let before = values(grp.forward(vec![seq.clone()]).unwrap());
        let after = values(loaded.forward(vec![seq]).unwrap());
        assert_close(&before, &after, 1e-12);
    }
}
