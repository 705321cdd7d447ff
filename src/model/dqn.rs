//! Dueling action-value head
//!
//! Q(s, a) = V(s) + A(s, a) - mean over legal a' of A(s, a')
//!
//! Illegal actions never contribute to the mean and always come out as
//! [`MASK_FILL`], so argmax and softmax consumers can't pick them.

use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation::mish;
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Tensor};

use super::brain::{DirectLatent, LatentStage, VariationalLatent};
use super::mask::{apply_masks, legal_counts, MASK_FILL};
use crate::consts::{ArchVersion, ACTION_SPACE};
use crate::{BrainError, Result};

/// Hidden width of the v2 streams
const STREAM_HIDDEN: usize = 512;

/// One output stream: a linear layer, or linear → Mish → linear
#[derive(Module, Debug)]
pub struct Stream<B: Backend> {
    hidden: Option<Linear<B>>,
    out: Linear<B>,
}

impl<B: Backend> Stream<B> {
    fn linear(device: &B::Device, d_in: usize, d_out: usize) -> Self {
        Stream {
            hidden: None,
            out: LinearConfig::new(d_in, d_out).init(device),
        }
    }

    fn mlp(device: &B::Device, d_in: usize, d_hidden: usize, d_out: usize) -> Self {
        Stream {
            hidden: Some(LinearConfig::new(d_in, d_hidden).init(device)),
            out: LinearConfig::new(d_hidden, d_out).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = match &self.hidden {
            Some(hidden) => mish(hidden.forward(x)),
            None => x,
        };
        self.out.forward(x)
    }
}

/// Value and advantage streams over the brain's features
#[derive(Module, Debug)]
pub struct DuelingHead<B: Backend> {
    v_head: Stream<B>,
    a_head: Stream<B>,
    input_dim: usize,
    action_space: usize,
}

impl<B: Backend> DuelingHead<B> {
    /// Head matching the given brain version
    ///
    /// v1 reads the 512-wide latent with single linear layers; v2 reads the
    /// 1024-wide encoder output through 512-wide Mish MLPs.
    pub fn new(device: &B::Device, version: ArchVersion) -> Self {
        Self::with_action_space(device, version, ACTION_SPACE)
    }

    pub fn with_action_space(device: &B::Device, version: ArchVersion, action_space: usize) -> Self {
        match version {
            ArchVersion::V1 => Self::for_stage::<VariationalLatent<B>>(device, action_space),
            ArchVersion::V2 => Self::for_stage::<DirectLatent>(device, action_space),
        }
    }

    /// Head reading the features produced by latent stage `S`
    pub fn for_stage<S: LatentStage<B>>(device: &B::Device, action_space: usize) -> Self {
        let input_dim = S::FEATURE_WIDTH;
        let (v_head, a_head) = match S::VERSION {
            ArchVersion::V1 => (
                Stream::linear(device, input_dim, 1),
                Stream::linear(device, input_dim, action_space),
            ),
            ArchVersion::V2 => (
                Stream::mlp(device, input_dim, STREAM_HIDDEN, 1),
                Stream::mlp(device, input_dim, STREAM_HIDDEN, action_space),
            ),
        };
        DuelingHead {
            v_head,
            a_head,
            input_dim,
            action_space,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn action_space(&self) -> usize {
        self.action_space
    }

    /// Masked action values
    ///
    /// # Arguments
    /// * `x` - Features [batch, input_dim]
    /// * `mask` - Legal actions [batch, action_space], at least one true per row
    ///
    /// # Returns
    /// Q values [batch, action_space], `MASK_FILL` at illegal actions
    pub fn forward(&self, x: Tensor<B, 2>, mask: Tensor<B, 2, Bool>) -> Result<Tensor<B, 2>> {
        let [batch, width] = x.dims();
        if width != self.input_dim {
            return Err(BrainError::shape("dueling head input", [batch, self.input_dim], [batch, width]));
        }
        let mask_dims = mask.dims();
        if mask_dims != [batch, self.action_space] {
            return Err(BrainError::shape("action mask", [batch, self.action_space], mask_dims));
        }

        let counts = legal_counts(mask.clone());
        if let Some(row) = counts.iter().position(|&n| n == 0) {
            return Err(BrainError::InvalidMask { row });
        }

        let v = self.v_head.forward(x.clone());
        let a = self.a_head.forward(x);

        let a_sum = apply_masks(a.clone(), mask.clone(), 0.0)?.sum_dim(1);
        let mask_sum = mask.clone().float().sum_dim(1);
        let a_mean = a_sum / mask_sum;

        apply_masks(v + a - a_mean, mask, MASK_FILL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::LATENT_WIDTH;
    use crate::model::brain::VARIATIONAL_WIDTH;
    use crate::model::mask::mask_from_rows;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn legal_row(legal: &[usize]) -> Vec<bool> {
        let mut row = vec![false; ACTION_SPACE];
        for &i in legal {
            row[i] = true;
        }
        row
    }

    #[test]
    fn test_three_legal_actions() {
        let device = Default::default();
        let head = DuelingHead::<TestBackend>::new(&device, ArchVersion::V1);

        let x = Tensor::random([2, VARIATIONAL_WIDTH], Distribution::Normal(0.0, 1.0), &device);
        let rows = vec![legal_row(&[0, 5, 45]), legal_row(&[3, 4, 37])];
        let mask = mask_from_rows::<TestBackend>(&rows, ACTION_SPACE, &device).unwrap();

        let q = head.forward(x, mask).unwrap();
        assert_eq!(q.dims(), [2, ACTION_SPACE]);

        let data = q.to_data();
        let values = data.as_slice::<f32>().unwrap();
        for (r, row) in rows.iter().enumerate() {
            let q_row = &values[r * ACTION_SPACE..(r + 1) * ACTION_SPACE];
            let sentinels = q_row.iter().filter(|&&v| v == MASK_FILL).count();
            assert_eq!(sentinels, ACTION_SPACE - 3);
            for (i, &legal) in row.iter().enumerate() {
                if legal {
                    assert!(q_row[i].is_finite() && q_row[i] != MASK_FILL);
                }
            }
        }
    }

    #[test]
    fn test_legal_mean_equals_state_value() {
        let device = Default::default();
        let head = DuelingHead::<TestBackend>::new(&device, ArchVersion::V2);

        let x = Tensor::random([1, LATENT_WIDTH], Distribution::Normal(0.0, 1.0), &device);
        let legal = [1, 2, 10, 20, 30];
        let mask = mask_from_rows::<TestBackend>(&[legal_row(&legal)], ACTION_SPACE, &device)
            .unwrap();

        let v: f32 = head.v_head.forward(x.clone()).into_scalar();
        let q = head.forward(x, mask).unwrap().into_data().to_vec::<f32>().unwrap();

        let mean = legal.iter().map(|&i| q[i]).sum::<f32>() / legal.len() as f32;
        assert!((mean - v).abs() < 1e-4, "mean {} vs value {}", mean, v);
    }

    #[test]
    fn test_all_false_row_is_rejected() {
        let device = Default::default();
        let head = DuelingHead::<TestBackend>::new(&device, ArchVersion::V1);

        let x = Tensor::random([2, VARIATIONAL_WIDTH], Distribution::Normal(0.0, 1.0), &device);
        let rows = vec![legal_row(&[0]), vec![false; ACTION_SPACE]];
        let mask = mask_from_rows::<TestBackend>(&rows, ACTION_SPACE, &device).unwrap();

        let err = head.forward(x, mask).unwrap_err();
        assert!(matches!(err, BrainError::InvalidMask { row: 1 }));
    }

    #[test]
    fn test_batch_mismatch_is_rejected() {
        let device = Default::default();
        let head = DuelingHead::<TestBackend>::new(&device, ArchVersion::V1);

        let x = Tensor::random([3, VARIATIONAL_WIDTH], Distribution::Normal(0.0, 1.0), &device);
        let mask = mask_from_rows::<TestBackend>(&[legal_row(&[0]), legal_row(&[1])], ACTION_SPACE, &device)
            .unwrap();

        let err = head.forward(x, mask).unwrap_err();
        assert!(matches!(err, BrainError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_wrong_feature_width_is_rejected() {
        let device = Default::default();
        let head = DuelingHead::<TestBackend>::new(&device, ArchVersion::V2);

        let x = Tensor::random([1, VARIATIONAL_WIDTH], Distribution::Normal(0.0, 1.0), &device);
        let mask = mask_from_rows::<TestBackend>(&[legal_row(&[0])], ACTION_SPACE, &device).unwrap();

        assert!(head.forward(x, mask).is_err());
    }

    #[test]
    fn test_input_width_follows_latent_stage() {
        let device = Default::default();
        let v1 = DuelingHead::<TestBackend>::new(&device, ArchVersion::V1);
        let v2 = DuelingHead::<TestBackend>::new(&device, ArchVersion::V2);

        assert_eq!(v1.input_dim(), <VariationalLatent<TestBackend> as LatentStage<TestBackend>>::FEATURE_WIDTH);
        assert_eq!(v2.input_dim(), <DirectLatent as LatentStage<TestBackend>>::FEATURE_WIDTH);
        assert_eq!(v1.input_dim(), VARIATIONAL_WIDTH);
        assert_eq!(v2.input_dim(), LATENT_WIDTH);
        assert!(v1.v_head.hidden.is_none());
        assert!(v2.a_head.hidden.is_some());
    }

    #[test]
    fn test_single_legal_action_equals_value() {
        let device = Default::default();
        let head = DuelingHead::<TestBackend>::with_action_space(&device, ArchVersion::V1, 4);

        let x = Tensor::random([1, VARIATIONAL_WIDTH], Distribution::Normal(0.0, 1.0), &device);
        let mask = mask_from_rows::<TestBackend>(&[vec![false, false, true, false]], 4, &device)
            .unwrap();

        let v: f32 = head.v_head.forward(x.clone()).into_scalar();
        let q = head.forward(x, mask).unwrap().into_data().to_vec::<f32>().unwrap();

        assert!((q[2] - v).abs() < 1e-5);
        assert_eq!(q[0], MASK_FILL);
        assert_eq!(q[1], MASK_FILL);
        assert_eq!(q[3], MASK_FILL);
    }
}
