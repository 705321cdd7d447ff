//! Normalization and activation stages
//!
//! Layers never pick their own normalization or activation. They receive a
//! [`NormFactory`] and an [`Activation`] at construction, so the same block
//! code serves both the batch-norm/ReLU and batch-norm/Mish networks.

use burn::module::{Module, Param, RunningState};
use burn::tensor::activation::{mish, relu};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Elementwise nonlinearity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Relu,
    Mish,
}

impl Activation {
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Relu => relu(x),
            Activation::Mish => mish(x),
        }
    }
}

/// Per-channel batch normalization over `[batch, channels, positions]`
///
/// Running statistics follow `running = (1 - momentum) * running + momentum * batch`.
/// Three flags decide the behaviour:
/// - `training`: the caller's train/eval mode
/// - `frozen`: forces inference behaviour even while training
/// - `track_running_stats`: when off, the running estimates are never updated
///
/// Batch statistics are used only while training and not frozen. Eval and
/// frozen layers always normalize with the running estimates.
#[derive(Module, Debug)]
pub struct BatchNorm1d<B: Backend> {
    gamma: Param<Tensor<B, 1>>,
    beta: Param<Tensor<B, 1>>,
    running_mean: RunningState<Tensor<B, 1>>,
    running_var: RunningState<Tensor<B, 1>>,
    momentum: f64,
    epsilon: f64,
    channels: usize,
    training: bool,
    frozen: bool,
    track_running_stats: bool,
}

impl<B: Backend> BatchNorm1d<B> {
    pub fn new(device: &B::Device, channels: usize, momentum: f64, epsilon: f64) -> Self {
        BatchNorm1d {
            gamma: Param::from_tensor(Tensor::ones([channels], device)),
            beta: Param::from_tensor(Tensor::zeros([channels], device)),
            running_mean: RunningState::new(Tensor::zeros([channels], device)),
            running_var: RunningState::new(Tensor::ones([channels], device)),
            momentum,
            epsilon,
            channels,
            training: false,
            frozen: false,
            track_running_stats: true,
        }
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    pub fn set_track_running_stats(&mut self, track: bool) {
        self.track_running_stats = track;
    }

    /// Restore running mean to zeros and running variance to ones
    pub fn reset_running_stats(&mut self) {
        let device = self.gamma.val().device();
        self.running_mean = RunningState::new(Tensor::zeros([self.channels], &device));
        self.running_var = RunningState::new(Tensor::ones([self.channels], &device));
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn tracks_running_stats(&self) -> bool {
        self.track_running_stats
    }

    pub fn running_mean(&self) -> Tensor<B, 1> {
        self.running_mean.value()
    }

    pub fn running_var(&self) -> Tensor<B, 1> {
        self.running_var.value()
    }

    fn uses_batch_stats(&self) -> bool {
        self.training && !self.frozen
    }

    fn updates_running_stats(&self) -> bool {
        self.track_running_stats && self.training && !self.frozen
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, channels, positions] = x.dims();

        let (mean, var) = if self.uses_batch_stats() {
            let count = batch * positions;
            let flat = x.clone().swap_dims(0, 1).reshape([channels, count]);
            let mean = flat.clone().mean_dim(1);
            let var = (flat - mean.clone()).powf_scalar(2.0).mean_dim(1);
            let mean = mean.reshape([channels]);
            let var = var.reshape([channels]);

            if self.updates_running_stats() {
                // running variance is the unbiased estimate
                let correction = if count > 1 {
                    count as f64 / (count - 1) as f64
                } else {
                    1.0
                };
                let running_mean = self
                    .running_mean
                    .value_sync()
                    .mul_scalar(1.0 - self.momentum)
                    .add(mean.clone().detach().mul_scalar(self.momentum));
                let running_var = self
                    .running_var
                    .value_sync()
                    .mul_scalar(1.0 - self.momentum)
                    .add(var.clone().detach().mul_scalar(self.momentum * correction));
                self.running_mean.update(running_mean.detach());
                self.running_var.update(running_var.detach());
            }
            (mean, var)
        } else {
            (self.running_mean.value(), self.running_var.value())
        };

        let mean = mean.reshape([1, channels, 1]);
        let std = var.add_scalar(self.epsilon).sqrt().reshape([1, channels, 1]);
        let gamma = self.gamma.val().reshape([1, channels, 1]);
        let beta = self.beta.val().reshape([1, channels, 1]);

        (x - mean) / std * gamma + beta
    }
}

/// Normalization slot of a layer: batch norm, or nothing
#[derive(Module, Debug)]
pub struct NormStage<B: Backend> {
    batch_norm: Option<BatchNorm1d<B>>,
}

impl<B: Backend> NormStage<B> {
    pub fn identity() -> Self {
        NormStage { batch_norm: None }
    }

    pub fn batch(norm: BatchNorm1d<B>) -> Self {
        NormStage {
            batch_norm: Some(norm),
        }
    }

    /// Whether this stage carries its own bias-like shift
    pub fn has_affine(&self) -> bool {
        self.batch_norm.is_some()
    }

    pub fn batch_norm_mut(&mut self) -> Option<&mut BatchNorm1d<B>> {
        self.batch_norm.as_mut()
    }

    pub fn batch_norm(&self) -> Option<&BatchNorm1d<B>> {
        self.batch_norm.as_ref()
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        match &self.batch_norm {
            Some(norm) => norm.forward(x),
            None => x,
        }
    }
}

/// Builds the normalization stage for a layer with `channels` channels
pub trait NormFactory<B: Backend> {
    fn build(&self, channels: usize, device: &B::Device) -> NormStage<B>;

    /// Convolutions feeding this norm can drop their bias
    fn absorbs_bias(&self) -> bool;
}

/// Batch normalization with the given momentum and epsilon
#[derive(Debug, Clone, Copy)]
pub struct BatchNormFactory {
    pub momentum: f64,
    pub epsilon: f64,
}

impl Default for BatchNormFactory {
    fn default() -> Self {
        BatchNormFactory {
            momentum: 0.01,
            epsilon: 1e-5,
        }
    }
}

impl<B: Backend> NormFactory<B> for BatchNormFactory {
    fn build(&self, channels: usize, device: &B::Device) -> NormStage<B> {
        NormStage::batch(BatchNorm1d::new(device, channels, self.momentum, self.epsilon))
    }

    fn absorbs_bias(&self) -> bool {
        true
    }
}

/// No normalization
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityNorm;

impl<B: Backend> NormFactory<B> for IdentityNorm {
    fn build(&self, _channels: usize, _device: &B::Device) -> NormStage<B> {
        NormStage::identity()
    }

    fn absorbs_bias(&self) -> bool {
        false
    }
}
