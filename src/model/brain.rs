//! Observation encoder plus version-specific latent stage
//!
//! The architecture version is chosen once, by the latent stage type:
//! - [`VariationalLatent`] (v1): ReLU post-activation tower, then mean and
//!   log-scale heads of a 512-wide latent distribution
//! - [`DirectLatent`] (v2): Mish pre-activation tower, Mish on the 1024-wide
//!   encoder output
//!
//! `Brain` also owns the batch-norm mode: train/eval, freeze, running-stat
//! tracking. Every switch goes through the encoder's norm registry.

use std::path::Path;

use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation::{mish, relu};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::checkpoint::{load_module, save_module};
use super::norm::{Activation, BatchNormFactory, NormFactory};
use super::resnet::{Encoder, EncoderConfig};
use crate::consts::{ArchVersion, LATENT_WIDTH, NUM_TILES};
use crate::{BrainError, BrainSection, Result};

/// Width of the v1 latent distribution
pub const VARIATIONAL_WIDTH: usize = 512;

/// Post-processing of the encoder output, fixed per architecture version
pub trait LatentStage<B: Backend>: Module<B> {
    type Output;

    const VERSION: ArchVersion;

    /// Width of the features handed to the action-value head
    const FEATURE_WIDTH: usize;

    fn init(device: &B::Device) -> Self;

    fn forward(&self, phi: Tensor<B, 2>) -> Self::Output;
}

/// Parameters of a diagonal Gaussian over the latent space
#[derive(Debug, Clone)]
pub struct LatentDistribution<B: Backend> {
    /// Mean [batch, 512]
    pub mu: Tensor<B, 2>,
    /// Log standard deviation [batch, 512]
    pub logsig: Tensor<B, 2>,
}

/// v1 latent stage: shared projection, then mean and log-scale heads
#[derive(Module, Debug)]
pub struct VariationalLatent<B: Backend> {
    latent_net: Linear<B>,
    mu_head: Linear<B>,
    logsig_head: Linear<B>,
}

impl<B: Backend> LatentStage<B> for VariationalLatent<B> {
    type Output = LatentDistribution<B>;

    const VERSION: ArchVersion = ArchVersion::V1;
    const FEATURE_WIDTH: usize = VARIATIONAL_WIDTH;

    fn init(device: &B::Device) -> Self {
        VariationalLatent {
            latent_net: LinearConfig::new(LATENT_WIDTH, VARIATIONAL_WIDTH).init(device),
            mu_head: LinearConfig::new(VARIATIONAL_WIDTH, VARIATIONAL_WIDTH).init(device),
            logsig_head: LinearConfig::new(VARIATIONAL_WIDTH, VARIATIONAL_WIDTH).init(device),
        }
    }

    fn forward(&self, phi: Tensor<B, 2>) -> LatentDistribution<B> {
        let latent = relu(self.latent_net.forward(phi));
        LatentDistribution {
            mu: self.mu_head.forward(latent.clone()),
            logsig: self.logsig_head.forward(latent),
        }
    }
}

/// v2 latent stage: Mish on the encoder output
#[derive(Module, Clone, Debug, Default)]
pub struct DirectLatent;

impl<B: Backend> LatentStage<B> for DirectLatent {
    type Output = Tensor<B, 2>;

    const VERSION: ArchVersion = ArchVersion::V2;
    const FEATURE_WIDTH: usize = LATENT_WIDTH;

    fn init(_device: &B::Device) -> Self {
        DirectLatent
    }

    fn forward(&self, phi: Tensor<B, 2>) -> Tensor<B, 2> {
        mish(phi)
    }
}

/// Tower style of each version: (activation, pre-activation blocks)
fn tower_style(version: ArchVersion) -> (Activation, bool) {
    match version {
        ArchVersion::V1 => (Activation::Relu, false),
        ArchVersion::V2 => (Activation::Mish, true),
    }
}

/// Configuration for a brain
#[derive(Debug, Clone)]
pub struct BrainConfig {
    pub conv_channels: usize,
    pub num_blocks: usize,
    /// Expect the invisible observation alongside the regular one
    pub is_oracle: bool,
    pub batch_norm: BatchNormFactory,
}

impl Default for BrainConfig {
    fn default() -> Self {
        BrainConfig {
            conv_channels: 192,
            num_blocks: 40,
            is_oracle: false,
            batch_norm: BatchNormFactory::default(),
        }
    }
}

impl BrainConfig {
    pub fn from_config(section: &BrainSection) -> Self {
        BrainConfig {
            conv_channels: section.conv_channels,
            num_blocks: section.num_blocks,
            is_oracle: section.oracle,
            batch_norm: BatchNormFactory {
                momentum: section.bn_momentum,
                epsilon: section.bn_epsilon,
            },
        }
    }

    fn encoder_config<B: Backend>(&self, version: ArchVersion) -> EncoderConfig {
        let (actv, pre_actv) = tower_style(version);
        EncoderConfig {
            in_channels: version.in_channels(self.is_oracle),
            conv_channels: self.conv_channels,
            num_blocks: self.num_blocks,
            actv,
            pre_actv,
            bias: !NormFactory::<B>::absorbs_bias(&self.batch_norm),
            reduce_dim: true,
            positions: NUM_TILES,
        }
    }
}

/// Encoder and latent stage of one architecture version
///
/// `L` is one of the [`LatentStage`] implementations. The mode flags are
/// constant fields, so loading weights keeps the current modes.
#[derive(Module, Debug)]
pub struct Brain<B: Backend, L> {
    encoder: Encoder<B>,
    stage: L,
    is_oracle: bool,
    training: bool,
    freeze_bn: bool,
}

pub type BrainV1<B> = Brain<B, VariationalLatent<B>>;
pub type BrainV2<B> = Brain<B, DirectLatent>;

impl<B: Backend, L: LatentStage<B> + burn::module::ModuleDisplay> Brain<B, L> {
    /// Create a brain in eval mode
    pub fn new(device: &B::Device, config: &BrainConfig) -> Self {
        let encoder_config = config.encoder_config::<B>(L::VERSION);
        let encoder = Encoder::new(device, &encoder_config, &config.batch_norm);

        log::info!(
            "Brain {}{}: {} input channels, {} x {} conv blocks",
            L::VERSION,
            if config.is_oracle { " (oracle)" } else { "" },
            encoder_config.in_channels,
            config.num_blocks,
            config.conv_channels,
        );

        let mut brain = Brain {
            encoder,
            stage: L::init(device),
            is_oracle: config.is_oracle,
            training: false,
            freeze_bn: false,
        };
        brain.set_training(false);
        brain
    }

    /// Run the encoder and the latent stage
    ///
    /// # Arguments
    /// * `obs` - Observation [batch, obs_channels, 34]
    /// * `invisible_obs` - Oracle observation [batch, oracle_channels, 34];
    ///   required for oracle brains, rejected otherwise
    pub fn forward(
        &self,
        obs: Tensor<B, 3>,
        invisible_obs: Option<Tensor<B, 3>>,
    ) -> Result<L::Output> {
        let obs = match (self.is_oracle, invisible_obs) {
            (true, Some(invisible)) => {
                let [batch, _, positions] = obs.dims();
                let [inv_batch, _, inv_positions] = invisible.dims();
                if (batch, positions) != (inv_batch, inv_positions) {
                    return Err(BrainError::shape(
                        "invisible observation",
                        [batch, positions],
                        [inv_batch, inv_positions],
                    ));
                }
                Tensor::cat(vec![obs, invisible], 1)
            }
            (true, None) => {
                return Err(BrainError::InvalidInput(
                    "oracle brain requires the invisible observation".to_string(),
                ))
            }
            (false, Some(_)) => {
                return Err(BrainError::InvalidInput(
                    "invisible observation given to a non-oracle brain".to_string(),
                ))
            }
            (false, None) => obs,
        };

        let phi = self.encoder.forward(obs)?;
        Ok(self.stage.forward(phi))
    }

    /// Switch train/eval and re-apply the freeze policy in one step
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
        self.encoder.set_training(training);
        self.encoder.freeze(self.freeze_bn);
    }

    /// When frozen, batch norms use their running estimates and never update
    /// them, even in training mode
    pub fn freeze_bn(&mut self, frozen: bool) {
        self.freeze_bn = frozen;
        let training = self.training;
        self.set_training(training);
    }

    pub fn set_track_running_stats(&mut self, track: bool) {
        self.encoder.set_track_running_stats(track);
    }

    pub fn reset_running_stats(&mut self) {
        self.encoder.reset_running_stats();
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn is_bn_frozen(&self) -> bool {
        self.freeze_bn
    }

    pub fn is_oracle(&self) -> bool {
        self.is_oracle
    }

    pub fn version(&self) -> ArchVersion {
        L::VERSION
    }

    pub fn encoder(&self) -> &Encoder<B> {
        &self.encoder
    }

    pub fn stage(&self) -> &L {
        &self.stage
    }

    /// Save encoder and latent stage weights as one record
    pub fn save(&self, path: &Path) -> Result<()> {
        save_module(self, path)
    }

    /// Load weights saved by [`Brain::save`], keeping the current modes
    pub fn load(self, path: &Path, device: &B::Device) -> Result<Self> {
        let training = self.training;
        let mut brain = load_module(self, path, device)?;
        brain.set_training(training);
        Ok(brain)
    }
}
