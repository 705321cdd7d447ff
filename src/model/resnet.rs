//! Residual convolutional encoder over `[batch, channels, 34]` observations
//!
//! Architecture (post-activation):
//!   conv → norm → actv → N × ResidualBlock → [conv(32) → actv → flatten → linear(1024)]
//!
//! Architecture (pre-activation):
//!   conv → N × ResidualBlock → norm → actv → [conv(32) → actv → flatten → linear(1024)]

use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv1d, Conv1dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig1d};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::attention::{ChannelAttention, ATTENTION_RATIO};
use super::norm::{Activation, BatchNorm1d, NormFactory, NormStage};
use crate::consts::{LATENT_WIDTH, NUM_TILES, REDUCED_CHANNELS};
use crate::{BrainError, Result};

/// Kernel-3, padding-1 convolution that keeps the sequence length
fn conv1d<B: Backend>(device: &B::Device, c_in: usize, c_out: usize, bias: bool) -> Conv1d<B> {
    Conv1dConfig::new(c_in, c_out, 3)
        .with_padding(PaddingConfig1d::Explicit(1))
        .with_bias(bias)
        .init(device)
}

/// Convolutional residual unit gated by channel attention
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv1: Conv1d<B>,
    conv2: Conv1d<B>,
    norm1: NormStage<B>,
    norm2: NormStage<B>,
    ca: ChannelAttention<B>,
    actv: Ignored<Activation>,
    pre_actv: bool,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn new(
        device: &B::Device,
        channels: usize,
        norm: &dyn NormFactory<B>,
        actv: Activation,
        pre_actv: bool,
        bias: bool,
    ) -> Self {
        ResidualBlock {
            conv1: conv1d(device, channels, channels, bias),
            conv2: conv1d(device, channels, channels, bias),
            norm1: norm.build(channels, device),
            norm2: norm.build(channels, device),
            ca: ChannelAttention::new(device, channels, ATTENTION_RATIO, actv),
            actv: Ignored(actv),
            pre_actv,
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let out = if self.pre_actv {
            let out = self.actv.forward(self.norm1.forward(x.clone()));
            let out = self.conv1.forward(out);
            let out = self.actv.forward(self.norm2.forward(out));
            self.conv2.forward(out)
        } else {
            let out = self.conv1.forward(x.clone());
            let out = self.actv.forward(self.norm1.forward(out));
            let out = self.conv2.forward(out);
            self.norm2.forward(out)
        };

        let out = self.ca.forward(out.clone()) * out;
        let out = out + x;
        if self.pre_actv {
            out
        } else {
            self.actv.forward(out)
        }
    }

    fn norm_layers_mut(&mut self) -> Vec<&mut BatchNorm1d<B>> {
        [self.norm1.batch_norm_mut(), self.norm2.batch_norm_mut()]
            .into_iter()
            .flatten()
            .collect()
    }

    fn norm_layers(&self) -> Vec<&BatchNorm1d<B>> {
        [self.norm1.batch_norm(), self.norm2.batch_norm()]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Configuration for the encoder
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Observation channels (including oracle planes, if any)
    pub in_channels: usize,
    /// Channels inside the residual tower
    pub conv_channels: usize,
    /// Number of residual blocks
    pub num_blocks: usize,
    pub actv: Activation,
    pub pre_actv: bool,
    /// Bias on the tower's convolutions
    pub bias: bool,
    /// Append the conv(32) + linear(1024) reduction
    pub reduce_dim: bool,
    /// Positions per channel
    pub positions: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig {
            in_channels: 938,
            conv_channels: 192,
            num_blocks: 40,
            actv: Activation::Relu,
            pre_actv: false,
            bias: true,
            reduce_dim: true,
            positions: NUM_TILES,
        }
    }
}

/// Dimensionality reduction tail: conv to 32 channels, flatten, project
#[derive(Module, Debug)]
pub struct Reduction<B: Backend> {
    conv: Conv1d<B>,
    fc: Linear<B>,
}

/// Observation encoder
///
/// Owns every normalization layer of the tower. The mode switches below walk
/// this fixed set (stem/final norm plus two per block) and nothing else.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    stem: Conv1d<B>,
    /// Applied after the stem (post-activation) or after the tower (pre-activation)
    norm: NormStage<B>,
    blocks: Vec<ResidualBlock<B>>,
    reduce: Option<Reduction<B>>,
    actv: Ignored<Activation>,
    pre_actv: bool,
    in_channels: usize,
    conv_channels: usize,
    positions: usize,
}

impl<B: Backend> Encoder<B> {
    pub fn new(device: &B::Device, config: &EncoderConfig, norm: &dyn NormFactory<B>) -> Self {
        let blocks: Vec<_> = (0..config.num_blocks)
            .map(|_| {
                ResidualBlock::new(
                    device,
                    config.conv_channels,
                    norm,
                    config.actv,
                    config.pre_actv,
                    config.bias,
                )
            })
            .collect();

        let reduce = config.reduce_dim.then(|| Reduction {
            conv: conv1d(device, config.conv_channels, REDUCED_CHANNELS, true),
            fc: LinearConfig::new(REDUCED_CHANNELS * config.positions, LATENT_WIDTH).init(device),
        });

        let encoder = Encoder {
            stem: conv1d(device, config.in_channels, config.conv_channels, config.bias),
            norm: norm.build(config.conv_channels, device),
            blocks,
            reduce,
            actv: Ignored(config.actv),
            pre_actv: config.pre_actv,
            in_channels: config.in_channels,
            conv_channels: config.conv_channels,
            positions: config.positions,
        };

        log::debug!(
            "Encoder: {} -> {} channels, {} blocks, {} norm layers, output width {}",
            config.in_channels,
            config.conv_channels,
            config.num_blocks,
            encoder.norm_layers().len(),
            encoder.output_width()
        );

        encoder
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    /// Width of [`Encoder::forward`]'s output
    pub fn output_width(&self) -> usize {
        if self.reduce.is_some() {
            LATENT_WIDTH
        } else {
            self.conv_channels * self.positions
        }
    }

    /// Run the stem and the residual tower, returning `[batch, conv_channels, positions]`
    pub fn forward_features(&self, x: Tensor<B, 3>) -> Result<Tensor<B, 3>> {
        let [batch, channels, positions] = x.dims();
        if channels != self.in_channels || positions != self.positions {
            return Err(BrainError::shape(
                "encoder input",
                [batch, self.in_channels, self.positions],
                [batch, channels, positions],
            ));
        }

        let mut x = self.stem.forward(x);
        if !self.pre_actv {
            x = self.actv.forward(self.norm.forward(x));
        }
        for block in &self.blocks {
            x = block.forward(x);
        }
        if self.pre_actv {
            x = self.actv.forward(self.norm.forward(x));
        }
        Ok(x)
    }

    /// Encode observations into `[batch, output_width]`
    ///
    /// Without the reduction tail the feature map is flattened as is.
    pub fn forward(&self, x: Tensor<B, 3>) -> Result<Tensor<B, 2>> {
        let features = self.forward_features(x)?;
        let [batch, _, _] = features.dims();

        Ok(match &self.reduce {
            Some(reduce) => {
                let x = self.actv.forward(reduce.conv.forward(features));
                reduce.fc.forward(x.reshape([batch, REDUCED_CHANNELS * self.positions]))
            }
            None => features.reshape([batch, self.conv_channels * self.positions]),
        })
    }

    /// Every batch-norm layer in the tower
    pub fn norm_layers_mut(&mut self) -> Vec<&mut BatchNorm1d<B>> {
        let mut layers: Vec<_> = self.norm.batch_norm_mut().into_iter().collect();
        for block in self.blocks.iter_mut() {
            layers.extend(block.norm_layers_mut());
        }
        layers
    }

    pub fn norm_layers(&self) -> Vec<&BatchNorm1d<B>> {
        let mut layers: Vec<_> = self.norm.batch_norm().into_iter().collect();
        for block in &self.blocks {
            layers.extend(block.norm_layers());
        }
        layers
    }

    pub fn set_training(&mut self, training: bool) {
        for layer in self.norm_layers_mut() {
            layer.set_training(training);
        }
    }

    /// Force inference behaviour on every norm layer, independent of the training flag
    pub fn freeze(&mut self, frozen: bool) {
        for layer in self.norm_layers_mut() {
            layer.set_frozen(frozen);
        }
    }

    pub fn set_track_running_stats(&mut self, track: bool) {
        for layer in self.norm_layers_mut() {
            layer.set_track_running_stats(track);
        }
    }

    pub fn reset_running_stats(&mut self) {
        for layer in self.norm_layers_mut() {
            layer.reset_running_stats();
        }
    }
}
