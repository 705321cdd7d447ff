//! Channel attention gate
//!
//! Squeezes a `[batch, channels, positions]` feature map into per-channel
//! average and max descriptors, runs both through one shared bottleneck MLP,
//! and turns their sum into a sigmoid gate `[batch, channels, 1]`.

use burn::module::{Ignored, Module};
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::norm::Activation;

/// Default bottleneck reduction ratio
pub const ATTENTION_RATIO: usize = 16;

#[derive(Module, Debug)]
pub struct ChannelAttention<B: Backend> {
    /// Shared by the average and max paths
    fc1: Linear<B>,
    fc2: Linear<B>,
    actv: Ignored<Activation>,
}

impl<B: Backend> ChannelAttention<B> {
    pub fn new(device: &B::Device, channels: usize, ratio: usize, actv: Activation) -> Self {
        let hidden = (channels / ratio.max(1)).max(1);
        ChannelAttention {
            fc1: LinearConfig::new(channels, hidden).init(device),
            fc2: LinearConfig::new(hidden, channels).init(device),
            actv: Ignored(actv),
        }
    }

    fn shared_mlp(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.actv.forward(self.fc1.forward(x));
        self.fc2.forward(x)
    }

    /// Gate values in (0, 1), shaped `[batch, channels, 1]`
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, channels, _] = x.dims();

        let avg = x.clone().mean_dim(2).reshape([batch, channels]);
        let max = x.max_dim(2).reshape([batch, channels]);

        let gate = sigmoid(self.shared_mlp(avg) + self.shared_mlp(max));
        gate.reshape([batch, channels, 1])
    }
}
