//! Network architecture
//!
//! - Action-value network: channel-attention ResNet [`Encoder`] inside a
//!   version-specific [`Brain`], followed by a masked [`DuelingHead`]
//! - Rank model: stacked GRU [`Grp`] over per-round score sequences, with the
//!   canonical [`PermutationTable`] mapping logits to finishing orders

pub mod attention;
pub mod brain;
pub mod checkpoint;
pub mod dqn;
pub mod grp;
pub mod mask;
pub mod norm;
pub mod perms;
pub mod resnet;

pub use attention::ChannelAttention;
pub use brain::{
    Brain, BrainConfig, BrainV1, BrainV2, DirectLatent, LatentDistribution, LatentStage,
    VariationalLatent,
};
pub use dqn::DuelingHead;
pub use grp::{Grp, GrpConfig, PackedSequences};
pub use mask::{apply_masks, mask_from_rows, MASK_FILL};
pub use norm::{Activation, BatchNorm1d, BatchNormFactory, IdentityNorm, NormFactory, NormStage};
pub use perms::{PermutationTable, RankAssignment};
pub use resnet::{Encoder, EncoderConfig, ResidualBlock};
