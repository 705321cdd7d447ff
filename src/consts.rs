//! Shape contracts shared with the observation encoder
//!
//! Observations are `[channels, NUM_TILES]` planes; the channel count depends
//! on the architecture version and on whether the oracle planes are appended.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::BrainError;

/// Number of entries in the discrete action space
pub const ACTION_SPACE: usize = 46;

/// Width of one per-round feature row fed to the rank model:
/// `[grand_kyoku, honba, kyotaku, s0, s1, s2, s3]`
pub const GRP_SIZE: usize = 7;

/// Players at the table
pub const NUM_PLAYERS: usize = 4;

/// Distinct finishing orders of four players (4!)
pub const NUM_PERMUTATIONS: usize = 24;

/// Positions per observation plane (one per tile kind)
pub const NUM_TILES: usize = 34;

/// Channels produced by the encoder's reduction conv
pub const REDUCED_CHANNELS: usize = 32;

/// Encoder latent width after reduction
pub const LATENT_WIDTH: usize = 1024;

/// Architecture generation of the action-value network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchVersion {
    /// ReLU, post-activation blocks, variational latent heads
    V1,
    /// Mish, pre-activation blocks, latent used directly
    V2,
}

impl ArchVersion {
    pub fn number(self) -> u8 {
        match self {
            ArchVersion::V1 => 1,
            ArchVersion::V2 => 2,
        }
    }

    /// Channels of the regular observation
    pub fn obs_channels(self) -> usize {
        match self {
            ArchVersion::V1 => 938,
            ArchVersion::V2 => 942,
        }
    }

    /// Channels of the invisible (oracle-only) observation
    pub fn oracle_obs_channels(self) -> usize {
        match self {
            ArchVersion::V1 => 211,
            ArchVersion::V2 => 217,
        }
    }

    /// Encoder input channels, with the oracle planes appended when requested
    pub fn in_channels(self, oracle: bool) -> usize {
        if oracle {
            self.obs_channels() + self.oracle_obs_channels()
        } else {
            self.obs_channels()
        }
    }
}

impl TryFrom<u8> for ArchVersion {
    type Error = BrainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ArchVersion::V1),
            2 => Ok(ArchVersion::V2),
            other => Err(BrainError::Config(format!(
                "Unsupported architecture version {}. Use 1 or 2.",
                other
            ))),
        }
    }
}

impl fmt::Display for ArchVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.number())
    }
}
