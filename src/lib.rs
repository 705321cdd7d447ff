//! Neural networks for a four-player riichi mahjong agent
//!
//! Two independent model families:
//! - A channel-attention ResNet encoder feeding a dueling action-value head,
//!   used to pick legal actions from a fixed action space.
//! - A recurrent rank model predicting the distribution over the 24 final
//!   placements of the four players from per-round score snapshots.

pub mod consts;
pub mod model;
pub mod predict;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use consts::ArchVersion;

/// Crate-wide errors
#[derive(Debug, Error)]
pub enum BrainError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Action mask row {row} has no legal action")]
    InvalidMask { row: usize },

    #[error("Rank assignment {0:?} is not a permutation of the four ranks")]
    InvalidRankAssignment(Vec<usize>),

    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Recorder error: {0}")]
    Recorder(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl BrainError {
    pub(crate) fn shape(
        context: &'static str,
        expected: impl std::fmt::Debug,
        actual: impl std::fmt::Debug,
    ) -> Self {
        BrainError::ShapeMismatch {
            context,
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }
}

pub type Result<T> = std::result::Result<T, BrainError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub brain: BrainSection,
    pub grp: GrpSection,
    pub inference: InferenceSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainSection {
    /// Architecture version (1 or 2)
    pub version: u8,
    pub conv_channels: usize,
    pub num_blocks: usize,
    /// Build the oracle variant that also sees the invisible observation
    pub oracle: bool,
    pub bn_momentum: f64,
    pub bn_epsilon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrpSection {
    pub hidden_size: usize,
    pub num_layers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSection {
    pub greedy: bool,
    pub temperature: f64,
    pub top_p: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            brain: BrainSection {
                version: 1,
                conv_channels: 192,
                num_blocks: 40,
                oracle: false,
                bn_momentum: 0.01,
                bn_epsilon: 1e-5,
            },
            grp: GrpSection {
                hidden_size: 64,
                num_layers: 2,
            },
            inference: InferenceSection {
                greedy: true,
                temperature: 1.0,
                top_p: 1.0,
            },
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BrainError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| BrainError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BrainError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Architecture version named by `[brain] version`
    pub fn arch_version(&self) -> Result<ArchVersion> {
        ArchVersion::try_from(self.brain.version)
    }

    fn validate(&self) -> Result<()> {
        self.arch_version()?;
        if self.brain.conv_channels == 0 || self.grp.hidden_size == 0 || self.grp.num_layers == 0 {
            return Err(BrainError::Config(
                "channel and layer sizes must be non-zero".to_string(),
            ));
        }
        if self.inference.temperature <= 0.0 {
            return Err(BrainError::Config(format!(
                "temperature must be positive, got {}",
                self.inference.temperature
            )));
        }
        if !(self.inference.top_p > 0.0 && self.inference.top_p <= 1.0) {
            return Err(BrainError::Config(format!(
                "top_p must be in (0, 1], got {}",
                self.inference.top_p
            )));
        }
        Ok(())
    }
}
