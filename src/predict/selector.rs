//! Action selection over masked action values

use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Tensor};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::{BrainError, InferenceSection, Result};

/// Picks one legal action per batch row
///
/// Greedy mode takes the legal argmax. Otherwise actions are drawn from
/// `softmax(q / temperature)` restricted to legal actions, truncated to the
/// smallest set whose probability mass reaches `top_p`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionSelector {
    greedy: bool,
    temperature: f64,
    top_p: f64,
}

impl Default for ActionSelector {
    fn default() -> Self {
        Self::greedy()
    }
}

impl ActionSelector {
    pub fn greedy() -> Self {
        ActionSelector {
            greedy: true,
            temperature: 1.0,
            top_p: 1.0,
        }
    }

    pub fn boltzmann(temperature: f64, top_p: f64) -> Result<Self> {
        if temperature <= 0.0 {
            return Err(BrainError::Config(format!(
                "temperature must be positive, got {}",
                temperature
            )));
        }
        if !(top_p > 0.0 && top_p <= 1.0) {
            return Err(BrainError::Config(format!("top_p must be in (0, 1], got {}", top_p)));
        }
        Ok(ActionSelector {
            greedy: false,
            temperature,
            top_p,
        })
    }

    pub fn from_config(section: &InferenceSection) -> Result<Self> {
        if section.greedy {
            Ok(Self::greedy())
        } else {
            Self::boltzmann(section.temperature, section.top_p)
        }
    }

    pub fn is_greedy(&self) -> bool {
        self.greedy
    }

    /// One action index per row of `q` [batch, actions]
    pub fn select<B: Backend, R: Rng>(
        &self,
        q: Tensor<B, 2>,
        mask: Tensor<B, 2, Bool>,
        rng: &mut R,
    ) -> Result<Vec<usize>> {
        let dims = q.dims();
        if mask.dims() != dims {
            return Err(BrainError::shape("selector mask", dims, mask.dims()));
        }
        let [batch, actions] = dims;

        let values: Vec<f64> = q.into_data().iter::<f64>().collect();
        let legal: Vec<bool> = mask.into_data().iter::<bool>().collect();

        (0..batch)
            .map(|row| {
                let range = row * actions..(row + 1) * actions;
                let candidates: Vec<(usize, f64)> = values[range.clone()]
                    .iter()
                    .zip(&legal[range])
                    .enumerate()
                    .filter(|(_, (_, &ok))| ok)
                    .map(|(action, (&v, _))| (action, v))
                    .collect();
                if candidates.is_empty() {
                    return Err(BrainError::InvalidMask { row });
                }
                if self.greedy {
                    Ok(argmax(&candidates))
                } else {
                    self.sample(&candidates, rng)
                }
            })
            .collect()
    }

    fn sample<R: Rng>(&self, candidates: &[(usize, f64)], rng: &mut R) -> Result<usize> {
        let max = candidates
            .iter()
            .map(|&(_, v)| v)
            .fold(f64::NEG_INFINITY, f64::max);
        let mut weighted: Vec<(usize, f64)> = candidates
            .iter()
            .map(|&(action, v)| (action, ((v - max) / self.temperature).exp()))
            .collect();
        let total: f64 = weighted.iter().map(|&(_, w)| w).sum();

        if self.top_p < 1.0 {
            weighted.sort_by(|a, b| b.1.total_cmp(&a.1));
            let mut mass = 0.0;
            let mut keep = 0;
            for &(_, w) in &weighted {
                mass += w / total;
                keep += 1;
                if mass >= self.top_p {
                    break;
                }
            }
            weighted.truncate(keep);
        }

        let dist = WeightedIndex::new(weighted.iter().map(|&(_, w)| w))
            .map_err(|e| BrainError::InvalidInput(format!("cannot sample actions: {}", e)))?;
        Ok(weighted[dist.sample(rng)].0)
    }
}

fn argmax(candidates: &[(usize, f64)]) -> usize {
    let mut best = candidates[0];
    for &(action, v) in &candidates[1..] {
        if v > best.1 {
            best = (action, v);
        }
    }
    best.0
}
