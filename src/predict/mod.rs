//! Inference helpers
//!
//! Turn action values into concrete choices.

pub mod selector;

pub use selector::ActionSelector;
