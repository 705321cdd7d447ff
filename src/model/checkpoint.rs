//! Weight files
//!
//! Every network is stored as named MessagePack records at full precision.
//! The recorder appends the `.mpk` extension to the given path.

use std::path::Path;

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::Backend;

use crate::{BrainError, Result};

/// Write the weights of `module` to `path`
pub fn save_module<B: Backend, M: Module<B>>(module: &M, path: &Path) -> Result<()> {
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    Recorder::<B>::record(&recorder, module.clone().into_record(), path.to_path_buf())
        .map_err(|e| BrainError::Recorder(e.to_string()))?;
    log::debug!("Saved weights to {}", path.display());
    Ok(())
}

/// Replace the weights of `module` with those stored at `path`
///
/// Constant fields (sizes, flags) keep the values of `module`.
pub fn load_module<B: Backend, M: Module<B>>(module: M, path: &Path, device: &B::Device) -> Result<M> {
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let record = Recorder::<B>::load(&recorder, path.to_path_buf(), device)
        .map_err(|e| BrainError::Recorder(format!("{}: {}", path.display(), e)))?;
    log::debug!("Loaded weights from {}", path.display());
    Ok(module.load_record(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::{Linear, LinearConfig};
    use burn::tensor::{Distribution, Tensor};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_save_then_load_restores_weights() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("linear");

        let saved: Linear<TestBackend> = LinearConfig::new(8, 3).init(&device);
        save_module(&saved, &path).unwrap();

        let fresh: Linear<TestBackend> = LinearConfig::new(8, 3).init(&device);
        let loaded = load_module(fresh, &path, &device).unwrap();

        let x = Tensor::<TestBackend, 2>::random([4, 8], Distribution::Normal(0.0, 1.0), &device);
        let diff: f32 = (saved.forward(x.clone()) - loaded.forward(x))
            .abs()
            .max()
            .into_scalar();
        assert!(diff < 1e-7);
    }

    #[test]
    fn test_missing_file_is_a_recorder_error() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();

        let module: Linear<TestBackend> = LinearConfig::new(2, 2).init(&device);
        let err = load_module(module, &dir.path().join("absent"), &device).unwrap_err();
        assert!(matches!(err, BrainError::Recorder(_)));
    }
}
