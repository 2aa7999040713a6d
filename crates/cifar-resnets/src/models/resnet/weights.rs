//! # Saved `ResNet` Weights
//!
//! Best-effort loading of saved model weights.
//!
//! Weights are stored with burn's [`NamedMpkFileRecorder`] at full precision,
//! as ``{dir}/{name}.mpk``. A missing weights file is not an error:
//! [`load_weights`] logs a warning and returns the freshly initialized model.

use crate::models::resnet::resnet_model::ResNet;
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, RecorderError};
use std::path::Path;

/// The default saved weights directory.
pub const DEFAULT_WEIGHTS_DIR: &str = "saved_models";

/// The recorder used for saved weights.
pub type WeightsRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Load saved weights into a model.
///
/// # Arguments
///
/// - `model`: the initialized model; its structure must match the saved record.
/// - `dir`: the weights directory.
/// - `name`: the weights name; the recorder adds the file extension.
/// - `device`: the device to load onto.
///
/// # Returns
///
/// The loaded model; or `model` unchanged, if there is no weights file.
#[tracing::instrument(skip(model, device))]
pub fn load_weights<B: Backend>(
    model: ResNet<B>,
    dir: &Path,
    name: &str,
    device: &B::Device,
) -> anyhow::Result<ResNet<B>> {
    let path = dir.join(name);

    match model.clone().load_file(&path, &WeightsRecorder::new(), device) {
        Ok(model) => {
            tracing::info!(?path, "Loaded weights");
            Ok(model)
        }
        Err(RecorderError::FileNotFound(_)) => {
            tracing::warn!("No weights found for this model!");
            Ok(model)
        }
        Err(err) => Err(anyhow::anyhow!(
            "Failed to load weights from {path:?}: {err:?}"
        )),
    }
}

/// Save model weights as ``{dir}/{name}.mpk``.
///
/// Creates `dir` if needed.
#[tracing::instrument(skip(model))]
pub fn save_weights<B: Backend>(
    model: &ResNet<B>,
    dir: &Path,
    name: &str,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(name);

    model
        .clone()
        .save_file(&path, &WeightsRecorder::new())
        .map_err(|err| anyhow::anyhow!("Failed to save weights to {path:?}: {err:?}"))?;

    tracing::debug!(?path, "Saved weights");
    Ok(())
}
