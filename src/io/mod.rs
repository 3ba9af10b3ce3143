//! YAML loading of parameter and calibration files.

pub mod calibration;

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

pub use calibration::load_stereo_camera;

/// Reads a parameter struct (`TrackerParams`, `LcdParams`, ...) from YAML.
/// Missing fields take their defaults.
pub fn load_params<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    serde_yaml::from_reader(file).with_context(|| format!("Failed to parse {:?}", path))
}
