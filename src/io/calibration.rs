use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use nalgebra::Matrix4;
use serde::Deserialize;

use crate::geometry::SE3;
use crate::tracking::CameraModel;

/// `T_BS` block: row-major 4x4 body_T_sensor.
#[derive(Debug, Deserialize)]
struct TransformYaml {
    data: Vec<f64>,
}

/// Rectified stereo calibration file.
#[derive(Debug, Deserialize)]
struct StereoCameraYaml {
    /// [fx, fy, cx, cy]
    intrinsics: Vec<f64>,
    baseline: f64,
    #[serde(rename = "T_BS", default)]
    t_bs: Option<TransformYaml>,
}

/// Loads the rectified left camera model and its `body_T_cam` extrinsic
/// (identity when `T_BS` is absent).
pub fn load_stereo_camera<P: AsRef<Path>>(path: P) -> Result<(CameraModel, SE3)> {
    let path = path.as_ref();
    let yaml: StereoCameraYaml =
        serde_yaml::from_reader(File::open(path).with_context(|| format!("Failed to open {:?}", path))?)
            .with_context(|| format!("Failed to parse {:?}", path))?;

    let camera = camera_from(&yaml.intrinsics, yaml.baseline)?;
    let body_t_cam = match &yaml.t_bs {
        Some(t) => transform_from(&t.data)?,
        None => SE3::identity(),
    };
    Ok((camera, body_t_cam))
}

fn camera_from(intrinsics: &[f64], baseline: f64) -> Result<CameraModel> {
    if intrinsics.len() != 4 {
        bail!("Expected 4 intrinsics [fx, fy, cx, cy], got {}", intrinsics.len());
    }
    if baseline <= 0.0 {
        bail!("Stereo baseline must be positive, got {}", baseline);
    }
    Ok(CameraModel::new(
        intrinsics[0],
        intrinsics[1],
        intrinsics[2],
        intrinsics[3],
        baseline,
    ))
}

fn transform_from(data: &[f64]) -> Result<SE3> {
    if data.len() != 16 {
        bail!("Expected 16 elements for transform, got {}", data.len());
    }
    Ok(SE3::from_matrix(Matrix4::from_row_slice(data)))
}
