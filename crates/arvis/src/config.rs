//! Persisted calibration and board parameters.
//!
//! The JSON files mirror the fields written by the calibration tools:
//!
//! ```json
//! {
//!   "image_size": [640, 480],
//!   "camera_matrix": [[500.0, 0.0, 320.0], [0.0, 500.0, 240.0], [0.0, 0.0, 1.0]],
//!   "dist_coeffs": [0.1, -0.05, 0.0, 0.0, 0.0]
//! }
//! ```
//!
//! Loading validates the values once and converts them into the types used by
//! the per-frame code. Any failure here is a configuration error and should stop
//! the enclosing pipeline.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use arvis_3d::camera::{CameraError, Intrinsics};
use arvis_3d::stereo::{StereoError, StereoRig};
use arvis_image::ImageSize;
use arvis_imgproc::calibration::distortion::PolynomialDistortion;
use arvis_marker::{
    CheckerboardBoard, FiducialBoard, FiducialGeometry, IdPool, MarkerBoard, MarkerDictionary,
    MarkerError,
};
use glam::{DMat3, DVec3};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading or writing the file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The file is not valid JSON for the expected structure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The camera matrix is not an upper triangular pinhole matrix.
    #[error("Invalid camera matrix: {0}")]
    InvalidCameraMatrix(&'static str),

    /// The number of distortion coefficients is not 4, 5 or 8.
    #[error("Unsupported number of distortion coefficients: {0}")]
    InvalidDistortion(usize),

    /// The intrinsics are rejected by the camera model.
    #[error(transparent)]
    Camera(#[from] CameraError),

    /// The stereo extrinsics are rejected.
    #[error(transparent)]
    Stereo(#[from] StereoError),

    /// The board cannot be laid out.
    #[error(transparent)]
    Marker(#[from] MarkerError),
}

/// Row-major 3x3 matrix as stored on disk.
pub type Matrix3Rows = [[f64; 3]; 3];

fn intrinsics_from_matrix(k: &Matrix3Rows, image_size: [usize; 2]) -> Result<Intrinsics, ConfigError> {
    if k[1][0] != 0.0 || k[2][0] != 0.0 || k[2][1] != 0.0 {
        return Err(ConfigError::InvalidCameraMatrix("the lower triangle must be zero"));
    }
    if k[2][2] != 1.0 {
        return Err(ConfigError::InvalidCameraMatrix("the last entry must be 1"));
    }
    if k[0][1] != 0.0 {
        log::warn!("ignoring camera matrix skew {}", k[0][1]);
    }
    let size = ImageSize {
        width: image_size[0],
        height: image_size[1],
    };
    Ok(Intrinsics::new(k[0][0], k[1][1], k[0][2], k[1][2], size)?)
}

fn matrix_from_intrinsics(k: &Intrinsics) -> Matrix3Rows {
    [[k.fx, 0.0, k.cx], [0.0, k.fy, k.cy], [0.0, 0.0, 1.0]]
}

fn distortion_from_coeffs(coeffs: &[f64]) -> Result<Option<PolynomialDistortion>, ConfigError> {
    if coeffs.is_empty() {
        return Ok(None);
    }
    let distortion =
        PolynomialDistortion::from_coeffs(coeffs).ok_or(ConfigError::InvalidDistortion(coeffs.len()))?;
    Ok((!distortion.is_identity()).then_some(distortion))
}

fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn write_json<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

/// Intrinsic calibration of a single camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    /// Image `[width, height]` in pixels.
    pub image_size: [usize; 2],
    /// The 3x3 camera matrix, row-major.
    pub camera_matrix: Matrix3Rows,
    /// Distortion coefficients `k1, k2, p1, p2[, k3[, k4, k5, k6]]`.
    #[serde(default)]
    pub dist_coeffs: Vec<f64>,
}

impl CameraCalibration {
    /// Store intrinsics and distortion coefficients.
    pub fn new(intrinsics: &Intrinsics, dist_coeffs: Vec<f64>) -> Self {
        Self {
            image_size: [intrinsics.width, intrinsics.height],
            camera_matrix: matrix_from_intrinsics(intrinsics),
            dist_coeffs,
        }
    }

    /// Parse from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Read from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read_json(path)
    }

    /// Write to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        write_json(self, path)
    }

    /// The validated pinhole intrinsics.
    pub fn intrinsics(&self) -> Result<Intrinsics, ConfigError> {
        intrinsics_from_matrix(&self.camera_matrix, self.image_size)
    }

    /// The lens distortion, `None` when absent or all zero.
    pub fn distortion(&self) -> Result<Option<PolynomialDistortion>, ConfigError> {
        distortion_from_coeffs(&self.dist_coeffs)
    }
}

/// Calibration of a stereo pair, `x_right = R·x_left + t`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoCalibration {
    /// Image `[width, height]` shared by both cameras.
    pub image_size: [usize; 2],
    /// Left camera matrix, row-major.
    pub camera_matrix_left: Matrix3Rows,
    /// Left distortion coefficients.
    #[serde(default)]
    pub dist_coeffs_left: Vec<f64>,
    /// Right camera matrix, row-major.
    pub camera_matrix_right: Matrix3Rows,
    /// Right distortion coefficients.
    #[serde(default)]
    pub dist_coeffs_right: Vec<f64>,
    /// Rotation from the left to the right camera, row-major.
    pub rotation_matrix: Matrix3Rows,
    /// Translation from the left to the right camera, in meters.
    pub translation_vector: [f64; 3],
}

impl StereoCalibration {
    /// Store the calibration of both cameras and their relative pose.
    pub fn new(
        left: &Intrinsics,
        dist_coeffs_left: Vec<f64>,
        right: &Intrinsics,
        dist_coeffs_right: Vec<f64>,
        rotation: &DMat3,
        translation: DVec3,
    ) -> Self {
        Self {
            image_size: [left.width, left.height],
            camera_matrix_left: matrix_from_intrinsics(left),
            dist_coeffs_left,
            camera_matrix_right: matrix_from_intrinsics(right),
            dist_coeffs_right,
            rotation_matrix: rotation.transpose().to_cols_array_2d(),
            translation_vector: translation.to_array(),
        }
    }

    /// Parse from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Read from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read_json(path)
    }

    /// Write to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        write_json(self, path)
    }

    /// Validate and build the stereo rig.
    pub fn rig(&self) -> Result<StereoRig, ConfigError> {
        let left = intrinsics_from_matrix(&self.camera_matrix_left, self.image_size)?;
        let right = intrinsics_from_matrix(&self.camera_matrix_right, self.image_size)?;
        // rows on disk, glam stores columns
        let rotation = DMat3::from_cols_array_2d(&self.rotation_matrix).transpose();
        let rig = StereoRig::new(
            left,
            right,
            distortion_from_coeffs(&self.dist_coeffs_left)?,
            distortion_from_coeffs(&self.dist_coeffs_right)?,
            rotation,
            DVec3::from_array(self.translation_vector),
        )?;
        Ok(rig)
    }
}

fn default_dictionary() -> String {
    MarkerDictionary::default().to_string()
}

fn default_pixels_per_block() -> usize {
    16
}

/// Description of a tracked board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoardConfig {
    /// A grid of fiducial markers.
    Fiducial {
        /// Marker side length in meters.
        cell_size_m: f64,
        /// Markers per row.
        grid_width: usize,
        /// Markers per column.
        grid_height: usize,
        /// Dictionary name such as `DICT_6X6_250`.
        #[serde(default = "default_dictionary")]
        dictionary: String,
        /// Pixels per marker block in the printed board.
        #[serde(default = "default_pixels_per_block")]
        pixels_per_block: usize,
        /// Marker ids in row-major order, the whole dictionary when absent.
        #[serde(default)]
        ids: Option<Vec<u32>>,
    },
    /// A checkerboard.
    Checkerboard {
        /// Square side length in meters.
        cell_size_m: f64,
        /// Squares per row.
        cols: usize,
        /// Squares per column.
        rows: usize,
    },
}

impl BoardConfig {
    /// Parse from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Read from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read_json(path)
    }

    /// Lay out the board.
    pub fn build(&self) -> Result<MarkerBoard, ConfigError> {
        let board = match self {
            BoardConfig::Fiducial {
                cell_size_m,
                grid_width,
                grid_height,
                dictionary,
                pixels_per_block,
                ids,
            } => {
                let dictionary: MarkerDictionary = dictionary.parse()?;
                let pool = match ids {
                    Some(ids) => IdPool::new(ids.clone()),
                    None => IdPool::from_dictionary(dictionary),
                };
                if let Some(&id) = pool.as_slice().iter().find(|id| **id as usize >= dictionary.capacity()) {
                    log::warn!("marker id {id} is outside of {dictionary}");
                }
                let geometry = FiducialGeometry {
                    dictionary,
                    pixels_per_block: *pixels_per_block,
                };
                MarkerBoard::Fiducial(FiducialBoard::new(
                    *cell_size_m,
                    *grid_width,
                    *grid_height,
                    &pool,
                    geometry,
                )?)
            }
            BoardConfig::Checkerboard {
                cell_size_m,
                cols,
                rows,
            } => MarkerBoard::Checkerboard(CheckerboardBoard::new(*cell_size_m, *cols, *rows)?),
        };
        Ok(board)
    }
}
