//! The face-recognition capability consumed by the application flows.
//!
//! Detection, landmarking and descriptor computation are a black box behind
//! [`FaceApi`]. Matching lives in [`crate::matcher`].

use crate::detector::DetectorError;
use crate::recognizer::RecognizerError;
use crate::types::FaceDetection;
use async_trait::async_trait;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaceApiError {
    #[error("face models are not loaded")]
    NotLoaded,
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("inference task failed: {0}")]
    Task(String),
}

/// Face detection and description over still images and video frames.
///
/// Implementations must be safe to call concurrently from several tasks.
#[async_trait]
pub trait FaceApi: Send + Sync {
    /// Load model assets from `base_path`. Must complete before any detection.
    async fn load_models(&self, base_path: &Path) -> Result<(), FaceApiError>;

    /// Detect at most one face (the most confident) and describe it.
    async fn detect_single_face(
        &self,
        image: &RgbImage,
    ) -> Result<Option<FaceDetection>, FaceApiError>;

    /// Detect and describe every face in a frame.
    async fn detect_all_faces(&self, image: &RgbImage) -> Result<Vec<FaceDetection>, FaceApiError>;
}
