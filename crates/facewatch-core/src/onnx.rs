//! [`FaceApi`] backed by SCRFD detection and ArcFace descriptors.
//!
//! Inference is CPU-bound and the ONNX sessions need exclusive access, so
//! each call runs on the blocking pool and serializes on the model lock.

use crate::api::{FaceApi, FaceApiError};
use crate::detector::{ScrfdDetector, SCRFD_MODEL_FILE};
use crate::recognizer::{ArcFaceRecognizer, RecognizerError, ARCFACE_MODEL_FILE};
use crate::types::{BoundingBox, Descriptor, FaceDetection};
use async_trait::async_trait;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

struct Models {
    detector: ScrfdDetector,
    recognizer: ArcFaceRecognizer,
}

impl Models {
    fn detect(&mut self, image: &RgbImage, limit: usize) -> Result<Vec<FaceDetection>, FaceApiError> {
        let boxes = self.detector.detect(image)?;
        let recognizer = &mut self.recognizer;
        Ok(describe_faces(boxes, limit, |bbox| recognizer.extract(image, bbox)))
    }
}

/// Attach a descriptor to each box, best first, up to `limit` faces.
///
/// A box the recognizer cannot describe is skipped; the next box takes
/// its place.
fn describe_faces(
    boxes: Vec<BoundingBox>,
    limit: usize,
    mut extract: impl FnMut(&BoundingBox) -> Result<Descriptor, RecognizerError>,
) -> Vec<FaceDetection> {
    let mut faces = Vec::with_capacity(boxes.len().min(limit));
    for bbox in boxes {
        if faces.len() == limit {
            break;
        }
        match extract(&bbox) {
            Ok(descriptor) => faces.push(FaceDetection { bbox, descriptor }),
            Err(e) => tracing::warn!(error = %e, x = bbox.x, y = bbox.y, "face skipped"),
        }
    }
    faces
}

/// ONNX Runtime face backend. Cheap to clone; clones share the loaded models.
#[derive(Clone, Default)]
pub struct OnnxFaceApi {
    models: Arc<Mutex<Option<Models>>>,
}

impl OnnxFaceApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.models.lock().map(|m| m.is_some()).unwrap_or(false)
    }

    async fn run(&self, image: &RgbImage, limit: usize) -> Result<Vec<FaceDetection>, FaceApiError> {
        let models = Arc::clone(&self.models);
        let image = image.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = models
                .lock()
                .map_err(|_| FaceApiError::Task("model lock poisoned".into()))?;
            let loaded = guard.as_mut().ok_or(FaceApiError::NotLoaded)?;
            loaded.detect(&image, limit)
        })
        .await
        .map_err(|e| FaceApiError::Task(e.to_string()))?
    }
}

#[async_trait]
impl FaceApi for OnnxFaceApi {
    async fn load_models(&self, base_path: &Path) -> Result<(), FaceApiError> {
        let detector_path: PathBuf = base_path.join(SCRFD_MODEL_FILE);
        let recognizer_path: PathBuf = base_path.join(ARCFACE_MODEL_FILE);
        let models = Arc::clone(&self.models);

        tokio::task::spawn_blocking(move || {
            let loaded = Models {
                detector: ScrfdDetector::load(&detector_path)?,
                recognizer: ArcFaceRecognizer::load(&recognizer_path)?,
            };
            let mut guard = models
                .lock()
                .map_err(|_| FaceApiError::Task("model lock poisoned".into()))?;
            *guard = Some(loaded);
            Ok::<_, FaceApiError>(())
        })
        .await
        .map_err(|e| FaceApiError::Task(e.to_string()))??;

        tracing::info!(path = %base_path.display(), "face models loaded");
        Ok(())
    }

    async fn detect_single_face(
        &self,
        image: &RgbImage,
    ) -> Result<Option<FaceDetection>, FaceApiError> {
        Ok(self.run(image, 1).await?.into_iter().next())
    }

    async fn detect_all_faces(&self, image: &RgbImage) -> Result<Vec<FaceDetection>, FaceApiError> {
        self.run(image, usize::MAX).await
    }
}
