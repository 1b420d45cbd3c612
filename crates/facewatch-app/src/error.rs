use facewatch_core::{DataUrlError, FaceApiError};
use facewatch_hw::CameraError;
use facewatch_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Why an enrollment step was refused. The display text is the message
/// shown to the user.
#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("Please enter a name")]
    MissingName,
    #[error("Names cannot contain '/': {0:?}")]
    InvalidName(String),
    #[error("Please upload exactly 3 images")]
    WrongImageCount(usize),
    #[error("Please select only 3 images")]
    TooManyFiles(usize),
    #[error("Failed to access camera: {0}")]
    Camera(#[from] CameraError),
    #[error("No face detected in the captured image")]
    NoFaceInCapture,
    #[error("One or more images do not contain a detectable face")]
    NoFaceInSubmission,
    #[error("Could not read {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unsupported image: {0}")]
    Image(#[from] DataUrlError),
    #[error("Face detection failed: {0}")]
    Detector(#[from] FaceApiError),
    #[error("Failed to save user: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("detector: {0}")]
    Detector(#[from] FaceApiError),
    #[error("storage: {0}")]
    Storage(#[from] StoreError),
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
}

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("storage: {0}")]
    Storage(#[from] StoreError),
}

/// Failure of a component asked to reload after a roster change.
#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("recognition: {0}")]
    Recognition(#[from] RecognitionError),
    #[error("roster: {0}")]
    Roster(#[from] RosterError),
}
