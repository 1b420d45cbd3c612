//! facewatch-core: Face detection capability, descriptors and matching.
//!
//! The application flows depend on the [`FaceApi`] trait and the
//! [`FaceMatcher`]; [`OnnxFaceApi`] is the bundled implementation using
//! SCRFD for detection and ArcFace for descriptors.

pub mod api;
pub mod data_url;
pub mod detector;
pub mod matcher;
pub mod onnx;
pub mod recognizer;
pub mod types;

pub use api::{FaceApi, FaceApiError};
pub use data_url::{DataUrl, DataUrlError};
pub use matcher::{BestMatch, FaceMatcher, DEFAULT_DISTANCE_THRESHOLD, UNKNOWN_LABEL};
pub use onnx::OnnxFaceApi;
pub use types::{BoundingBox, Descriptor, FaceDetection, LabeledDescriptors};
