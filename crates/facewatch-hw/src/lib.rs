//! facewatch-hw: Camera capture and the single-consumer camera lease.
//!
//! Provides a V4L2 camera, a still-image playback camera, and the lease
//! that keeps the device to one consumer at a time.

pub mod camera;
pub mod frame;
pub mod lease;
pub mod mock;

pub use camera::{CameraDevice, CameraError, CameraRequest, PixelFormat, V4lCamera, VideoStream};
pub use frame::Frame;
pub use lease::{CameraLease, SharedCamera};
pub use mock::MockCamera;
