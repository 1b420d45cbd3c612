//! facewatch-app: Enrollment, live recognition and roster flows.
//!
//! The flows share one [`UserStore`](facewatch_store::UserStore), one
//! [`SharedCamera`](facewatch_hw::SharedCamera) and one [`EventBus`].
//! Enrollment and roster publish [`RosterEvent`]s after their writes
//! complete; [`spawn_reload_listener`] forwards them to the views.

pub mod config;
pub mod enrollment;
pub mod error;
pub mod events;
pub mod recognition;
pub mod roster;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigError};
pub use enrollment::{CaptureMode, EnrollmentController, EnrollmentSession};
pub use error::{EnrollmentError, RecognitionError, ReloadError, RosterError};
pub use events::{spawn_reload_listener, EventBus, Reload, RosterEvent};
pub use recognition::{
    build_labeled_descriptors, scan_frame, FaceOverlay, OverlaySink, RecognitionView,
};
pub use roster::{Confirmation, RosterView, UserRecord};
