//! Enrollment: collect three face images and a name, then persist them.
//!
//! An [`EnrollmentSession`] holds the transient dialog state. Images come
//! from the camera (one accepted frame per capture) or from files. Nothing
//! is written until [`EnrollmentSession::submit`] has validated all three.

use crate::error::EnrollmentError;
use crate::events::{EventBus, RosterEvent};
use facewatch_core::{DataUrl, FaceApi};
use facewatch_hw::{CameraError, CameraLease, CameraRequest, SharedCamera};
use facewatch_store::{validate_name, UserStore, IMAGES_PER_USER};
use std::path::PathBuf;
use std::sync::Arc;

/// How images are acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Camera,
    Files,
}

/// Long-lived dependencies; opens one session per dialog.
#[derive(Clone)]
pub struct EnrollmentController {
    api: Arc<dyn FaceApi>,
    users: Arc<UserStore>,
    camera: SharedCamera,
    request: CameraRequest,
    events: EventBus,
}

impl EnrollmentController {
    pub fn new(
        api: Arc<dyn FaceApi>,
        users: Arc<UserStore>,
        camera: SharedCamera,
        request: CameraRequest,
        events: EventBus,
    ) -> Self {
        Self {
            api,
            users,
            camera,
            request,
            events,
        }
    }

    /// Open a session. In camera mode the camera is acquired immediately;
    /// failure to do so is reported through the session's error field.
    pub async fn begin(&self, mode: CaptureMode) -> EnrollmentSession {
        let mut session = EnrollmentSession {
            controller: self.clone(),
            name: String::new(),
            mode: CaptureMode::Files,
            lease: None,
            captured: Vec::new(),
            pending: Vec::new(),
            error: None,
            uploading: false,
        };
        // The error, if any, is kept in the session.
        let _ = session.set_mode(mode).await;
        session
    }
}

pub struct EnrollmentSession {
    controller: EnrollmentController,
    name: String,
    mode: CaptureMode,
    lease: Option<CameraLease>,
    /// Frames accepted in camera mode so far.
    captured: Vec<DataUrl>,
    /// Images that will be submitted; also the previews.
    pending: Vec<DataUrl>,
    error: Option<String>,
    uploading: bool,
}

impl EnrollmentSession {
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn is_camera_active(&self) -> bool {
        self.lease.is_some()
    }

    pub fn captured_count(&self) -> usize {
        self.captured.len()
    }

    pub fn previews(&self) -> &[DataUrl] {
        &self.pending
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading
    }

    /// The message of the most recent failure, cleared by the next success.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Switch input method. Leaving camera mode releases the camera;
    /// entering it acquires the camera.
    pub async fn set_mode(&mut self, mode: CaptureMode) -> Result<(), EnrollmentError> {
        self.mode = mode;
        match mode {
            CaptureMode::Files => {
                self.release_camera();
                Ok(())
            }
            CaptureMode::Camera if self.lease.is_some() => Ok(()),
            CaptureMode::Camera => {
                let request = self.controller.request;
                match self.controller.camera.acquire(&request).await {
                    Ok(lease) => {
                        self.lease = Some(lease);
                        Ok(())
                    }
                    Err(e) => self.fail(e.into()),
                }
            }
        }
    }

    /// Grab the current frame and keep it if it contains a face.
    ///
    /// Returns the number of accepted frames. After the third, the camera
    /// is released and the frames become the pending images.
    pub async fn capture(&mut self) -> Result<usize, EnrollmentError> {
        if self.captured.len() >= IMAGES_PER_USER {
            return Ok(self.captured.len());
        }
        let Some(lease) = self.lease.as_mut() else {
            return self.fail(EnrollmentError::Camera(CameraError::Stopped));
        };

        let frame = match lease.grab().await {
            Ok(frame) => frame,
            Err(e) => return self.fail(e.into()),
        };
        let Some(image) = frame.to_image() else {
            return self.fail(EnrollmentError::Camera(CameraError::CaptureFailed(
                "no decoded frame yet".into(),
            )));
        };

        match self.controller.api.detect_single_face(&image).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::debug!(seq = frame.sequence, "capture rejected: no face");
                return self.fail(EnrollmentError::NoFaceInCapture);
            }
            Err(e) => return self.fail(e.into()),
        }

        let url = match DataUrl::from_rgb_png(&image) {
            Ok(url) => url,
            Err(e) => return self.fail(e.into()),
        };
        self.captured.push(url);
        self.error = None;
        tracing::info!(count = self.captured.len(), "capture accepted");

        if self.captured.len() == IMAGES_PER_USER {
            self.pending = self.captured.clone();
            self.release_camera();
        }
        Ok(self.captured.len())
    }

    /// Use the given files as the pending images.
    ///
    /// More than three files, or an unreadable one, leaves the pending
    /// images untouched.
    pub async fn select_files(&mut self, paths: &[PathBuf]) -> Result<(), EnrollmentError> {
        if paths.len() > IMAGES_PER_USER {
            return self.fail(EnrollmentError::TooManyFiles(paths.len()));
        }

        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = match tokio::fs::read(path).await {
                Ok(bytes) => bytes,
                Err(source) => {
                    return self.fail(EnrollmentError::File {
                        path: path.clone(),
                        source,
                    })
                }
            };
            match DataUrl::from_encoded(bytes) {
                Ok(url) => images.push(url),
                Err(e) => return self.fail(e.into()),
            }
        }
        self.select_images(images)
    }

    /// Use already-encoded images as the pending images.
    pub fn select_images(&mut self, images: Vec<DataUrl>) -> Result<(), EnrollmentError> {
        if images.len() > IMAGES_PER_USER {
            return self.fail(EnrollmentError::TooManyFiles(images.len()));
        }
        self.pending = images;
        self.error = None;
        Ok(())
    }

    /// Validate every pending image, then save the user.
    ///
    /// On success the session resets, the camera is released, and
    /// `UserAdded` then `EnrollmentClosed` are published. On failure nothing
    /// is written and the pending state is kept for another attempt.
    pub async fn submit(&mut self) -> Result<String, EnrollmentError> {
        if self.pending.len() != IMAGES_PER_USER {
            return self.fail(EnrollmentError::WrongImageCount(self.pending.len()));
        }
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return self.fail(EnrollmentError::MissingName);
        }
        if validate_name(&name).is_err() {
            return self.fail(EnrollmentError::InvalidName(name));
        }

        self.uploading = true;
        self.error = None;
        let result = self.validate_and_save(&name).await;
        self.uploading = false;

        if let Err(e) = result {
            tracing::info!(user = %name, error = %e, "enrollment rejected");
            return self.fail(e);
        }

        tracing::info!(user = %name, "enrollment complete");
        self.reset();
        let events = &self.controller.events;
        events.publish(RosterEvent::UserAdded(name.clone()));
        events.publish(RosterEvent::EnrollmentClosed);
        Ok(name)
    }

    async fn validate_and_save(&self, name: &str) -> Result<(), EnrollmentError> {
        let decoded = self
            .pending
            .iter()
            .map(DataUrl::decode_image)
            .collect::<Result<Vec<_>, _>>()?;

        let api = &self.controller.api;
        let results =
            futures::future::join_all(decoded.iter().map(|img| api.detect_single_face(img))).await;
        let mut all_found = true;
        for result in results {
            all_found &= result?.is_some();
        }
        if !all_found {
            return Err(EnrollmentError::NoFaceInSubmission);
        }

        let images: [DataUrl; IMAGES_PER_USER] = self
            .pending
            .clone()
            .try_into()
            .map_err(|v: Vec<DataUrl>| EnrollmentError::WrongImageCount(v.len()))?;
        self.controller.users.save_user(name, &images).await?;
        Ok(())
    }

    /// Discard the session, releasing the camera.
    pub fn close(mut self) {
        self.release_camera();
        self.controller.events.publish(RosterEvent::EnrollmentClosed);
    }

    fn reset(&mut self) {
        self.release_camera();
        self.name.clear();
        self.captured.clear();
        self.pending.clear();
        self.error = None;
    }

    fn release_camera(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.release();
        }
    }

    fn fail<T>(&mut self, err: EnrollmentError) -> Result<T, EnrollmentError> {
        self.error = Some(err.to_string());
        Err(err)
    }
}
