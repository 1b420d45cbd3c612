//! In-process camera that plays back still images.
//!
//! Used for headless runs and tests. Each grab returns the next queued
//! image; the last one repeats once the queue is drained.

use crate::camera::{CameraDevice, CameraError, CameraRequest, VideoStream};
use crate::frame::Frame;
use async_trait::async_trait;
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Inner {
    frames: Mutex<VecDeque<RgbImage>>,
    open_error: Mutex<Option<CameraError>>,
    last_request: Mutex<Option<CameraRequest>>,
    active: AtomicUsize,
    sequence: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MockCamera {
    inner: Arc<Inner>,
}

impl MockCamera {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        let cam = Self::default();
        cam.set_frames(frames);
        cam
    }

    /// A camera whose next open fails with `err`.
    pub fn failing(err: CameraError) -> Self {
        let cam = Self::default();
        if let Ok(mut slot) = cam.inner.open_error.lock() {
            *slot = Some(err);
        }
        cam
    }

    /// Replace the playback queue.
    pub fn set_frames(&self, frames: Vec<RgbImage>) {
        if let Ok(mut queue) = self.inner.frames.lock() {
            *queue = frames.into();
        }
    }

    /// Number of streams opened and not yet stopped.
    pub fn active_streams(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn last_request(&self) -> Option<CameraRequest> {
        self.inner.last_request.lock().ok().and_then(|r| *r)
    }

    fn next_frame(&self) -> Option<RgbImage> {
        let mut queue = self.inner.frames.lock().ok()?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl CameraDevice for MockCamera {
    async fn open(&self, request: &CameraRequest) -> Result<Box<dyn VideoStream>, CameraError> {
        if let Some(err) = self.inner.open_error.lock().ok().and_then(|mut e| e.take()) {
            return Err(err);
        }
        if let Ok(mut last) = self.inner.last_request.lock() {
            *last = Some(*request);
        }
        self.inner.active.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MockStream {
            camera: self.clone(),
            stopped: false,
        }))
    }
}

struct MockStream {
    camera: MockCamera,
    stopped: bool,
}

#[async_trait]
impl VideoStream for MockStream {
    async fn grab(&mut self) -> Result<Frame, CameraError> {
        if self.stopped {
            return Err(CameraError::Stopped);
        }
        let image = self
            .camera
            .next_frame()
            .ok_or_else(|| CameraError::CaptureFailed("no frames queued".into()))?;
        let seq = self.camera.inner.sequence.fetch_add(1, Ordering::AcqRel) as u32;
        Ok(Frame::from_image(image, seq))
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.camera.inner.active.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.stop();
    }
}
