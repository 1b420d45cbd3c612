//! Single-consumer camera lease.
//!
//! One [`SharedCamera`] is created per process and cloned into every
//! component that needs video. Only one [`CameraLease`] can be live at a
//! time; a second acquire fails fast with [`CameraError::DeviceBusy`].
//! Dropping the lease stops the stream before the slot is freed.

use crate::camera::{CameraDevice, CameraError, CameraRequest, VideoStream};
use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Camera handle shared by all consumers in the process.
#[derive(Clone)]
pub struct SharedCamera {
    device: Arc<dyn CameraDevice>,
    held: Arc<AtomicBool>,
}

impl SharedCamera {
    pub fn new(device: Arc<dyn CameraDevice>) -> Self {
        Self {
            device,
            held: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether some consumer currently holds the camera.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Open the camera for exclusive use.
    pub async fn acquire(&self, request: &CameraRequest) -> Result<CameraLease, CameraError> {
        if self
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("camera acquire refused: already leased");
            return Err(CameraError::DeviceBusy);
        }

        // Frees the slot if opening fails or this future is dropped mid-open.
        let mut slot = Slot {
            held: Arc::clone(&self.held),
            armed: true,
        };
        let stream = self.device.open(request).await?;
        slot.armed = false;

        tracing::debug!(width = request.width, height = request.height, "camera leased");
        Ok(CameraLease {
            stream,
            held: Arc::clone(&self.held),
        })
    }
}

struct Slot {
    held: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.armed {
            self.held.store(false, Ordering::Release);
        }
    }
}

/// Exclusive access to an open camera stream.
pub struct CameraLease {
    stream: Box<dyn VideoStream>,
    held: Arc<AtomicBool>,
}

impl CameraLease {
    pub async fn grab(&mut self) -> Result<Frame, CameraError> {
        self.stream.grab().await
    }

    /// Stop the stream and give the camera back.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        self.stream.stop();
        self.held.store(false, Ordering::Release);
        tracing::debug!("camera lease released");
    }
}
