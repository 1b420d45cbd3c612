//! Camera device abstraction and V4L2 capture via the `v4l` crate.

use crate::frame::{self, Frame};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("stream stopped")]
    Stopped,
}

/// Video-only capture request. Audio is never opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraRequest {
    pub width: u32,
    pub height: u32,
}

impl Default for CameraRequest {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// A camera that can be opened into a live stream.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    async fn open(&self, request: &CameraRequest) -> Result<Box<dyn VideoStream>, CameraError>;
}

/// A live video stream. Dropping or stopping it releases the device.
#[async_trait]
pub trait VideoStream: Send {
    /// Grab the current frame.
    async fn grab(&mut self) -> Result<Frame, CameraError>;

    /// Stop all tracks. Further grabs fail with [`CameraError::Stopped`].
    fn stop(&mut self);
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion JPEG, one JPEG per buffer.
    Mjpeg,
}

/// V4L2 camera identified by device path (e.g. "/dev/video0").
#[derive(Debug, Clone)]
pub struct V4lCamera {
    device_path: String,
}

impl V4lCamera {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

#[async_trait]
impl CameraDevice for V4lCamera {
    async fn open(&self, request: &CameraRequest) -> Result<Box<dyn VideoStream>, CameraError> {
        let path = self.device_path.clone();
        let request = *request;
        let stream = tokio::task::spawn_blocking(move || V4lStream::open(&path, request))
            .await
            .map_err(|e| CameraError::CaptureFailed(format!("open task failed: {e}")))??;
        Ok(Box::new(stream))
    }
}

struct V4lStream {
    device: Option<Arc<Device>>,
    device_path: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl V4lStream {
    fn open(device_path: &str, request: CameraRequest) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| map_open_error(device_path, e))?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = request.width;
        fmt.height = request.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = if negotiated.fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if negotiated.fourcc == FourCC::new(b"MJPG") {
            PixelFormat::Mjpeg
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV or MJPG)",
                negotiated.fourcc
            )));
        };

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "camera opened"
        );

        Ok(Self {
            device: Some(Arc::new(device)),
            device_path: device_path.to_string(),
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        })
    }
}

fn capture_one(
    device: &Device,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
) -> Result<Frame, CameraError> {
    let mut stream = MmapStream::with_buffers(device, BufType::VideoCapture, 4)
        .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

    let (buf, meta) = stream
        .next()
        .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

    let data = match pixel_format {
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height),
        PixelFormat::Mjpeg => frame::mjpeg_to_rgb(buf, width, height),
    }
    .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;

    Ok(Frame {
        data,
        width,
        height,
        timestamp: std::time::Instant::now(),
        sequence: meta.sequence,
    })
}

#[async_trait]
impl VideoStream for V4lStream {
    async fn grab(&mut self) -> Result<Frame, CameraError> {
        let device = self.device.clone().ok_or(CameraError::Stopped)?;
        let (width, height, format) = (self.width, self.height, self.pixel_format);
        tokio::task::spawn_blocking(move || capture_one(&device, width, height, format))
            .await
            .map_err(|e| CameraError::CaptureFailed(format!("capture task failed: {e}")))?
    }

    fn stop(&mut self) {
        if self.device.take().is_some() {
            tracing::info!(device = %self.device_path, "camera stream stopped");
        }
    }
}

impl Drop for V4lStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn map_open_error(device_path: &str, e: io::Error) -> CameraError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        CameraError::PermissionDenied(device_path.to_string())
    } else if e.raw_os_error() == Some(EBUSY) {
        CameraError::DeviceBusy
    } else {
        CameraError::DeviceNotFound(format!("{device_path}: {e}"))
    }
}
