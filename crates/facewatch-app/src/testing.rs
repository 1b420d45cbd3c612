//! Test doubles shared by the flow tests.

use async_trait::async_trait;
use facewatch_core::{
    BoundingBox, DataUrl, Descriptor, FaceApi, FaceApiError, FaceDetection,
};
use facewatch_store::{KeyValueStore, MemoryStore, StoreError, WriteBatch};
use image::{Rgb, RgbImage};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Row-0 pixel value that makes [`PixelFaceApi`] fail on the whole image.
pub const FAILING_FACE: [u8; 3] = [1, 1, 1];

/// Face API that reads faces from pixel content.
///
/// Every non-black pixel in row 0 is a face; its RGB value, scaled to
/// [0, 1], is the descriptor. Black images contain no face. An image
/// containing [`FAILING_FACE`] is a detector error.
#[derive(Default)]
pub struct PixelFaceApi {
    pub loads: AtomicUsize,
    pub detections: AtomicUsize,
    pub fail: AtomicBool,
}

impl PixelFaceApi {
    fn faces(&self, image: &RgbImage) -> Result<Vec<FaceDetection>, FaceApiError> {
        self.detections.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(FaceApiError::Task("scripted failure".into()));
        }
        if image.height() == 0 {
            return Ok(Vec::new());
        }
        if (0..image.width()).any(|x| image.get_pixel(x, 0).0 == FAILING_FACE) {
            return Err(FaceApiError::Task("degenerate face crop".into()));
        }
        Ok((0..image.width())
            .filter_map(|x| {
                let Rgb([r, g, b]) = *image.get_pixel(x, 0);
                if (r, g, b) == (0, 0, 0) {
                    return None;
                }
                Some(FaceDetection {
                    bbox: BoundingBox {
                        x: x as f32 * 10.0,
                        y: 0.0,
                        width: 10.0,
                        height: 10.0,
                        confidence: 0.99,
                    },
                    descriptor: Descriptor::new(vec![
                        r as f32 / 255.0,
                        g as f32 / 255.0,
                        b as f32 / 255.0,
                    ]),
                })
            })
            .collect())
    }
}

#[async_trait]
impl FaceApi for PixelFaceApi {
    async fn load_models(&self, _base_path: &Path) -> Result<(), FaceApiError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn detect_single_face(
        &self,
        image: &RgbImage,
    ) -> Result<Option<FaceDetection>, FaceApiError> {
        Ok(self.faces(image)?.into_iter().next())
    }

    async fn detect_all_faces(&self, image: &RgbImage) -> Result<Vec<FaceDetection>, FaceApiError> {
        self.faces(image)
    }
}

/// An image whose row 0 holds one face per color.
pub fn faces_image(colors: &[[u8; 3]]) -> RgbImage {
    let width = colors.len().max(1) as u32;
    let mut img = RgbImage::new(width, 2);
    for (x, c) in colors.iter().enumerate() {
        img.put_pixel(x as u32, 0, Rgb(*c));
    }
    img
}

pub fn blank_image() -> RgbImage {
    RgbImage::new(2, 2)
}

pub fn face_url(color: [u8; 3]) -> DataUrl {
    DataUrl::from_rgb_png(&faces_image(&[color])).unwrap()
}

pub fn blank_url() -> DataUrl {
    DataUrl::from_rgb_png(&blank_image()).unwrap()
}

/// Memory store whose batch writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_writes: AtomicBool,
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.remove(key).await
    }

    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.check()?;
        self.inner.apply(batch).await
    }
}

impl FlakyStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("quota exceeded".into()));
        }
        Ok(())
    }
}
