//! Self-describing image payloads (`data:<mime>;base64,<bytes>`).
//!
//! Enrolled images are persisted as text, so every image crossing the
//! storage boundary is carried as a [`DataUrl`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageFormat, RgbImage};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use thiserror::Error;

const PNG_MIME: &str = "image/png";

#[derive(Error, Debug)]
pub enum DataUrlError {
    #[error("payload is not a data URL")]
    MissingScheme,
    #[error("data URL is not base64-encoded")]
    NotBase64,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unrecognized image format")]
    UnknownFormat,
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

/// An image payload together with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    mime: String,
    bytes: Vec<u8>,
}

impl DataUrl {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    /// Encode a still frame as PNG.
    pub fn from_rgb_png(image: &RgbImage) -> Result<Self, DataUrlError> {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(Self::new(PNG_MIME, bytes))
    }

    /// Wrap already-encoded image bytes, e.g. an uploaded file.
    ///
    /// The format is sniffed from the content and the bytes must decode.
    pub fn from_encoded(bytes: Vec<u8>) -> Result<Self, DataUrlError> {
        let format = image::guess_format(&bytes).map_err(|_| DataUrlError::UnknownFormat)?;
        image::load_from_memory_with_format(&bytes, format)?;
        Ok(Self::new(format.to_mime_type(), bytes))
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decode the payload into an RGB image for the detector.
    pub fn decode_image(&self) -> Result<RgbImage, DataUrlError> {
        Ok(image::load_from_memory(&self.bytes)?.to_rgb8())
    }
}

impl fmt::Display for DataUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

impl FromStr for DataUrl {
    type Err = DataUrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix("data:").ok_or(DataUrlError::MissingScheme)?;
        let (header, payload) = rest.split_once(',').ok_or(DataUrlError::MissingScheme)?;
        let mime = header.strip_suffix(";base64").ok_or(DataUrlError::NotBase64)?;
        let bytes = STANDARD.decode(payload)?;
        Ok(Self::new(mime, bytes))
    }
}
