//! Uploaded image handle.
//!
//! Only the header is decoded: the format picks the multipart MIME type and
//! the dimensions let the gateway turn pixel boxes into fractions.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use image::{ImageFormat, ImageReader};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("empty image")]
    Empty,
    #[error("unrecognized image format")]
    UnknownFormat,
    #[error("failed to read image header: {0}")]
    Header(#[from] image::ImageError),
}

/// An image the user picked for searching. Cheap to clone.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    file_name: String,
    format: ImageFormat,
    width: u32,
    height: u32,
    bytes: Arc<[u8]>,
}

impl UploadedImage {
    /// Sniff format and dimensions from raw bytes.
    pub fn from_bytes(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }

        let reader = ImageReader::new(Cursor::new(bytes.as_slice()))
            .with_guessed_format()
            .map_err(|e| ImageError::Header(image::ImageError::IoError(e)))?;
        let format = reader.format().ok_or(ImageError::UnknownFormat)?;
        let (width, height) = reader.into_dimensions()?;

        Ok(Self {
            file_name: file_name.into(),
            format,
            width,
            height,
            bytes: bytes.into(),
        })
    }

    /// Read an image file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ImageError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let image = Self::from_bytes(file_name, bytes)?;
        tracing::debug!(
            path = %path.display(),
            format = ?image.format,
            width = image.width,
            height = image.height,
            size = image.len(),
            "image loaded"
        );
        Ok(image)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Metadata a renderer can show in place of the picture itself.
    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            file_name: self.file_name.clone(),
            mime_type: self.mime_type(),
            width: self.width,
            height: self.height,
            size: self.len(),
        }
    }
}

/// Preview reference for an uploaded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub file_name: String,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub size: usize,
}

/// Encode a small solid PNG. Available to other crates' tests through the
/// `test-util` feature.
#[cfg(any(test, feature = "test-util"))]
pub fn test_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([90, 120, 150]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("encoding a PNG into memory");
    out.into_inner()
}
