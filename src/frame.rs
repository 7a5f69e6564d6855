use crate::error::{Error, Result};

use std::io::Cursor;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

/// One encoded still image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Still {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl Still {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self { bytes, media_type: media_type.into() }
    }

    pub fn from_jpeg(image: &DynamicImage, quality: u8) -> Result<Self> {
        let mut cursor = Cursor::new(Vec::new());
        let mut encoder = JpegEncoder::new_with_quality(&mut cursor, quality);
        encoder.encode_image(&image.to_rgb8())?;
        Ok(Self::new(cursor.into_inner(), "image/jpeg"))
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        image::load_from_memory(&self.bytes).map_err(Error::from)
    }

    /// Re-encodes as PNG, resized to `size` when given and different.
    pub fn to_png(&self, size: Option<(u32, u32)>) -> Result<Vec<u8>> {
        let mut image = self.decode()?;
        if let Some((width, height)) = size {
            if image.width() != width || image.height() != height {
                image = image.resize_exact(width, height, FilterType::Lanczos3);
            }
        }
        let mut cursor = Cursor::new(Vec::new());
        image.write_to(&mut cursor, ImageFormat::Png)?;
        Ok(cursor.into_inner())
    }

    pub fn extension(&self) -> &str {
        ImageFormat::from_mime_type(&self.media_type)
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("bin")
    }
}

/// A sampled still plus its edited counterpart once the remote call succeeded.
#[derive(Clone, Debug)]
pub struct Frame {
    pub id: usize,
    pub original: Still,
    pub processed: Option<Still>,
}

impl Frame {
    pub fn new(id: usize, original: Still) -> Self {
        Self { id, original, processed: None }
    }

    pub fn is_processed(&self) -> bool {
        self.processed.is_some()
    }
}
