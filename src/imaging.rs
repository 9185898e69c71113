// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Image payloads sent to the vision model

use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::path::Path;
use tracing::{debug, warn};

use crate::Result;

/// MIME type assumed when the bytes and the file name say nothing
const FALLBACK_MIME: &str = "image/jpeg";

/// Raw image bytes plus their MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    /// Wrap bytes, sniffing the format from content first and the file name second
    pub fn from_bytes(bytes: Vec<u8>, name_hint: Option<&Path>) -> Self {
        let mime_type = image::guess_format(&bytes)
            .ok()
            .or_else(|| name_hint.and_then(|p| ImageFormat::from_path(p).ok()))
            .map(|f| f.to_mime_type().to_string())
            .unwrap_or_else(|| FALLBACK_MIME.to_string());

        Self { mime_type, bytes }
    }

    /// Parse a `data:<mime>;base64,<data>` URL as stored in the archive
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (meta, data) = rest.split_once(',')?;
        let mime_type = meta.strip_suffix(";base64")?;
        let bytes = general_purpose::STANDARD.decode(data.trim()).ok()?;
        Some(Self {
            mime_type: if mime_type.is_empty() { FALLBACK_MIME.to_string() } else { mime_type.to_string() },
            bytes,
        })
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Shrink large photos before upload.
    ///
    /// Images wider or taller than `max_dimension` are resized and re-encoded
    /// as JPEG. Anything that fails to decode goes out unchanged.
    pub fn prepare_for_upload(&self, max_dimension: u32) -> ImagePayload {
        match self.downscale(max_dimension) {
            Ok(Some(resized)) => resized,
            Ok(None) => self.clone(),
            Err(e) => {
                warn!("Cannot decode image for resizing, sending raw bytes: {}", e);
                self.clone()
            }
        }
    }

    fn downscale(&self, max_dimension: u32) -> Result<Option<ImagePayload>> {
        let img = image::load_from_memory(&self.bytes)?;
        let (width, height) = img.dimensions();
        if width <= max_dimension && height <= max_dimension {
            return Ok(None);
        }

        debug!("Resizing {}x{} image to fit {}px", width, height, max_dimension);
        let img = img.resize(max_dimension, max_dimension, image::imageops::FilterType::Triangle);

        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);
        rgb.write_to(&mut cursor, ImageFormat::Jpeg)?;

        Ok(Some(ImagePayload {
            mime_type: ImageFormat::Jpeg.to_mime_type().to_string(),
            bytes: buffer,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::path::PathBuf;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 30, 30, 255]));
        let mut buffer = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn test_mime_from_content_beats_extension() {
        let payload = ImagePayload::from_bytes(png_bytes(4, 4), Some(&PathBuf::from("stamp.jpg")));
        assert_eq!(payload.mime_type, "image/png");
    }

    #[test]
    fn test_mime_from_extension_and_fallback() {
        let by_name = ImagePayload::from_bytes(vec![1, 2, 3], Some(&PathBuf::from("scan.webp")));
        assert_eq!(by_name.mime_type, "image/webp");

        let unknown = ImagePayload::from_bytes(vec![1, 2, 3], None);
        assert_eq!(unknown.mime_type, "image/jpeg");
    }

    #[test]
    fn test_data_url_round_trip() {
        let payload = ImagePayload::from_bytes(png_bytes(2, 2), None);
        let url = payload.to_data_url();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(ImagePayload::from_data_url(&url), Some(payload));
        assert_eq!(ImagePayload::from_data_url("not a data url"), None);
    }

    #[test]
    fn test_large_image_is_downscaled_to_jpeg() {
        let payload = ImagePayload::from_bytes(png_bytes(2048, 512), None);
        let prepared = payload.prepare_for_upload(1024);

        assert_eq!(prepared.mime_type, "image/jpeg");
        let decoded = image::load_from_memory(&prepared.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (1024, 256));
    }

    #[test]
    fn test_small_or_undecodable_image_unchanged() {
        let small = ImagePayload::from_bytes(png_bytes(64, 64), None);
        assert_eq!(small.prepare_for_upload(1024), small);

        let junk = ImagePayload::from_bytes(b"not an image".to_vec(), None);
        assert_eq!(junk.prepare_for_upload(1024), junk);
    }
}
