//! Signature raster handling.
//!
//! A signature arrives as a base64 PNG (optionally a `data:image/png;base64,`
//! URL). It must contain ink: at least one pixel that is not transparent and
//! not paper-white. A cleared canvas, transparent or white-filled, is blank.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

/// Upper bound on the decoded PNG size.
pub const MAX_SIGNATURE_BYTES: usize = 2 * 1024 * 1024;

/// Channel value at or above which an opaque pixel counts as paper.
const PAPER_THRESHOLD: u8 = 245;

const DATA_URL_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("signature image is blank")]
    Blank,
    #[error("signature image is not valid base64: {0}")]
    Encoding(String),
    #[error("signature image is not a PNG: {0}")]
    NotPng(String),
    #[error("signature image exceeds {max} bytes")]
    TooLarge { max: usize },
}

/// Decoded signature artifact with its original PNG bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureImage {
    png: Vec<u8>,
    width: u32,
    height: u32,
}

impl SignatureImage {
    /// Decode a base64 PNG or PNG data URL and reject blank canvases.
    pub fn from_base64(encoded: &str) -> Result<Self, ImageError> {
        let trimmed = encoded.trim();
        let payload = trimmed.strip_prefix(DATA_URL_PREFIX).unwrap_or(trimmed);
        if payload.is_empty() {
            return Err(ImageError::Blank);
        }
        if payload.len() / 4 * 3 > MAX_SIGNATURE_BYTES + 3 {
            return Err(ImageError::TooLarge {
                max: MAX_SIGNATURE_BYTES,
            });
        }
        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| ImageError::Encoding(e.to_string()))?;
        Self::from_png(bytes)
    }

    pub fn from_png(png: Vec<u8>) -> Result<Self, ImageError> {
        if png.len() > MAX_SIGNATURE_BYTES {
            return Err(ImageError::TooLarge {
                max: MAX_SIGNATURE_BYTES,
            });
        }
        let (width, height, inked) = scan_png(&png)?;
        if !inked {
            return Err(ImageError::Blank);
        }
        Ok(Self { png, width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_png(&self) -> &[u8] {
        &self.png
    }

    pub fn into_png(self) -> Vec<u8> {
        self.png
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.png)
    }
}

/// Decode to 8-bit samples and report whether any pixel carries ink.
fn scan_png(bytes: &[u8]) -> Result<(u32, u32, bool), ImageError> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::normalize_to_color8());
    let mut reader = decoder
        .read_info()
        .map_err(|e| ImageError::NotPng(e.to_string()))?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let frame = reader
        .next_frame(&mut buf)
        .map_err(|e| ImageError::NotPng(e.to_string()))?;
    let pixels = &buf[..frame.buffer_size()];

    let inked = match frame.color_type {
        png::ColorType::Rgba => pixels
            .chunks_exact(4)
            .any(|p| p[3] > 0 && p[..3].iter().any(|&c| c < PAPER_THRESHOLD)),
        png::ColorType::Rgb => pixels
            .chunks_exact(3)
            .any(|p| p.iter().any(|&c| c < PAPER_THRESHOLD)),
        png::ColorType::GrayscaleAlpha => pixels
            .chunks_exact(2)
            .any(|p| p[1] > 0 && p[0] < PAPER_THRESHOLD),
        png::ColorType::Grayscale => pixels.iter().any(|&g| g < PAPER_THRESHOLD),
        png::ColorType::Indexed => {
            return Err(ImageError::NotPng(
                "palette image was not expanded".to_string(),
            ))
        }
    };
    Ok((frame.width, frame.height, inked))
}
