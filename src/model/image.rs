//! In-memory frame representation for the acquisition core's single
//! concern: camera frames handed from the callback to jobs.

use serde::{Deserialize, Serialize};

/// Pixel storage, kept in native bit depth rather than eagerly converting to
/// `f64`: a 2048x2048 U16 frame is 8MB vs 33MB as F64 - material at
/// multi-Hz acquisition rates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PixelBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F64(Vec<f64>),
}

impl PixelBuffer {
    pub fn as_f64(&self) -> std::borrow::Cow<'_, [f64]> {
        use std::borrow::Cow;
        match self {
            PixelBuffer::U8(data) => Cow::Owned(data.iter().map(|&v| v as f64).collect()),
            PixelBuffer::U16(data) => Cow::Owned(data.iter().map(|&v| v as f64).collect()),
            PixelBuffer::F64(data) => Cow::Borrowed(data.as_slice()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::U8(d) => d.len(),
            PixelBuffer::U16(d) => d.len(),
            PixelBuffer::F64(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn memory_bytes(&self) -> usize {
        match self {
            PixelBuffer::U8(d) => d.len(),
            PixelBuffer::U16(d) => d.len() * 2,
            PixelBuffer::F64(d) => d.len() * 8,
        }
    }
}

/// Per-frame hardware metadata, attached alongside `CaptureInfo`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub exposure_ms: Option<f64>,
    pub gain: Option<f64>,
    pub binning: Option<(u32, u32)>,
    pub temperature_c: Option<f64>,
    pub hardware_timestamp_us: Option<i64>,
    pub readout_ms: Option<f64>,
    pub roi_origin: Option<(u32, u32)>,
}

/// A single captured frame, as delivered by the camera callback.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobImage {
    pub width: u32,
    pub height: u32,
    pub pixels: PixelBuffer,
    pub metadata: ImageMetadata,
}

impl JobImage {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}
