//! Local camera backed by a frame file
//!
//! The kiosk's camera daemon keeps the latest frame in a single file.
//! Opening that file is the device acquisition; reading it is the snapshot.

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{CaptureDevice, DeviceHandle, LiveFeed, RawFrame};
use crate::error::CaptureError;
use crate::state::data::ImagePayload;

/// JPEG quality used for captured stills
const STILL_JPEG_QUALITY: u8 = 80;

/// Local camera whose live frame is published to a file
#[derive(Debug, Clone)]
pub struct FrameFileDevice {
    path: PathBuf,
}

impl FrameFileDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CaptureDevice for FrameFileDevice {
    fn acquire(&self) -> Result<DeviceHandle, CaptureError> {
        let file = File::open(&self.path).map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => {
                warn!("⚠️  Camera access denied: {}", self.path.display());
                CaptureError::PermissionDenied
            }
            _ => CaptureError::DeviceUnavailable(format!("{}: {}", self.path.display(), e)),
        })?;

        debug!("Opened camera frame file {}", self.path.display());
        Ok(DeviceHandle::new(FrameFileFeed {
            file,
            path: self.path.clone(),
        }))
    }
}

/// Open frame file; closing it releases the camera
struct FrameFileFeed {
    file: File,
    path: PathBuf,
}

impl LiveFeed for FrameFileFeed {
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        let path = self.path.clone();
        let unavailable = move |what: &str, e: &dyn std::fmt::Display| {
            CaptureError::DeviceUnavailable(format!("{} {}: {}", what, path.display(), e))
        };

        // The daemon rewrites the file in place, so always read from the start
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| unavailable("failed to rewind", &e))?;
        let mut data = Vec::new();
        self.file
            .read_to_end(&mut data)
            .map_err(|e| unavailable("failed to read", &e))?;

        Ok(RawFrame::new(move || {
            let frame =
                image::load_from_memory(&data).map_err(|e| unavailable("bad frame in", &e))?;
            let jpeg = encode_jpeg(&frame).map_err(|e| unavailable("failed to encode", &e))?;

            debug!(
                "📸 Captured {}x{} still ({} KB)",
                frame.width(),
                frame.height(),
                jpeg.len() / 1024
            );
            Ok(ImagePayload::new("image/jpeg", jpeg))
        }))
    }
}

/// Re-encode a frame as JPEG, dropping any alpha channel
fn encode_jpeg(frame: &DynamicImage) -> image::ImageResult<Vec<u8>> {
    let mut jpeg = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg, STILL_JPEG_QUALITY);
    DynamicImage::ImageRgb8(frame.to_rgb8()).write_with_encoder(encoder)?;
    Ok(jpeg)
}
