//! Still-image acquisition
//!
//! This module abstracts over the two image producers the kiosk supports:
//! - a local live feed (`local.rs`), acquired as an exclusive device handle
//! - a remote streaming camera (`remote.rs`), asked for one frame over HTTP
//!
//! The workflow only talks to [`CaptureSource`], which guarantees that at most
//! one local device handle is open at any time.

pub mod local;
pub mod remote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::CaptureError;
use crate::state::data::ImagePayload;

/// A future the host runs to completion and reports back to the workflow
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Which producer yields the still image for this session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CaptureSourceKind {
    /// Remote camera device serving a preview stream and single-frame captures
    RemoteDevice,
    /// Camera attached to the kiosk itself
    LocalCamera,
}

impl CaptureSourceKind {
    pub const ALL: [CaptureSourceKind; 2] =
        [CaptureSourceKind::RemoteDevice, CaptureSourceKind::LocalCamera];

    pub fn label(&self) -> &'static str {
        match self {
            CaptureSourceKind::RemoteDevice => "remote device",
            CaptureSourceKind::LocalCamera => "local camera",
        }
    }
}

impl fmt::Display for CaptureSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The still image a scan is built around
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub source: CaptureSourceKind,
    pub captured_at: DateTime<Utc>,
    pub payload: ImagePayload,
}

/// A frame taken off the device but not yet encoded
///
/// Reading is cheap and needs the device; encoding is CPU bound and doesn't.
pub struct RawFrame {
    encode: Box<dyn FnOnce() -> Result<ImagePayload, CaptureError> + Send>,
}

impl RawFrame {
    pub fn new(encode: impl FnOnce() -> Result<ImagePayload, CaptureError> + Send + 'static) -> Self {
        Self {
            encode: Box::new(encode),
        }
    }

    /// Decode and re-encode the frame. Blocking.
    pub fn encode(self) -> Result<ImagePayload, CaptureError> {
        (self.encode)()
    }
}

/// A running live feed on an acquired device
///
/// Dropping the feed releases the device.
pub trait LiveFeed: Send {
    /// Read the current frame
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError>;
}

/// Exclusive handle on a local camera; released on drop
pub struct DeviceHandle {
    feed: Box<dyn LiveFeed>,
}

impl DeviceHandle {
    pub fn new(feed: impl LiveFeed + 'static) -> Self {
        Self {
            feed: Box::new(feed),
        }
    }

    pub fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        self.feed.read_frame()
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle").finish_non_exhaustive()
    }
}

/// A local camera that can be opened for a live feed
pub trait CaptureDevice: Send + Sync {
    /// Open the device
    ///
    /// Fails with [`CaptureError::PermissionDenied`] when access is refused and
    /// [`CaptureError::DeviceUnavailable`] for anything else.
    fn acquire(&self) -> Result<DeviceHandle, CaptureError>;
}

/// A remote camera that captures on request
#[async_trait]
pub trait RemoteCamera: Send + Sync {
    /// Ask the device for a single frame
    async fn capture(&self) -> Result<ImagePayload, CaptureError>;

    /// URL the presentation layer polls for the live preview
    fn preview_url(&self) -> String;
}

/// Yields one [`CapturedImage`] per scan from whichever source is selected
pub struct CaptureSource {
    kind: CaptureSourceKind,
    device: Arc<dyn CaptureDevice>,
    remote: Arc<dyn RemoteCamera>,
    feed: Option<DeviceHandle>,
}

impl CaptureSource {
    pub fn new(
        kind: CaptureSourceKind,
        device: Arc<dyn CaptureDevice>,
        remote: Arc<dyn RemoteCamera>,
    ) -> Self {
        Self {
            kind,
            device,
            remote,
            feed: None,
        }
    }

    pub fn kind(&self) -> CaptureSourceKind {
        self.kind
    }

    /// Choose the producer for the next scan
    ///
    /// Any open local handle is released before the switch.
    pub fn select_source(&mut self, kind: CaptureSourceKind) {
        self.stop_live_feed();
        if kind != self.kind {
            info!("📷 Capture source switched to {}", kind);
        }
        self.kind = kind;
    }

    /// Open the local live feed
    pub fn begin_live_feed(&mut self) -> Result<(), CaptureError> {
        if self.kind != CaptureSourceKind::LocalCamera {
            return Err(CaptureError::WrongSource(self.kind.label()));
        }

        // Never hold two handles at once, even across retries
        self.stop_live_feed();

        let handle = self.device.acquire()?;
        debug!("Local live feed started");
        self.feed = Some(handle);
        Ok(())
    }

    /// Release the local live feed, if open. Returns whether one was open.
    pub fn stop_live_feed(&mut self) -> bool {
        match self.feed.take() {
            Some(handle) => {
                drop(handle);
                debug!("Local live feed released");
                true
            }
            None => false,
        }
    }

    pub fn is_live(&self) -> bool {
        self.feed.is_some()
    }

    /// Produce the still for this scan
    ///
    /// Local capture is single-shot: the device handle is released as soon as
    /// the frame is read, whether or not the read succeeded. Encoding happens
    /// on the blocking pool when the returned future runs.
    pub fn capture_still(&mut self) -> BoxFuture<Result<CapturedImage, CaptureError>> {
        let source = self.kind;
        match source {
            CaptureSourceKind::LocalCamera => {
                let frame = match self.feed.take() {
                    Some(mut handle) => {
                        let frame = handle.read_frame();
                        drop(handle);
                        debug!("Local live feed released after capture");
                        frame
                    }
                    None => Err(CaptureError::DeviceUnavailable(
                        "live feed is not running".to_string(),
                    )),
                };
                let captured_at = Utc::now();
                Box::pin(async move {
                    let frame = frame?;
                    let payload = tokio::task::spawn_blocking(move || frame.encode())
                        .await
                        .map_err(|e| {
                            CaptureError::DeviceUnavailable(format!("encoder task failed: {}", e))
                        })??;
                    Ok(CapturedImage {
                        source,
                        captured_at,
                        payload,
                    })
                })
            }
            CaptureSourceKind::RemoteDevice => {
                let remote = Arc::clone(&self.remote);
                Box::pin(async move {
                    let payload = remote.capture().await?;
                    Ok(CapturedImage {
                        source,
                        captured_at: Utc::now(),
                        payload,
                    })
                })
            }
        }
    }

    /// Preview URL for the remote device
    pub fn stream_url(&self) -> Option<String> {
        match self.kind {
            CaptureSourceKind::RemoteDevice => Some(self.remote.preview_url()),
            CaptureSourceKind::LocalCamera => None,
        }
    }
}

impl fmt::Debug for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSource")
            .field("kind", &self.kind)
            .field("live", &self.is_live())
            .finish()
    }
}
