//! Capability checks
//!
//! Reachability of the analysis backend and the remote camera is polled
//! and handed around as plain values, never kept in global flags.

use async_trait::async_trait;
use tracing::info;

use crate::capture::CaptureSourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Online,
    Offline,
}

impl Reachability {
    pub fn is_online(&self) -> bool {
        matches!(self, Reachability::Online)
    }
}

/// Something that can report whether it is reachable right now
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Reachability;
}

/// Snapshot of what the kiosk can currently talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub backend: Reachability,
    pub remote_camera: Reachability,
}

impl Capabilities {
    /// Check the backend and the remote camera concurrently
    pub async fn check(backend: &dyn HealthCheck, remote_camera: &dyn HealthCheck) -> Self {
        let (backend, remote_camera) = tokio::join!(backend.check(), remote_camera.check());
        let capabilities = Capabilities {
            backend,
            remote_camera,
        };
        info!(
            "🩺 Backend {:?}, remote camera {:?}",
            capabilities.backend, capabilities.remote_camera
        );
        capabilities
    }

    /// Remote camera when it answers, otherwise the local one
    pub fn preferred_source(&self) -> CaptureSourceKind {
        if self.remote_camera.is_online() {
            CaptureSourceKind::RemoteDevice
        } else {
            CaptureSourceKind::LocalCamera
        }
    }
}
