//! In-crate fakes for the gateways, the store and the capture devices

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::capture::{CaptureDevice, DeviceHandle, LiveFeed, RawFrame, RemoteCamera};
use crate::error::{AnalysisError, CaptureError, GenerationError, StoreError};
use crate::gateway::{AnalysisGateway, EnhancementGateway};
use crate::state::data::{
    AnalysisResult, EnhancementPurpose, ImagePayload, NewScanRecord, ScanRecord, ScanRecordId,
    StoredScan, VrSceneInfo,
};
use crate::state::library::ScanStore;

/// Tiny JPEG-looking payload (SOI marker + JFIF header)
pub fn sample_image() -> ImagePayload {
    ImagePayload::new(
        "image/jpeg",
        vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'],
    )
}

pub fn sample_analysis(visual_prompt: Option<&str>) -> AnalysisResult {
    let (vr_scene_id, vr_scene_info) = VrSceneInfo::resolve(Some("tunc"), None);
    AnalysisResult {
        name: "Gold vase".into(),
        era: "Bronze Age".into(),
        description: "A small gold vase with hammered decoration.".into(),
        usage: "Ritual offerings".into(),
        conservation_advice: Some("Keep at stable humidity.".into()),
        visual_prompt: visual_prompt.map(str::to_string),
        vr_scene_id,
        vr_scene_info,
    }
}

// ========== Gateways ==========

pub struct FakeAnalysis {
    result: Mutex<Result<AnalysisResult, AnalysisError>>,
    calls: AtomicUsize,
}

impl FakeAnalysis {
    pub fn returning(result: Result<AnalysisResult, AnalysisError>) -> Self {
        Self {
            result: Mutex::new(result),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisGateway for FakeAnalysis {
    async fn analyze(&self, _image: &ImagePayload) -> Result<AnalysisResult, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.lock().unwrap().clone()
    }
}

/// Enhancement gateway with a scripted latency and result per purpose
pub struct FakeEnhancer {
    responses: HashMap<EnhancementPurpose, (Duration, Result<ImagePayload, GenerationError>)>,
    calls: Mutex<Vec<(EnhancementPurpose, String)>>,
}

impl FakeEnhancer {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(
        mut self,
        purpose: EnhancementPurpose,
        delay: Duration,
        result: Result<ImagePayload, GenerationError>,
    ) -> Self {
        self.responses.insert(purpose, (delay, result));
        self
    }

    pub fn calls(&self) -> Vec<(EnhancementPurpose, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EnhancementGateway for FakeEnhancer {
    async fn generate(
        &self,
        purpose: EnhancementPurpose,
        prompt: &str,
    ) -> Result<ImagePayload, GenerationError> {
        self.calls.lock().unwrap().push((purpose, prompt.to_string()));
        let (delay, result) = self
            .responses
            .get(&purpose)
            .cloned()
            .unwrap_or((Duration::ZERO, Err(GenerationError::Empty)));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

// ========== Store ==========

#[derive(Default)]
pub struct RecordingStore {
    records: Mutex<Vec<ScanRecord>>,
    persist_times: Mutex<Vec<Instant>>,
    attempts: AtomicUsize,
    failure: Mutex<Option<StoreError>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_persists(&self, err: StoreError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    /// Successfully persisted records, in persist order
    pub fn persisted(&self) -> Vec<NewScanRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.content.clone())
            .collect()
    }

    pub fn persist_times(&self) -> Vec<Instant> {
        self.persist_times.lock().unwrap().clone()
    }

    pub fn persist_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScanStore for RecordingStore {
    async fn persist(&self, record: NewScanRecord) -> Result<StoredScan, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }

        let mut records = self.records.lock().unwrap();
        let stored = StoredScan {
            id: ScanRecordId(records.len() as i64 + 1),
            created_at: Utc::now(),
        };
        records.push(ScanRecord {
            id: stored.id,
            created_at: stored.created_at,
            content: record,
        });
        self.persist_times.lock().unwrap().push(Instant::now());
        Ok(stored)
    }

    async fn list(&self) -> Result<Vec<ScanRecord>, StoreError> {
        let mut records = self.records.lock().unwrap().clone();
        records.reverse();
        Ok(records)
    }

    async fn delete(&self, id: ScanRecordId) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

// ========== Capture ==========

/// Local camera that counts open handles
#[derive(Default)]
pub struct FakeDevice {
    open: Arc<AtomicUsize>,
    max_open: Arc<AtomicUsize>,
    acquisitions: AtomicUsize,
    denied: AtomicBool,
    broken_snapshots: Arc<AtomicBool>,
    encodes: Arc<AtomicUsize>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_access(&self) {
        self.denied.store(true, Ordering::SeqCst);
    }

    pub fn allow_access(&self) {
        self.denied.store(false, Ordering::SeqCst);
    }

    pub fn fail_snapshots(&self) {
        self.broken_snapshots.store(true, Ordering::SeqCst);
    }

    pub fn open_handles(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn max_open_handles(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Frames encoded so far
    pub fn encodes(&self) -> usize {
        self.encodes.load(Ordering::SeqCst)
    }
}

impl CaptureDevice for FakeDevice {
    fn acquire(&self) -> Result<DeviceHandle, CaptureError> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(CaptureError::PermissionDenied);
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let now_open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now_open, Ordering::SeqCst);
        Ok(DeviceHandle::new(FakeFeed {
            open: Arc::clone(&self.open),
            broken: Arc::clone(&self.broken_snapshots),
            encodes: Arc::clone(&self.encodes),
        }))
    }
}

struct FakeFeed {
    open: Arc<AtomicUsize>,
    broken: Arc<AtomicBool>,
    encodes: Arc<AtomicUsize>,
}

impl LiveFeed for FakeFeed {
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceUnavailable("sensor glitch".into()));
        }
        let encodes = Arc::clone(&self.encodes);
        Ok(RawFrame::new(move || {
            encodes.fetch_add(1, Ordering::SeqCst);
            Ok(sample_image())
        }))
    }
}

impl Drop for FakeFeed {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeRemoteCamera {
    failure: Mutex<Option<CaptureError>>,
}

impl FakeRemoteCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, err: CaptureError) {
        *self.failure.lock().unwrap() = Some(err);
    }
}

#[async_trait]
impl RemoteCamera for FakeRemoteCamera {
    async fn capture(&self) -> Result<ImagePayload, CaptureError> {
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(sample_image()),
        }
    }

    fn preview_url(&self) -> String {
        "http://camera.test/stream".to_string()
    }
}
