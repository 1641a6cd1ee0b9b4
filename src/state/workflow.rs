//! Scan workflow state machine
//!
//! ```text
//! Idle ──start──▶ Scanning ──capture──▶ Analyzing ──done──▶ Result ◀──▶ VrMode
//!                  │    ▲                   │
//!                  ▼    │retry              ▼
//!           PermissionDenied              Error          (reset: any ──▶ Idle)
//! ```
//!
//! The workflow itself never awaits. Operations that suspend (capture, analysis)
//! are handed back to the host as [`Pending`] futures tagged with the scan they
//! belong to; the host runs them and reports the result. Completions for a scan
//! the workflow has already left are dropped. Enhancement joins run on their own
//! tasks and are never cancelled by the workflow.

use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::data::{
    AnalysisResult, EnhancementPurpose, ImagePayload, NewScanRecord, ScanId, ScanRecord,
    ScanRecordId, StoredScan,
};
use super::join::{EnhancementJoinCoordinator, EnhancementSlot, JoinEvent, JoinOutcome};
use super::library::ScanStore;
use crate::capture::{BoxFuture, CaptureSource, CaptureSourceKind, CapturedImage};
use crate::error::{AnalysisError, CaptureError, StoreError, WorkflowError};
use crate::gateway::{AnalysisGateway, EnhancementGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowState {
    Idle,
    Scanning,
    Analyzing,
    Result,
    VrMode,
    PermissionDenied,
    Error,
}

/// Where the scan on screen came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrigin {
    /// Captured in this session
    Live(CaptureSourceKind),
    /// Reopened from the stored history
    History(ScanRecordId),
}

/// Everything the workflow knows about the scan in front of the user
#[derive(Debug, Clone)]
pub struct ScanSession {
    pub id: ScanId,
    pub origin: ScanOrigin,
    /// The one captured still of this scan, set once
    pub captured: Option<ImagePayload>,
    pub analysis: Option<AnalysisResult>,
    /// None when no restoration image was requested (or stored)
    pub restoration: Option<EnhancementSlot>,
    /// None when no 3D design image was requested (or stored)
    pub three_d_design: Option<EnhancementSlot>,
    /// What the store answered; None while the scan is still being saved
    pub persisted: Option<Result<StoredScan, StoreError>>,
}

impl ScanSession {
    fn live(id: ScanId, source: CaptureSourceKind) -> Self {
        Self {
            id,
            origin: ScanOrigin::Live(source),
            captured: None,
            analysis: None,
            restoration: None,
            three_d_design: None,
            persisted: None,
        }
    }

    pub fn slot(&self, purpose: EnhancementPurpose) -> Option<&EnhancementSlot> {
        match purpose {
            EnhancementPurpose::Restoration => self.restoration.as_ref(),
            EnhancementPurpose::ThreeDDesign => self.three_d_design.as_ref(),
        }
    }

    /// The stored record, once the save went through
    pub fn stored(&self) -> Option<&StoredScan> {
        self.persisted.as_ref().and_then(|outcome| outcome.as_ref().ok())
    }

    /// Why the save failed, if it did
    pub fn save_error(&self) -> Option<&StoreError> {
        self.persisted.as_ref().and_then(|outcome| outcome.as_ref().err())
    }

    fn slot_mut(&mut self, purpose: EnhancementPurpose) -> Option<&mut EnhancementSlot> {
        match purpose {
            EnhancementPurpose::Restoration => self.restoration.as_mut(),
            EnhancementPurpose::ThreeDDesign => self.three_d_design.as_mut(),
        }
    }
}

/// An operation for the host to run; report its output with the same `scan`
pub struct Pending<T> {
    pub scan: ScanId,
    pub future: BoxFuture<T>,
}

impl<T> std::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending").field("scan", &self.scan).finish()
    }
}

pub struct ScanWorkflow {
    state: WorkflowState,
    source: CaptureSource,
    analyzer: Arc<dyn AnalysisGateway>,
    enhancer: Arc<dyn EnhancementGateway>,
    store: Arc<dyn ScanStore>,
    events: UnboundedSender<JoinEvent>,
    session: Option<ScanSession>,
    error: Option<String>,
    next_scan: u64,
}

impl ScanWorkflow {
    /// Build the workflow and the receiving end of its join events
    pub fn new(
        source: CaptureSource,
        analyzer: Arc<dyn AnalysisGateway>,
        enhancer: Arc<dyn EnhancementGateway>,
        store: Arc<dyn ScanStore>,
    ) -> (Self, UnboundedReceiver<JoinEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let workflow = Self {
            state: WorkflowState::Idle,
            source,
            analyzer,
            enhancer,
            store,
            events,
            session: None,
            error: None,
            next_scan: 1,
        };
        (workflow, receiver)
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn session(&self) -> Option<&ScanSession> {
        self.session.as_ref()
    }

    /// Human-readable reason for the Error / PermissionDenied states
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn source_kind(&self) -> CaptureSourceKind {
        self.source.kind()
    }

    pub fn stream_url(&self) -> Option<String> {
        self.source.stream_url()
    }

    pub fn is_feed_live(&self) -> bool {
        self.source.is_live()
    }

    fn require(&self, expected: WorkflowState, action: &'static str) -> Result<(), WorkflowError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(WorkflowError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }

    fn is_current(&self, scan: ScanId) -> bool {
        self.session.as_ref().map(|s| s.id) == Some(scan)
    }

    fn allocate_scan(&mut self) -> ScanId {
        let id = ScanId(self.next_scan);
        self.next_scan += 1;
        id
    }

    /// Terminal failure for the current attempt
    fn fail(&mut self, message: String) {
        warn!("❌ Scan failed: {}", message);
        self.source.stop_live_feed();
        self.error = Some(message);
        self.state = WorkflowState::Error;
    }

    // ========== Capture ==========

    /// Idle → Scanning with the chosen source
    ///
    /// A local camera is acquired right away and may land in PermissionDenied or
    /// Error instead. A remote device needs nothing up front.
    pub fn start_scanning(&mut self, kind: CaptureSourceKind) -> Result<WorkflowState, WorkflowError> {
        self.require(WorkflowState::Idle, "start scanning")?;

        self.source.select_source(kind);
        let scan = self.allocate_scan();
        self.session = Some(ScanSession::live(scan, kind));
        self.error = None;
        info!(scan = %scan, "🔍 Scanning with {}", kind);

        match kind {
            CaptureSourceKind::LocalCamera => self.acquire_feed(),
            CaptureSourceKind::RemoteDevice => self.state = WorkflowState::Scanning,
        }
        Ok(self.state)
    }

    /// PermissionDenied → Scanning, asking for the camera again
    pub fn retry(&mut self) -> Result<WorkflowState, WorkflowError> {
        self.require(WorkflowState::PermissionDenied, "retry")?;
        self.error = None;
        self.acquire_feed();
        Ok(self.state)
    }

    fn acquire_feed(&mut self) {
        match self.source.begin_live_feed() {
            Ok(()) => self.state = WorkflowState::Scanning,
            Err(CaptureError::PermissionDenied) => {
                warn!("⚠️  Camera permission denied");
                self.error = Some("Camera access was not allowed.".to_string());
                self.state = WorkflowState::PermissionDenied;
            }
            Err(e) => self.fail(format!("Could not start the camera: {}", e)),
        }
    }

    /// The remote preview stream went away while scanning
    ///
    /// Returns whether the workflow reacted (only a remote-device scan does).
    pub fn stream_lost(&mut self) -> bool {
        if self.state != WorkflowState::Scanning
            || self.source.kind() != CaptureSourceKind::RemoteDevice
        {
            return false;
        }
        self.fail(format!("Remote camera: {}", CaptureError::StreamLost));
        true
    }

    /// Scanning → Analyzing; the host runs the returned capture
    pub fn capture(&mut self) -> Result<Pending<Result<CapturedImage, CaptureError>>, WorkflowError> {
        self.require(WorkflowState::Scanning, "capture")?;
        let scan = self
            .session
            .as_ref()
            .map(|s| s.id)
            .ok_or(WorkflowError::InvalidTransition {
                state: self.state,
                action: "capture",
            })?;

        self.state = WorkflowState::Analyzing;
        debug!(scan = %scan, "Capturing still");
        Ok(Pending {
            scan,
            future: self.source.capture_still(),
        })
    }

    /// Capture result; on success the still is stored and handed back for analysis
    pub fn capture_finished(
        &mut self,
        scan: ScanId,
        result: Result<CapturedImage, CaptureError>,
    ) -> Option<Pending<Result<AnalysisResult, AnalysisError>>> {
        if !self.is_current(scan) || self.state != WorkflowState::Analyzing {
            debug!(scan = %scan, "Ignoring capture for a scan no longer in progress");
            return None;
        }

        let image = match result {
            Ok(image) => image,
            Err(e) => {
                let message = match self.source.kind() {
                    CaptureSourceKind::RemoteDevice => {
                        format!("Could not get an image from the remote camera: {}", e)
                    }
                    CaptureSourceKind::LocalCamera => {
                        format!("Could not take a picture with the camera: {}", e)
                    }
                };
                self.fail(message);
                return None;
            }
        };

        let payload = image.payload;
        if let Some(session) = self.session.as_mut() {
            session.captured = Some(payload.clone());
        }
        info!(
            scan = %scan,
            "📸 Still captured ({}, {} KB), analyzing",
            payload.mime(),
            payload.bytes().len() / 1024
        );

        let analyzer = Arc::clone(&self.analyzer);
        Some(Pending {
            scan,
            future: Box::pin(async move { analyzer.analyze(&payload).await }),
        })
    }

    // ========== Analysis ==========

    /// Analyzing → Result (or Error)
    ///
    /// With a visual prompt the enhancement join is spawned; without one the
    /// scan is persisted right away. Either way the returned handle belongs to
    /// the scan, not the workflow: dropping it does not cancel anything.
    pub fn analysis_finished(
        &mut self,
        scan: ScanId,
        result: Result<AnalysisResult, AnalysisError>,
    ) -> Option<JoinHandle<JoinOutcome>> {
        if !self.is_current(scan) || self.state != WorkflowState::Analyzing {
            debug!(scan = %scan, "Ignoring analysis for a scan no longer in progress");
            return None;
        }

        let analysis = match result {
            Ok(analysis) => analysis,
            Err(e) => {
                self.fail(e.to_string());
                return None;
            }
        };

        let Some(captured) = self.session.as_ref().and_then(|s| s.captured.clone()) else {
            self.fail("Analysis finished without a captured image".to_string());
            return None;
        };

        let draft = NewScanRecord::from_analysis(&analysis, &captured);
        let prompt = analysis.enhancement_prompt().map(str::to_string);
        info!(scan = %scan, "🏺 Identified \"{}\" ({})", analysis.name, analysis.era);

        let session = self.session.as_mut()?;
        session.analysis = Some(analysis);
        self.state = WorkflowState::Result;

        let handle = match prompt {
            Some(prompt) => {
                session.restoration = Some(EnhancementSlot::pending());
                session.three_d_design = Some(EnhancementSlot::pending());
                EnhancementJoinCoordinator::new(
                    scan,
                    draft,
                    prompt,
                    Arc::clone(&self.enhancer),
                    Arc::clone(&self.store),
                )
                .with_events(self.events.clone())
                .spawn()
            }
            None => {
                debug!(scan = %scan, "No visual prompt, persisting without enhancements");
                EnhancementJoinCoordinator::persist_now(
                    scan,
                    draft,
                    Arc::clone(&self.store),
                    Some(self.events.clone()),
                )
            }
        };
        Some(handle)
    }

    /// Mirror join progress into the session on screen
    ///
    /// Events for any other scan are ignored; returns whether this one applied.
    pub fn apply_join_event(&mut self, event: JoinEvent) -> bool {
        let Some(session) = self.session.as_mut().filter(|s| s.id == event.scan()) else {
            return false;
        };

        match event {
            JoinEvent::SlotResolved {
                purpose, result, ..
            } => match session.slot_mut(purpose) {
                Some(slot) => slot.resolve(result),
                None => false,
            },
            JoinEvent::Persisted { outcome, .. } => {
                if let Err(e) = &outcome {
                    warn!(scan = %session.id, "⚠️  Scan shown but not saved: {}", e);
                }
                session.persisted = Some(outcome);
                true
            }
        }
    }

    // ========== Result ==========

    pub fn open_vr(&mut self) -> Result<(), WorkflowError> {
        self.require(WorkflowState::Result, "open VR")?;
        self.state = WorkflowState::VrMode;
        Ok(())
    }

    pub fn close_vr(&mut self) -> Result<(), WorkflowError> {
        self.require(WorkflowState::VrMode, "leave VR")?;
        self.state = WorkflowState::Result;
        Ok(())
    }

    /// Show a stored scan without capturing or analyzing again
    pub fn open_history_record(&mut self, record: &ScanRecord) -> ScanId {
        self.source.stop_live_feed();

        let scan = self.allocate_scan();
        let content = &record.content;
        self.session = Some(ScanSession {
            id: scan,
            origin: ScanOrigin::History(record.id),
            captured: Some(content.captured_image.clone()),
            analysis: Some(record.to_analysis()),
            restoration: content
                .restoration_image
                .clone()
                .map(EnhancementSlot::from_stored),
            three_d_design: content
                .three_d_design_image
                .clone()
                .map(EnhancementSlot::from_stored),
            persisted: Some(Ok(StoredScan {
                id: record.id,
                created_at: record.created_at,
            })),
        });
        self.error = None;
        self.state = WorkflowState::Result;
        info!(scan = %scan, "📚 Showing stored scan {}", record.id);
        scan
    }

    /// Any state → Idle
    ///
    /// Releases the camera and forgets the current scan. Joins already running
    /// keep going and persist on their own.
    pub fn reset(&mut self) {
        if self.source.stop_live_feed() {
            debug!("Camera released on reset");
        }
        if let Some(session) = self.session.take() {
            debug!(scan = %session.id, "Scan discarded on reset");
        }
        self.error = None;
        self.state = WorkflowState::Idle;
    }
}

impl std::fmt::Debug for ScanWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanWorkflow")
            .field("state", &self.state)
            .field("source", &self.source)
            .field("scan", &self.session.as_ref().map(|s| s.id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::state::join::SlotStatus;
    use crate::testing::{
        sample_analysis, FakeAnalysis, FakeDevice, FakeEnhancer, FakeRemoteCamera, RecordingStore,
    };
    use std::time::Duration;
    use tokio::time::Instant;

    struct Harness {
        workflow: ScanWorkflow,
        events: UnboundedReceiver<JoinEvent>,
        device: Arc<FakeDevice>,
        remote: Arc<FakeRemoteCamera>,
        analysis: Arc<FakeAnalysis>,
        enhancer: Arc<FakeEnhancer>,
        store: Arc<RecordingStore>,
    }

    fn png(tag: u8) -> ImagePayload {
        ImagePayload::new("image/png", vec![0x89, b'P', b'N', b'G', tag])
    }

    fn harness(analysis: Result<AnalysisResult, AnalysisError>, enhancer: FakeEnhancer) -> Harness {
        let device = Arc::new(FakeDevice::new());
        let remote = Arc::new(FakeRemoteCamera::new());
        let analysis = Arc::new(FakeAnalysis::returning(analysis));
        let enhancer = Arc::new(enhancer);
        let store = Arc::new(RecordingStore::new());
        let source = CaptureSource::new(
            CaptureSourceKind::LocalCamera,
            device.clone(),
            remote.clone(),
        );
        let (workflow, events) =
            ScanWorkflow::new(source, analysis.clone(), enhancer.clone(), store.clone());
        Harness {
            workflow,
            events,
            device,
            remote,
            analysis,
            enhancer,
            store,
        }
    }

    fn gold_vase_enhancer() -> FakeEnhancer {
        FakeEnhancer::new()
            .respond(EnhancementPurpose::Restoration, Duration::from_millis(100), Ok(png(1)))
            .respond(EnhancementPurpose::ThreeDDesign, Duration::from_millis(400), Ok(png(2)))
    }

    /// Run capture and analysis the way the kiosk shell does
    async fn capture_and_analyze(workflow: &mut ScanWorkflow) -> Option<JoinHandle<JoinOutcome>> {
        let capture = workflow.capture().unwrap();
        let captured = capture.future.await;
        let analysis = workflow.capture_finished(capture.scan, captured)?;
        let result = analysis.future.await;
        workflow.analysis_finished(analysis.scan, result)
    }

    #[tokio::test(start_paused = true)]
    async fn test_gold_vase_scenario() {
        let mut h = harness(Ok(sample_analysis(Some("gold vase"))), gold_vase_enhancer());

        assert_eq!(
            h.workflow.start_scanning(CaptureSourceKind::LocalCamera),
            Ok(WorkflowState::Scanning)
        );
        assert_eq!(h.device.open_handles(), 1);

        let started = Instant::now();
        let join = capture_and_analyze(&mut h.workflow).await.unwrap();
        assert_eq!(h.workflow.state(), WorkflowState::Result);
        assert_eq!(h.device.open_handles(), 0);
        assert!(h.store.persisted().is_empty());

        let outcome = join.await.unwrap();
        assert!(outcome.persisted.is_ok());

        let persisted = h.store.persisted();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].name, "Gold vase");
        assert_eq!(persisted[0].restoration_image, Some(png(1)));
        assert_eq!(persisted[0].three_d_design_image, Some(png(2)));
        let elapsed = h.store.persist_times()[0].duration_since(started);
        assert!(elapsed >= Duration::from_millis(400) && elapsed < Duration::from_millis(401));

        // The view catches up from the event stream
        while let Ok(event) = h.events.try_recv() {
            assert!(h.workflow.apply_join_event(event));
        }
        let session = h.workflow.session().unwrap();
        assert_eq!(
            session.slot(EnhancementPurpose::Restoration).map(|s| s.status()),
            Some(SlotStatus::Ready)
        );
        assert_eq!(
            session.slot(EnhancementPurpose::ThreeDDesign).and_then(|s| s.image()),
            Some(&png(2))
        );
        assert_eq!(session.stored().map(|s| s.id), Some(ScanRecordId(1)));
        assert_eq!(session.save_error(), None);
    }

    #[tokio::test]
    async fn test_missing_prompt_persists_immediately() {
        let mut h = harness(Ok(sample_analysis(None)), FakeEnhancer::new());
        h.workflow.start_scanning(CaptureSourceKind::LocalCamera).unwrap();

        let join = capture_and_analyze(&mut h.workflow).await.unwrap();
        let outcome = join.await.unwrap();

        assert!(outcome.persisted.is_ok());
        assert_eq!(outcome.restoration, None);
        let persisted = h.store.persisted();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].restoration_image, None);
        assert_eq!(persisted[0].three_d_design_image, None);
        assert!(h.enhancer.calls().is_empty());

        let session = h.workflow.session().unwrap();
        assert!(session.restoration.is_none());
        assert!(session.three_d_design.is_none());
    }

    #[tokio::test]
    async fn test_permission_denied_then_retry() {
        let mut h = harness(Ok(sample_analysis(None)), FakeEnhancer::new());
        h.device.deny_access();

        assert_eq!(
            h.workflow.start_scanning(CaptureSourceKind::LocalCamera),
            Ok(WorkflowState::PermissionDenied)
        );
        assert!(h.workflow.session().unwrap().captured.is_none());
        assert!(h.workflow.error_message().is_some());
        assert_eq!(h.device.open_handles(), 0);
        assert!(h.workflow.capture().is_err());

        h.device.allow_access();
        assert_eq!(h.workflow.retry(), Ok(WorkflowState::Scanning));
        assert_eq!(h.workflow.error_message(), None);
        assert_eq!(h.device.open_handles(), 1);
    }

    #[tokio::test]
    async fn test_remote_scan_needs_no_acquisition() {
        let mut h = harness(Ok(sample_analysis(None)), FakeEnhancer::new());

        assert_eq!(
            h.workflow.start_scanning(CaptureSourceKind::RemoteDevice),
            Ok(WorkflowState::Scanning)
        );
        assert_eq!(h.device.acquisitions(), 0);
        assert_eq!(
            h.workflow.stream_url().as_deref(),
            Some("http://camera.test/stream")
        );

        let join = capture_and_analyze(&mut h.workflow).await.unwrap();
        join.await.unwrap();
        assert_eq!(
            h.workflow.session().unwrap().origin,
            ScanOrigin::Live(CaptureSourceKind::RemoteDevice)
        );
        assert_eq!(h.store.persisted().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_capture_failure_is_error() {
        let mut h = harness(Ok(sample_analysis(None)), FakeEnhancer::new());
        h.remote.fail_with(CaptureError::RemoteCapture("HTTP 500".into()));
        h.workflow.start_scanning(CaptureSourceKind::RemoteDevice).unwrap();

        assert!(capture_and_analyze(&mut h.workflow).await.is_none());
        assert_eq!(h.workflow.state(), WorkflowState::Error);
        assert!(h
            .workflow
            .error_message()
            .unwrap()
            .contains("remote camera"));
        assert_eq!(h.analysis.calls(), 0);
        assert!(h.store.persisted().is_empty());
    }

    #[tokio::test]
    async fn test_stream_lost_only_while_scanning_remote() {
        let mut h = harness(Ok(sample_analysis(None)), FakeEnhancer::new());

        assert!(!h.workflow.stream_lost());
        assert_eq!(h.workflow.state(), WorkflowState::Idle);

        h.workflow.start_scanning(CaptureSourceKind::LocalCamera).unwrap();
        assert!(!h.workflow.stream_lost());
        assert_eq!(h.workflow.state(), WorkflowState::Scanning);

        h.workflow.reset();
        h.workflow.start_scanning(CaptureSourceKind::RemoteDevice).unwrap();
        assert!(h.workflow.stream_lost());
        assert_eq!(h.workflow.state(), WorkflowState::Error);
        assert!(h.workflow.session().unwrap().captured.is_none());
    }

    #[tokio::test]
    async fn test_device_unavailable_is_error() {
        let mut h = harness(Ok(sample_analysis(None)), FakeEnhancer::new());
        h.workflow.start_scanning(CaptureSourceKind::LocalCamera).unwrap();
        h.device.fail_snapshots();

        assert!(capture_and_analyze(&mut h.workflow).await.is_none());
        assert_eq!(h.workflow.state(), WorkflowState::Error);
        assert_eq!(h.device.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_analysis_failure_persists_nothing() {
        let mut h = harness(
            Err(AnalysisError::Rejected {
                status: 500,
                detail: "model offline".into(),
            }),
            FakeEnhancer::new(),
        );
        h.workflow.start_scanning(CaptureSourceKind::LocalCamera).unwrap();

        assert!(capture_and_analyze(&mut h.workflow).await.is_none());
        assert_eq!(h.workflow.state(), WorkflowState::Error);
        assert!(h.workflow.error_message().unwrap().contains("model offline"));
        assert!(h.workflow.session().unwrap().analysis.is_none());
        assert_eq!(h.store.persist_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_does_not_cancel_pending_join() {
        let mut h = harness(Ok(sample_analysis(Some("gold vase"))), gold_vase_enhancer());
        h.workflow.start_scanning(CaptureSourceKind::LocalCamera).unwrap();
        let join = capture_and_analyze(&mut h.workflow).await.unwrap();
        let first_scan = join_scan(&h.workflow);

        h.workflow.reset();
        assert_eq!(h.workflow.state(), WorkflowState::Idle);
        assert!(h.workflow.session().is_none());

        // Start over while the old join is still generating
        h.workflow.start_scanning(CaptureSourceKind::LocalCamera).unwrap();

        let outcome = join.await.unwrap();
        assert_eq!(outcome.scan, first_scan);
        assert_eq!(h.store.persisted().len(), 1);
        assert_eq!(h.store.persisted()[0].three_d_design_image, Some(png(2)));

        // Late progress for the old scan does not leak into the new one
        while let Ok(event) = h.events.try_recv() {
            assert!(!h.workflow.apply_join_event(event));
        }
        assert!(h.workflow.session().unwrap().restoration.is_none());
    }

    fn join_scan(workflow: &ScanWorkflow) -> ScanId {
        workflow.session().unwrap().id
    }

    #[tokio::test]
    async fn test_stale_analysis_after_reset_is_ignored() {
        let mut h = harness(Ok(sample_analysis(Some("gold vase"))), gold_vase_enhancer());
        h.workflow.start_scanning(CaptureSourceKind::LocalCamera).unwrap();

        let capture = h.workflow.capture().unwrap();
        let captured = capture.future.await;
        let analysis = h.workflow.capture_finished(capture.scan, captured).unwrap();

        h.workflow.reset();
        let result = analysis.future.await;
        assert!(h.workflow.analysis_finished(analysis.scan, result).is_none());
        assert_eq!(h.workflow.state(), WorkflowState::Idle);
        assert!(h.enhancer.calls().is_empty());
        assert_eq!(h.store.persist_attempts(), 0);
    }

    #[tokio::test]
    async fn test_reset_releases_camera() {
        let mut h = harness(Ok(sample_analysis(None)), FakeEnhancer::new());
        h.workflow.start_scanning(CaptureSourceKind::LocalCamera).unwrap();
        assert!(h.workflow.is_feed_live());

        h.workflow.reset();
        assert_eq!(h.device.open_handles(), 0);
        assert!(!h.workflow.is_feed_live());
    }

    #[tokio::test]
    async fn test_failed_enhancement_shows_failed_slot() {
        let enhancer = FakeEnhancer::new()
            .respond(EnhancementPurpose::Restoration, Duration::ZERO, Err(GenerationError::Empty))
            .respond(EnhancementPurpose::ThreeDDesign, Duration::ZERO, Ok(png(2)));
        let mut h = harness(Ok(sample_analysis(Some("gold vase"))), enhancer);
        h.workflow.start_scanning(CaptureSourceKind::LocalCamera).unwrap();

        let join = capture_and_analyze(&mut h.workflow).await.unwrap();
        join.await.unwrap();
        while let Ok(event) = h.events.try_recv() {
            h.workflow.apply_join_event(event);
        }

        // Result view is unaffected by the failure
        assert_eq!(h.workflow.state(), WorkflowState::Result);
        let session = h.workflow.session().unwrap();
        assert_eq!(
            session.slot(EnhancementPurpose::Restoration).map(|s| s.status()),
            Some(SlotStatus::Failed)
        );
        assert_eq!(h.store.persisted()[0].restoration_image, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_is_kept_on_result() {
        let mut h = harness(Ok(sample_analysis(Some("gold vase"))), gold_vase_enhancer());
        h.store.fail_persists(StoreError::Database("disk full".into()));
        h.workflow.start_scanning(CaptureSourceKind::LocalCamera).unwrap();

        let join = capture_and_analyze(&mut h.workflow).await.unwrap();
        assert!(h.workflow.session().unwrap().persisted.is_none());

        let outcome = join.await.unwrap();
        assert!(outcome.persisted.is_err());
        while let Ok(event) = h.events.try_recv() {
            assert!(h.workflow.apply_join_event(event));
        }

        // Still on Result, but the session knows the save failed
        assert_eq!(h.workflow.state(), WorkflowState::Result);
        let session = h.workflow.session().unwrap();
        assert_eq!(session.stored(), None);
        assert_eq!(
            session.save_error(),
            Some(&StoreError::Database("disk full".into()))
        );
        assert_eq!(h.store.persist_attempts(), 1);
    }

    #[tokio::test]
    async fn test_vr_mode_round_trip() {
        let mut h = harness(Ok(sample_analysis(None)), FakeEnhancer::new());
        assert!(h.workflow.open_vr().is_err());

        h.workflow.start_scanning(CaptureSourceKind::LocalCamera).unwrap();
        capture_and_analyze(&mut h.workflow).await.unwrap().await.unwrap();

        h.workflow.open_vr().unwrap();
        assert_eq!(h.workflow.state(), WorkflowState::VrMode);
        h.workflow.close_vr().unwrap();
        assert_eq!(h.workflow.state(), WorkflowState::Result);
    }

    #[tokio::test]
    async fn test_invalid_transitions_are_rejected() {
        let mut h = harness(Ok(sample_analysis(None)), FakeEnhancer::new());
        assert_eq!(
            h.workflow.capture().err(),
            Some(WorkflowError::InvalidTransition {
                state: WorkflowState::Idle,
                action: "capture",
            })
        );
        assert!(h.workflow.retry().is_err());

        h.workflow.start_scanning(CaptureSourceKind::RemoteDevice).unwrap();
        assert!(h
            .workflow
            .start_scanning(CaptureSourceKind::RemoteDevice)
            .is_err());
    }

    #[tokio::test]
    async fn test_history_record_opens_result_without_enhancing() {
        let mut h = harness(Ok(sample_analysis(None)), gold_vase_enhancer());
        let record = ScanRecord {
            id: ScanRecordId(42),
            created_at: chrono::Utc::now(),
            content: NewScanRecord {
                restoration_image: Some(png(1)),
                ..NewScanRecord::from_analysis(
                    &sample_analysis(Some("gold vase")),
                    &crate::testing::sample_image(),
                )
            },
        };

        h.workflow.start_scanning(CaptureSourceKind::LocalCamera).unwrap();
        h.workflow.open_history_record(&record);

        assert_eq!(h.workflow.state(), WorkflowState::Result);
        assert_eq!(h.device.open_handles(), 0);
        let session = h.workflow.session().unwrap();
        assert_eq!(session.origin, ScanOrigin::History(ScanRecordId(42)));
        assert_eq!(session.analysis.as_ref().unwrap().visual_prompt, None);
        assert_eq!(
            session.slot(EnhancementPurpose::Restoration).map(|s| s.status()),
            Some(SlotStatus::Ready)
        );
        assert!(session.three_d_design.is_none());
        assert!(h.enhancer.calls().is_empty());
        assert_eq!(h.analysis.calls(), 0);

        h.workflow.open_vr().unwrap();
        h.workflow.reset();
        assert_eq!(h.workflow.state(), WorkflowState::Idle);
    }
}
