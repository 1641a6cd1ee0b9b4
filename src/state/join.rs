//! Enhancement join
//!
//! Each scan with a visual prompt gets two enhancement images (restoration and
//! 3D design). They are generated concurrently, complete in any order, and the
//! finished scan is persisted exactly once when both slots are terminal.
//!
//! [`JoinState`] is the pure bookkeeping; [`EnhancementJoinCoordinator`] drives
//! the two gateway calls and the store on its own task, independent of what
//! the workflow is doing by then.

use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::data::{EnhancementPurpose, ImagePayload, NewScanRecord, ScanId, StoredScan};
use super::library::ScanStore;
use crate::error::{GenerationError, StoreError};
use crate::gateway::EnhancementGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Pending,
    Ready,
    Failed,
}

/// One enhancement image and where it stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancementSlot {
    status: SlotStatus,
    image: Option<ImagePayload>,
    error: Option<GenerationError>,
}

impl EnhancementSlot {
    pub fn pending() -> Self {
        Self {
            status: SlotStatus::Pending,
            image: None,
            error: None,
        }
    }

    /// A Ready slot holding an image from a stored scan
    pub fn from_stored(image: ImagePayload) -> Self {
        Self {
            status: SlotStatus::Ready,
            image: Some(image),
            error: None,
        }
    }

    pub fn status(&self) -> SlotStatus {
        self.status
    }

    pub fn image(&self) -> Option<&ImagePayload> {
        self.image.as_ref()
    }

    pub fn error(&self) -> Option<&GenerationError> {
        self.error.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status != SlotStatus::Pending
    }

    /// Move from Pending to Ready or Failed. Returns false if already terminal.
    pub fn resolve(&mut self, result: Result<ImagePayload, GenerationError>) -> bool {
        if self.is_terminal() {
            return false;
        }
        match result {
            Ok(image) => {
                self.status = SlotStatus::Ready;
                self.image = Some(image);
            }
            Err(err) => {
                self.status = SlotStatus::Failed;
                self.error = Some(err);
            }
        }
        true
    }
}

/// Completion tracking for the two slots of one scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinState {
    restoration: EnhancementSlot,
    three_d_design: EnhancementSlot,
    persisted: bool,
}

impl Default for JoinState {
    fn default() -> Self {
        Self::new()
    }
}

impl JoinState {
    pub fn new() -> Self {
        Self {
            restoration: EnhancementSlot::pending(),
            three_d_design: EnhancementSlot::pending(),
            persisted: false,
        }
    }

    pub fn slot(&self, purpose: EnhancementPurpose) -> &EnhancementSlot {
        match purpose {
            EnhancementPurpose::Restoration => &self.restoration,
            EnhancementPurpose::ThreeDDesign => &self.three_d_design,
        }
    }

    fn slot_mut(&mut self, purpose: EnhancementPurpose) -> &mut EnhancementSlot {
        match purpose {
            EnhancementPurpose::Restoration => &mut self.restoration,
            EnhancementPurpose::ThreeDDesign => &mut self.three_d_design,
        }
    }

    /// Record one slot's result. Returns false if that slot was already terminal.
    pub fn resolve(
        &mut self,
        purpose: EnhancementPurpose,
        result: Result<ImagePayload, GenerationError>,
    ) -> bool {
        self.slot_mut(purpose).resolve(result)
    }

    /// Both slots are Ready or Failed
    pub fn is_complete(&self) -> bool {
        self.restoration.is_terminal() && self.three_d_design.is_terminal()
    }

    /// The record to persist, with whichever images are available
    pub fn compose(&self, draft: &NewScanRecord) -> NewScanRecord {
        NewScanRecord {
            restoration_image: self.restoration.image.clone(),
            three_d_design_image: self.three_d_design.image.clone(),
            ..draft.clone()
        }
    }

    /// Hand out the record the first time the join is complete, and never again
    pub fn take_record(&mut self, draft: &NewScanRecord) -> Option<NewScanRecord> {
        if self.persisted || !self.is_complete() {
            return None;
        }
        self.persisted = true;
        Some(self.compose(draft))
    }
}

/// Progress published while a join runs
#[derive(Debug, Clone)]
pub enum JoinEvent {
    /// One slot became terminal
    SlotResolved {
        scan: ScanId,
        purpose: EnhancementPurpose,
        result: Result<ImagePayload, GenerationError>,
    },
    /// The scan was handed to the store
    Persisted {
        scan: ScanId,
        outcome: Result<StoredScan, StoreError>,
    },
}

impl JoinEvent {
    pub fn scan(&self) -> ScanId {
        match self {
            JoinEvent::SlotResolved { scan, .. } | JoinEvent::Persisted { scan, .. } => *scan,
        }
    }
}

/// How a join ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub scan: ScanId,
    /// Final slot statuses; None when enhancements were never requested
    pub restoration: Option<SlotStatus>,
    pub three_d_design: Option<SlotStatus>,
    pub persisted: Result<StoredScan, StoreError>,
}

/// Runs the two enhancement generations for one scan and persists it once
pub struct EnhancementJoinCoordinator {
    scan: ScanId,
    draft: NewScanRecord,
    prompt: String,
    enhancer: Arc<dyn EnhancementGateway>,
    store: Arc<dyn ScanStore>,
    events: Option<UnboundedSender<JoinEvent>>,
}

impl EnhancementJoinCoordinator {
    /// `draft` is the record without enhancement images
    pub fn new(
        scan: ScanId,
        draft: NewScanRecord,
        prompt: impl Into<String>,
        enhancer: Arc<dyn EnhancementGateway>,
        store: Arc<dyn ScanStore>,
    ) -> Self {
        Self {
            scan,
            draft,
            prompt: prompt.into(),
            enhancer,
            store,
            events: None,
        }
    }

    /// Publish slot and persistence progress on `events`
    pub fn with_events(mut self, events: UnboundedSender<JoinEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Run on its own task; the join outlives whoever spawned it
    pub fn spawn(self) -> JoinHandle<JoinOutcome> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) -> JoinOutcome {
        info!(scan = %self.scan, "🎨 Generating enhancements");

        let mut state = JoinState::new();
        let mut restoration = self
            .enhancer
            .generate(EnhancementPurpose::Restoration, &self.prompt);
        let mut three_d_design = self
            .enhancer
            .generate(EnhancementPurpose::ThreeDDesign, &self.prompt);

        // Slots are handled in completion order; a resolved branch is never polled again
        let record = loop {
            let (purpose, result) = tokio::select! {
                result = &mut restoration, if !state.slot(EnhancementPurpose::Restoration).is_terminal() => {
                    (EnhancementPurpose::Restoration, result)
                }
                result = &mut three_d_design, if !state.slot(EnhancementPurpose::ThreeDDesign).is_terminal() => {
                    (EnhancementPurpose::ThreeDDesign, result)
                }
                else => break None,
            };

            match &result {
                Ok(_) => info!(scan = %self.scan, "✅ {} image ready", purpose),
                Err(e) => warn!(scan = %self.scan, "⚠️  {} image failed: {}", purpose, e),
            }
            self.publish(JoinEvent::SlotResolved {
                scan: self.scan,
                purpose,
                result: result.clone(),
            });
            state.resolve(purpose, result);

            if let Some(record) = state.take_record(&self.draft) {
                break Some(record);
            }
        };

        let persisted = match record {
            Some(record) => persist(self.scan, self.store.as_ref(), record).await,
            None => Err(StoreError::Task("enhancement join ended without a record".into())),
        };
        self.publish(JoinEvent::Persisted {
            scan: self.scan,
            outcome: persisted.clone(),
        });

        JoinOutcome {
            scan: self.scan,
            restoration: Some(state.slot(EnhancementPurpose::Restoration).status()),
            three_d_design: Some(state.slot(EnhancementPurpose::ThreeDDesign).status()),
            persisted,
        }
    }

    /// Persist a scan that has no enhancements, on its own task
    pub fn persist_now(
        scan: ScanId,
        record: NewScanRecord,
        store: Arc<dyn ScanStore>,
        events: Option<UnboundedSender<JoinEvent>>,
    ) -> JoinHandle<JoinOutcome> {
        tokio::spawn(async move {
            let persisted = persist(scan, store.as_ref(), record).await;
            if let Some(events) = &events {
                let _ = events.send(JoinEvent::Persisted {
                    scan,
                    outcome: persisted.clone(),
                });
            }
            JoinOutcome {
                scan,
                restoration: None,
                three_d_design: None,
                persisted,
            }
        })
    }

    fn publish(&self, event: JoinEvent) {
        // Nobody listening is fine: the join still persists
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

async fn persist(
    scan: ScanId,
    store: &dyn ScanStore,
    record: NewScanRecord,
) -> Result<StoredScan, StoreError> {
    match store.persist(record).await {
        Ok(stored) => {
            info!(scan = %scan, "💾 Scan persisted as record {}", stored.id);
            Ok(stored)
        }
        Err(e) => {
            warn!(scan = %scan, "⚠️  Failed to persist scan: {}", e);
            Err(e)
        }
    }
}
