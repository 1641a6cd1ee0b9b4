use iced::futures::stream;
use iced::widget::{button, column, container, row, scrollable, text, Column, Row};
use iced::{Alignment, Element, Length, Subscription, Task, Theme};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod capture;
mod config;
mod error;
mod gateway;
mod health;
mod state;

#[cfg(test)]
mod testing;

use capture::local::FrameFileDevice;
use capture::remote::HttpRemoteCamera;
use capture::{CaptureSource, CaptureSourceKind, CapturedImage};
use config::Config;
use error::{AnalysisError, CaptureError, StoreError, WorkflowError};
use gateway::http::{build_client, BackendClient};
use health::{Capabilities, HealthCheck, Reachability};
use state::data::{AnalysisResult, EnhancementPurpose, ImagePayload, ScanId, ScanRecord, ScanRecordId};
use state::history::ScanHistory;
use state::join::{JoinEvent, SlotStatus};
use state::library::{Library, ScanStore};
use state::workflow::{ScanOrigin, ScanWorkflow, WorkflowState};

/// How often the remote camera is checked while its preview is on screen
const CAMERA_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Main application state
struct Kiosk {
    /// The scan state machine
    workflow: ScanWorkflow,
    /// Join progress, moved into a stream task at startup
    join_events: Option<UnboundedReceiver<JoinEvent>>,
    /// The scan database
    store: Arc<Library>,
    backend: Arc<BackendClient>,
    camera: Arc<HttpRemoteCamera>,
    history: ScanHistory,
    config: Config,
    /// Source used by the next "Start scanning"
    chosen_source: CaptureSourceKind,
    capabilities: Option<Capabilities>,
    /// Status message to display to the user
    status: String,
}

/// Application messages (events)
#[derive(Debug, Clone)]
enum Message {
    CapabilitiesChecked(Capabilities),
    SelectSource(CaptureSourceKind),
    StartScanning,
    Capture,
    Captured(ScanId, Result<CapturedImage, CaptureError>),
    Analyzed(ScanId, Result<AnalysisResult, AnalysisError>),
    Join(JoinEvent),
    PollCamera,
    CameraStatus(Reachability),
    Retry,
    OpenVr,
    CloseVr,
    Reset,
    LoadHistory,
    HistoryLoaded(u64, Result<Vec<ScanRecord>, StoreError>),
    SelectHistory(ScanRecordId),
    OpenHistory,
    DeleteHistory(ScanRecordId),
    HistoryDeleted(ScanRecordId, Result<(), StoreError>),
}

/// Everything the kiosk needs, built before the window opens
struct Services {
    config: Config,
    store: Arc<Library>,
    backend: Arc<BackendClient>,
    camera: Arc<HttpRemoteCamera>,
    device: Arc<FrameFileDevice>,
}

impl Services {
    fn build(config: Config) -> Result<Self, StoreError> {
        let store = match &config.db_path {
            Some(path) => Library::open(path)?,
            None => Library::new()?,
        };

        let client = build_client(config.request_timeout());
        let backend = BackendClient::new(client.clone(), config.api_url.clone());
        let camera = HttpRemoteCamera::new(client, config.camera_url.clone());
        let device = FrameFileDevice::new(config.local_frame_path.clone());
        info!(
            "🗄️  Scans stored in {}, local camera frames read from {}",
            store.path().display(),
            device.path().display()
        );

        Ok(Self {
            store: Arc::new(store),
            backend: Arc::new(backend),
            camera: Arc::new(camera),
            device: Arc::new(device),
            config,
        })
    }
}

impl Kiosk {
    /// Create a new instance of the application
    fn new(services: Services) -> (Self, Task<Message>) {
        let Services {
            config,
            store,
            backend,
            camera,
            device,
        } = services;

        let chosen_source = config
            .preferred_source
            .unwrap_or(CaptureSourceKind::LocalCamera);
        let source = CaptureSource::new(chosen_source, device, camera.clone());
        let (workflow, join_events) =
            ScanWorkflow::new(source, backend.clone(), backend.clone(), store.clone());

        info!("🏺 Artifact kiosk ready (backend {}, camera {})", config.api_url, config.camera_url);

        let mut kiosk = Kiosk {
            workflow,
            join_events: Some(join_events),
            store,
            backend,
            camera,
            history: ScanHistory::new(),
            config,
            chosen_source,
            capabilities: None,
            status: "Checking devices...".to_string(),
        };

        let startup = Task::batch([
            kiosk.listen_for_joins(),
            kiosk.check_capabilities(),
            Task::done(Message::LoadHistory),
        ]);
        (kiosk, startup)
    }

    /// Forward every join event into the update loop
    fn listen_for_joins(&mut self) -> Task<Message> {
        let Some(receiver) = self.join_events.take() else {
            return Task::none();
        };
        let events = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|event| (event, receiver))
        });
        Task::run(events, Message::Join)
    }

    fn check_capabilities(&self) -> Task<Message> {
        let backend = Arc::clone(&self.backend);
        let camera = Arc::clone(&self.camera);
        Task::perform(
            async move { Capabilities::check(backend.as_ref(), camera.as_ref()).await },
            Message::CapabilitiesChecked,
        )
    }

    fn load_history(&mut self) -> Task<Message> {
        let generation = self.history.begin_load();
        let store = Arc::clone(&self.store);
        Task::perform(async move { store.list().await }, move |result| {
            Message::HistoryLoaded(generation, result)
        })
    }

    fn report(&mut self, err: WorkflowError) {
        warn!("⚠️  {}", err);
        self.status = err.to_string();
    }

    /// Handle application messages and update state
    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::CapabilitiesChecked(capabilities) => {
                self.capabilities = Some(capabilities);
                if self.config.preferred_source.is_none() {
                    self.chosen_source = capabilities.preferred_source();
                }
                self.status = if capabilities.backend.is_online() {
                    "Ready to scan.".to_string()
                } else {
                    "⚠️ Analysis server is not reachable.".to_string()
                };
                Task::none()
            }
            Message::SelectSource(kind) => {
                if self.workflow.state() != WorkflowState::Idle {
                    return Task::none();
                }
                self.chosen_source = kind;
                self.config.preferred_source = Some(kind);
                if let Err(e) = self.config.save() {
                    warn!("⚠️  Could not remember capture source: {}", e);
                }
                Task::none()
            }
            Message::StartScanning => {
                match self.workflow.start_scanning(self.chosen_source) {
                    Ok(state) => self.status = status_for(state).to_string(),
                    Err(e) => self.report(e),
                }
                Task::none()
            }
            Message::Capture => match self.workflow.capture() {
                Ok(pending) => {
                    let scan = pending.scan;
                    self.status = "Analyzing...".to_string();
                    Task::perform(pending.future, move |result| Message::Captured(scan, result))
                }
                Err(e) => {
                    self.report(e);
                    Task::none()
                }
            },
            Message::Captured(scan, result) => match self.workflow.capture_finished(scan, result) {
                Some(pending) => {
                    let scan = pending.scan;
                    Task::perform(pending.future, move |result| Message::Analyzed(scan, result))
                }
                None => {
                    self.status = status_for(self.workflow.state()).to_string();
                    Task::none()
                }
            },
            Message::Analyzed(scan, result) => {
                // The join runs on its own; its events come back through Message::Join
                let _join = self.workflow.analysis_finished(scan, result);
                self.status = status_for(self.workflow.state()).to_string();
                Task::none()
            }
            Message::Join(event) => {
                let persisted = matches!(event, JoinEvent::Persisted { outcome: Ok(_), .. });
                if let JoinEvent::Persisted { outcome: Err(e), .. } = &event {
                    error!("💾 Scan could not be saved: {}", e);
                }
                self.workflow.apply_join_event(event);
                if persisted {
                    return self.load_history();
                }
                Task::none()
            }
            Message::PollCamera => {
                let camera = Arc::clone(&self.camera);
                Task::perform(async move { camera.check().await }, Message::CameraStatus)
            }
            Message::CameraStatus(reachability) => {
                if !reachability.is_online() && self.workflow.stream_lost() {
                    self.status = status_for(self.workflow.state()).to_string();
                }
                Task::none()
            }
            Message::Retry => {
                match self.workflow.retry() {
                    Ok(state) => self.status = status_for(state).to_string(),
                    Err(e) => self.report(e),
                }
                Task::none()
            }
            Message::OpenVr => {
                if let Err(e) = self.workflow.open_vr() {
                    self.report(e);
                }
                Task::none()
            }
            Message::CloseVr => {
                if let Err(e) = self.workflow.close_vr() {
                    self.report(e);
                }
                Task::none()
            }
            Message::Reset => {
                self.workflow.reset();
                self.history.clear_selection();
                self.status = status_for(WorkflowState::Idle).to_string();
                self.check_capabilities()
            }
            Message::LoadHistory => self.load_history(),
            Message::HistoryLoaded(generation, result) => {
                match result {
                    Ok(records) => {
                        let count = records.len();
                        if self.history.finish_load(generation, records) {
                            info!("📚 {} scans in history", count);
                        }
                    }
                    Err(e) => warn!("⚠️  Could not load history: {}", e),
                }
                Task::none()
            }
            Message::SelectHistory(id) => {
                self.history.select(id);
                Task::none()
            }
            Message::OpenHistory => {
                if let Some(record) = self.history.selected() {
                    self.workflow.open_history_record(record);
                    self.status = status_for(self.workflow.state()).to_string();
                }
                Task::none()
            }
            Message::DeleteHistory(id) => {
                let store = Arc::clone(&self.store);
                Task::perform(async move { store.delete(id).await }, move |result| {
                    Message::HistoryDeleted(id, result)
                })
            }
            Message::HistoryDeleted(id, result) => {
                if self.history.apply_deletion(id, &result) {
                    self.status = format!("🗑️ Scan {} deleted.", id);
                    return self.load_history();
                }
                Task::none()
            }
        }
    }

    fn subscription(&self) -> Subscription<Message> {
        if self.workflow.state() == WorkflowState::Scanning
            && self.workflow.source_kind() == CaptureSourceKind::RemoteDevice
        {
            iced::time::every(CAMERA_POLL_INTERVAL).map(|_| Message::PollCamera)
        } else {
            Subscription::none()
        }
    }

    /// Build the user interface
    fn view(&self) -> Element<Message> {
        let body: Element<Message> = match self.workflow.state() {
            WorkflowState::Idle => self.view_idle(),
            WorkflowState::Scanning => self.view_scanning(),
            WorkflowState::Analyzing => text("🔬 Analyzing the object...").size(24).into(),
            WorkflowState::Result => self.view_result(),
            WorkflowState::VrMode => self.view_vr(),
            WorkflowState::PermissionDenied | WorkflowState::Error => self.view_problem(),
        };

        let content: Column<Message> = column![
            text("Artifact Kiosk").size(40),
            body,
            text(&self.status).size(16),
        ]
        .spacing(20)
        .padding(40)
        .align_x(Alignment::Center);

        container(scrollable(content))
            .width(Length::Fill)
            .height(Length::Fill)
            .center_x(Length::Fill)
            .into()
    }

    fn view_idle(&self) -> Element<Message> {
        let sources = CaptureSourceKind::ALL.iter().fold(Row::new().spacing(10), |row, &kind| {
            let label = if kind == self.chosen_source {
                format!("● {}", kind)
            } else {
                kind.to_string()
            };
            row.push(button(text(label)).on_press(Message::SelectSource(kind)).padding(10))
        });

        let reachability = match self.capabilities {
            Some(caps) => format!(
                "Backend: {:?} · Remote camera: {:?}",
                caps.backend, caps.remote_camera
            ),
            None => "Checking devices...".to_string(),
        };

        column![
            sources,
            text(reachability).size(14),
            button("Start scanning").on_press(Message::StartScanning).padding(12),
            self.view_history(),
        ]
        .spacing(16)
        .align_x(Alignment::Center)
        .into()
    }

    fn view_scanning(&self) -> Element<Message> {
        let preview = match self.workflow.stream_url() {
            Some(url) => format!("Live preview: {}", url),
            None if self.workflow.is_feed_live() => "Local camera is live.".to_string(),
            None => "Camera is not running.".to_string(),
        };
        column![
            text(preview).size(16),
            row![
                button("Capture").on_press(Message::Capture).padding(12),
                button("Cancel").on_press(Message::Reset).padding(12),
            ]
            .spacing(10),
        ]
        .spacing(16)
        .align_x(Alignment::Center)
        .into()
    }

    fn view_result(&self) -> Element<Message> {
        let Some(session) = self.workflow.session() else {
            return text("No scan").into();
        };
        let Some(analysis) = session.analysis.as_ref() else {
            return text("No analysis").into();
        };

        let mut details = column![
            text(&analysis.name).size(32),
            text(format!("Era: {}", analysis.era)),
            text(&analysis.description),
            text(format!("Usage: {}", analysis.usage)),
        ]
        .spacing(8);
        if let Some(advice) = &analysis.conservation_advice {
            details = details.push(text(format!("Conservation: {}", advice)));
        }

        let mut images = Row::new().spacing(16);
        if let Some(captured) = &session.captured {
            images = images.push(picture("Captured", captured));
        }
        for purpose in EnhancementPurpose::ALL {
            if let Some(slot) = session.slot(purpose) {
                let cell: Element<Message> = match (slot.status(), slot.image()) {
                    (SlotStatus::Ready, Some(payload)) => picture(purpose.label(), payload),
                    (SlotStatus::Pending, _) => text(format!("{}: generating...", purpose)).into(),
                    _ => match slot.error() {
                        Some(err) => text(format!("{}: not available ({})", purpose, err)).into(),
                        None => text(format!("{}: not available", purpose)).into(),
                    },
                };
                images = images.push(cell);
            }
        }

        let saved = match (session.stored(), session.save_error()) {
            (Some(stored), _) => format!(
                "💾 Saved as scan {} ({})",
                stored.id,
                stored.created_at.format("%Y-%m-%d %H:%M")
            ),
            (None, Some(err)) => format!("⚠️ Scan could not be saved: {}", err),
            (None, None) => "Saving when enhancements finish...".to_string(),
        };
        let origin = match session.origin {
            ScanOrigin::Live(source) => format!("Captured with the {}", source),
            ScanOrigin::History(id) => format!("From history, scan {}", id),
        };

        column![
            details,
            images,
            text(origin).size(14),
            text(saved).size(14),
            row![
                button("Open VR scene").on_press(Message::OpenVr).padding(10),
                button("New scan").on_press(Message::Reset).padding(10),
            ]
            .spacing(10),
        ]
        .spacing(16)
        .into()
    }

    fn view_vr(&self) -> Element<Message> {
        let scene = self
            .workflow
            .session()
            .and_then(|s| s.analysis.as_ref())
            .map(|a| {
                format!(
                    "{} · {}\n{}",
                    a.vr_scene_info.name, a.vr_scene_info.period, a.vr_scene_info.description
                )
            })
            .unwrap_or_default();
        column![
            text("🥽 VR scene").size(28),
            text(scene),
            button("Back to result").on_press(Message::CloseVr).padding(10),
        ]
        .spacing(16)
        .align_x(Alignment::Center)
        .into()
    }

    fn view_problem(&self) -> Element<Message> {
        let message = self.workflow.error_message().unwrap_or("Something went wrong.");
        let mut actions = Row::new().spacing(10);
        if self.workflow.state() == WorkflowState::PermissionDenied {
            actions = actions.push(button("Try again").on_press(Message::Retry).padding(10));
        }
        actions = actions.push(button("Start over").on_press(Message::Reset).padding(10));

        column![text(message).size(20), actions]
            .spacing(16)
            .align_x(Alignment::Center)
            .into()
    }

    fn view_history(&self) -> Element<Message> {
        if self.history.is_empty() {
            return text("No saved scans yet.").size(14).into();
        }
        let selected = self.history.selected().map(|r| r.id);

        let list = self.history.entries().iter().fold(Column::new().spacing(6), |list, record| {
            let marker = if Some(record.id) == selected { "▶ " } else { "" };
            list.push(
                row![
                    button(text(format!(
                        "{}{} · {} · {}",
                        marker,
                        record.content.name,
                        record.content.era,
                        record.created_at.format("%Y-%m-%d")
                    )))
                    .on_press(Message::SelectHistory(record.id)),
                    button("Delete").on_press(Message::DeleteHistory(record.id)),
                ]
                .spacing(8),
            )
        });

        column![
            text("Saved scans").size(20),
            list,
            button("Open selected")
                .on_press_maybe(selected.map(|_| Message::OpenHistory))
                .padding(8),
        ]
        .spacing(10)
        .into()
    }

    /// Set the application theme
    fn theme(&self) -> Theme {
        Theme::Dark
    }
}

fn picture<'a>(caption: &'a str, payload: &ImagePayload) -> Element<'a, Message> {
    let handle = iced::widget::image::Handle::from_bytes(payload.bytes().to_vec());
    column![iced::widget::image(handle).width(Length::Fixed(240.0)), text(caption).size(14)]
        .spacing(4)
        .align_x(Alignment::Center)
        .into()
}

fn status_for(state: WorkflowState) -> &'static str {
    match state {
        WorkflowState::Idle => "Ready to scan.",
        WorkflowState::Scanning => "Place the object and press Capture.",
        WorkflowState::Analyzing => "Analyzing...",
        WorkflowState::Result => "Analysis complete.",
        WorkflowState::VrMode => "VR scene open.",
        WorkflowState::PermissionDenied => "Camera permission needed.",
        WorkflowState::Error => "Scan failed.",
    }
}

fn main() -> iced::Result {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "artifact_kiosk=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load();
    let services = match Services::build(config) {
        Ok(services) => services,
        Err(e) => {
            error!("📁 Failed to open the scan database: {}", e);
            std::process::exit(1);
        }
    };

    iced::application("Artifact Kiosk", Kiosk::update, Kiosk::view)
        .subscription(Kiosk::subscription)
        .theme(Kiosk::theme)
        .centered()
        .run_with(move || Kiosk::new(services))
}
