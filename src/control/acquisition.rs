//! Acquisition state machine driving one camera and the frame bridge.
//!
//! The control lives on the UI thread. The only thing that crosses back from
//! the acquisition thread is the failure callback, which moves the shared
//! state from `Running` to `Failed` with a compare-exchange; commands issued
//! on the UI thread use the same cell, so whichever transition lands first
//! wins and the other side sees it.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, error, info, instrument, warn};

use super::preconfig::Preconfiguration;
use crate::capture::{Camera, FeatureDescriptor, FeatureSetting};
use crate::error::{AcquisitionError, CameraError, ConfigError};
use crate::pipeline::{FrameBridge, FrameHandle};
use crate::BridgeConfig;

/// Pending events kept for subscribers before new ones are dropped
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AcquisitionState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Failed = 4,
}

impl AcquisitionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Notifications for the UI
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    StateChanged {
        from: AcquisitionState,
        to: AcquisitionState,
    },
    /// Acquisition stopped on an error; the message is also kept as `last_error`
    Failed(String),
}

/// Boundary to an interactive feature editor.
///
/// Consulted only when a camera has no preconfiguration. Receives the
/// camera's editable features and returns the edits to apply.
pub trait PropertyEditor: Send {
    fn edit(&mut self, camera_id: &str, features: &[FeatureDescriptor]) -> Vec<FeatureSetting>;
}

struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: AcquisitionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> AcquisitionState {
        AcquisitionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition(&self, from: AcquisitionState, to: AcquisitionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// State shared with the failure callback on the acquisition thread
struct Shared {
    state: StateCell,
    last_error: ArcSwapOption<String>,
    events: Sender<AcquisitionEvent>,
}

impl Shared {
    fn emit(&self, event: AcquisitionEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            debug!(?event, "Event queue full, dropping event");
        }
    }

    /// Compare-exchange `from -> to`, announcing the change
    fn transition(&self, from: AcquisitionState, to: AcquisitionState) -> bool {
        let moved = self.state.transition(from, to);
        if moved {
            debug!(%from, %to, "Acquisition state changed");
            self.emit(AcquisitionEvent::StateChanged { from, to });
        }
        moved
    }

    fn fail(&self, from: AcquisitionState, error: &AcquisitionError) -> bool {
        if !self.transition(from, AcquisitionState::Failed) {
            return false;
        }
        let message = error.to_string();
        error!("Acquisition failed: {message}");
        self.last_error.store(Some(Arc::new(message.clone())));
        self.emit(AcquisitionEvent::Failed(message));
        true
    }
}

struct Run {
    camera_id: String,
    started: Instant,
}

/// Starts and stops a camera together with the frame bridge
pub struct AcquisitionControl {
    shared: Arc<Shared>,
    events: Receiver<AcquisitionEvent>,
    /// Held here whenever the bridge does not own it
    camera: Option<Box<dyn Camera>>,
    bridge: FrameBridge,
    preconfig: Preconfiguration,
    editor: Option<Box<dyn PropertyEditor>>,
    run: Option<Run>,
}

impl AcquisitionControl {
    pub fn new(
        camera: Box<dyn Camera>,
        bridge: BridgeConfig,
        preconfig: Preconfiguration,
    ) -> Result<Self, ConfigError> {
        let (tx, rx) = flume::bounded(EVENT_CAPACITY);
        Ok(Self {
            shared: Arc::new(Shared {
                state: StateCell::new(AcquisitionState::Idle),
                last_error: ArcSwapOption::empty(),
                events: tx,
            }),
            events: rx,
            camera: Some(camera),
            bridge: FrameBridge::new(bridge)?,
            preconfig,
            editor: None,
            run: None,
        })
    }

    pub fn with_editor(mut self, editor: Box<dyn PropertyEditor>) -> Self {
        self.editor = Some(editor);
        self
    }

    pub fn status(&self) -> AcquisitionState {
        self.shared.state.load()
    }

    /// Message of the error that last moved the control to `Failed`
    pub fn last_error(&self) -> Option<Arc<String>> {
        self.shared.last_error.load_full()
    }

    pub fn subscribe(&self) -> Receiver<AcquisitionEvent> {
        self.events.clone()
    }

    /// Render-side access to published frames
    pub fn frames(&self) -> FrameHandle {
        self.bridge.handle()
    }

    /// Camera id of the current run
    pub fn camera_id(&self) -> Option<&str> {
        self.run.as_ref().map(|run| run.camera_id.as_str())
    }

    /// Start with the preconfigured settings for `camera_id`, or with driver
    /// defaults plus whatever the property editor returns
    pub fn start(&mut self, camera_id: &str) -> Result<(), AcquisitionError> {
        let preset = self.preconfig.lookup(camera_id).map(|config| config.features.clone());
        match &preset {
            Some(features) => info!(camera_id, features = features.len(), "Using preconfiguration"),
            None => debug!(camera_id, "No preconfiguration"),
        }
        self.launch(camera_id, preset)
    }

    /// Start with explicitly supplied settings, bypassing preconfiguration
    /// and the property editor
    pub fn start_with(&mut self, camera_id: &str, settings: Vec<FeatureSetting>) -> Result<(), AcquisitionError> {
        self.launch(camera_id, Some(settings))
    }

    /// Stop acquisition and release the camera. No-op unless running.
    #[instrument(skip(self))]
    pub fn stop(&mut self) {
        if !self.shared.transition(AcquisitionState::Running, AcquisitionState::Stopping) {
            debug!(state = %self.status(), "Stop ignored");
            return;
        }
        if let Some(mut camera) = self.bridge.stop() {
            if let Err(e) = camera.stop_acquisition() {
                warn!("Stopping acquisition: {e}");
            }
            camera.close();
            self.camera = Some(camera);
        }
        self.run = None;
        self.shared.transition(AcquisitionState::Stopping, AcquisitionState::Idle);
        info!("Acquisition stopped");
    }

    /// Leave `Failed`, closing the camera and clearing the frozen frame
    pub fn reset(&mut self) {
        if self.status() != AcquisitionState::Failed {
            return;
        }
        if let Some(camera) = self.bridge.stop() {
            self.release(camera);
        }
        self.run = None;
        self.shared.last_error.store(None);
        self.shared.transition(AcquisitionState::Failed, AcquisitionState::Idle);
    }

    /// One-line summary for a status bar
    pub fn statistics(&self) -> String {
        let Some(run) = self.run.as_ref().filter(|_| self.status() == AcquisitionState::Running) else {
            return "stopped".to_string();
        };
        let stats = self.bridge.stats();
        let (width, height, format) = match self.bridge.peek_frame() {
            Some(frame) => (frame.width(), frame.height(), frame.source_format().to_string()),
            None => (0, 0, "-".to_string()),
        };
        format!(
            "{width}x{height} {format} {:.1} fps elapsed {} {} images",
            stats.fps,
            format_elapsed(run.started.elapsed()),
            stats.frames_published
        )
    }

    #[instrument(skip(self, settings), fields(preset = settings.is_some()))]
    fn launch(&mut self, camera_id: &str, settings: Option<Vec<FeatureSetting>>) -> Result<(), AcquisitionError> {
        match self.status() {
            AcquisitionState::Idle => {}
            AcquisitionState::Failed => self.recover(),
            other => return Err(AcquisitionError::InvalidState(other)),
        }
        if !self.shared.transition(AcquisitionState::Idle, AcquisitionState::Starting) {
            return Err(AcquisitionError::InvalidState(self.status()));
        }

        let Some(mut camera) = self.camera.take() else {
            let err = AcquisitionError::NoCamera;
            self.shared.fail(AcquisitionState::Starting, &err);
            return Err(err);
        };

        if let Err(source) = self.prepare(camera.as_mut(), camera_id, settings) {
            camera.close();
            self.camera = Some(camera);
            let err = AcquisitionError::CameraOpen {
                camera_id: camera_id.to_string(),
                source,
            };
            self.shared.fail(AcquisitionState::Starting, &err);
            return Err(err);
        }

        // Running before the bridge starts, so an immediate camera error on
        // the acquisition thread finds the state it expects
        self.shared.transition(AcquisitionState::Starting, AcquisitionState::Running);
        self.run = Some(Run {
            camera_id: camera_id.to_string(),
            started: Instant::now(),
        });

        let shared = Arc::clone(&self.shared);
        let on_failure = Box::new(move |e: CameraError| {
            shared.fail(AcquisitionState::Running, &AcquisitionError::Acquisition(e));
        });
        if let Err((e, mut camera)) = self.bridge.start(camera, on_failure) {
            let _ = camera.stop_acquisition();
            camera.close();
            self.camera = Some(camera);
            let err = AcquisitionError::Bridge(e);
            self.shared.fail(AcquisitionState::Running, &err);
            return Err(err);
        }

        info!(camera_id, "Acquisition running");
        Ok(())
    }

    fn prepare(
        &mut self,
        camera: &mut dyn Camera,
        camera_id: &str,
        settings: Option<Vec<FeatureSetting>>,
    ) -> Result<(), CameraError> {
        match settings {
            Some(settings) => camera.open(&settings)?,
            None => {
                camera.open(&[])?;
                if let Some(editor) = self.editor.as_mut() {
                    let edits = editor.edit(camera_id, &camera.features());
                    if !edits.is_empty() {
                        camera.configure(&edits)?;
                    }
                }
            }
        }
        camera.start_acquisition()
    }

    /// Collect the camera from a failed run, keeping the frozen frame until
    /// new frames replace it
    fn recover(&mut self) {
        if let Some(camera) = self.bridge.reclaim() {
            self.release(camera);
        }
        self.run = None;
        self.shared.transition(AcquisitionState::Failed, AcquisitionState::Idle);
    }

    fn release(&mut self, mut camera: Box<dyn Camera>) {
        // The camera may already have stopped on its own
        let _ = camera.stop_acquisition();
        camera.close();
        self.camera = Some(camera);
    }
}

impl Drop for AcquisitionControl {
    fn drop(&mut self) {
        self.stop();
        if self.status() == AcquisitionState::Failed {
            if let Some(camera) = self.bridge.stop() {
                self.release(camera);
            }
        }
        if let Some(camera) = self.camera.as_mut() {
            camera.close();
        }
    }
}

/// `h:mm:ss`
fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}
