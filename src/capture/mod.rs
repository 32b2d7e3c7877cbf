//! Capture controller.
//!
//! Consumes trigger events (device unlocked, device booted) and runs the
//! single-shot capture pipeline against the camera gateway:
//!
//! ```text
//! Idle -> Opening -> Configuring -> Capturing -> Saving -> Cleanup -> Idle
//! ```
//!
//! `Cleanup` is reachable from every non-idle state and is the one place
//! hardware handles are released; every attempt passes through it whether
//! it saved a photo or failed. The camera is a system-wide exclusive
//! resource, so a trigger arriving while an attempt is in flight is
//! ignored rather than queued.
//!
//! Failures never leave this module: an attempt's only observable effects
//! are a photo appearing in the store (or not), the state sequence on the
//! watch channel, and log lines.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::sync::{mpsc, watch};
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::camera::{
    jpeg_orientation, largest_still_size, CameraDevice, CameraGateway, CaptureStream, Facing,
    StillRequest,
};
use crate::config::EnabledFlag;
use crate::error::{Error, Result};
use crate::store::{MediaStore, PendingRef, PhotoRef};
use crate::trigger::TriggerEvent;

const JPEG_MIME: &str = "image/jpeg";

/// States of the capture pipeline, observable while an attempt runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    /// Enumerating devices and opening the front camera.
    Opening,
    /// Selecting an output size and binding the image stream.
    Configuring,
    /// Still request submitted, waiting for image delivery.
    Capturing,
    /// Writing the captured bytes to the photo store.
    Saving,
    /// Releasing hardware handles; entered on success and failure alike.
    Cleanup,
}

impl CaptureState {
    pub fn label(&self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Opening => "opening",
            CaptureState::Configuring => "configuring",
            CaptureState::Capturing => "capturing",
            CaptureState::Saving => "saving",
            CaptureState::Cleanup => "cleanup",
        }
    }
}

/// Exclusive ownership of one in-flight capture's hardware handles.
///
/// Handles are registered the moment they are acquired and given back only
/// in [`release`](Self::release), the single exit gate every attempt
/// passes through.
struct CaptureSession<D: CameraDevice> {
    device: Option<D>,
    stream: Option<D::Stream>,
}

impl<D: CameraDevice> CaptureSession<D> {
    fn new() -> Self {
        Self {
            device: None,
            stream: None,
        }
    }

    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
        if let Some(mut device) = self.device.take() {
            device.close();
        }
    }
}

/// Handle to a spawned controller.
pub struct CaptureHandle {
    task: JoinHandle<()>,
    state: watch::Receiver<CaptureState>,
}

impl CaptureHandle {
    /// Observe pipeline state transitions.
    pub fn state(&self) -> watch::Receiver<CaptureState> {
        self.state.clone()
    }

    /// Wait for the controller to stop. It stops once the trigger channel
    /// closes and any in-flight attempt has finished.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Trigger-driven single-shot capture controller.
pub struct CaptureController<G: CameraGateway, S: MediaStore> {
    gateway: Arc<G>,
    store: Arc<S>,
    album: String,
    enabled: EnabledFlag,
    image_wait: Duration,
    state: Arc<watch::Sender<CaptureState>>,
}

impl<G: CameraGateway, S: MediaStore> CaptureController<G, S> {
    pub fn new(
        gateway: Arc<G>,
        store: Arc<S>,
        album: impl Into<String>,
        enabled: EnabledFlag,
        image_wait: Duration,
    ) -> Self {
        let (state, _) = watch::channel(CaptureState::Idle);
        Self {
            gateway,
            store,
            album: album.into(),
            enabled,
            image_wait,
            state: Arc::new(state),
        }
    }

    /// Spawn the controller's event loop over the given trigger stream.
    pub fn spawn(self, triggers: mpsc::Receiver<TriggerEvent>) -> CaptureHandle {
        let state = self.state.subscribe();
        let task = tokio::spawn(self.run(triggers));
        CaptureHandle { task, state }
    }

    async fn run(self, mut triggers: mpsc::Receiver<TriggerEvent>) {
        // Outcome of one select round while an attempt is in flight.
        enum Step {
            Finished,
            Busy,
            Shutdown,
        }

        let mut in_flight: Option<JoinHandle<()>> = None;
        loop {
            match in_flight.take() {
                None => match triggers.recv().await {
                    Some(event) => in_flight = self.handle_trigger(event),
                    None => break,
                },
                Some(mut attempt) => {
                    // The guard below is the only concurrency control the
                    // pipeline needs: triggers and attempt completion are
                    // both observed here, on one task.
                    let step = tokio::select! {
                        _ = &mut attempt => Step::Finished,
                        maybe = triggers.recv() => match maybe {
                            Some(event) => {
                                debug!(event = event.label(), "capture in progress, ignoring trigger");
                                Step::Busy
                            }
                            None => Step::Shutdown,
                        },
                    };
                    match step {
                        Step::Finished => {}
                        Step::Busy => in_flight = Some(attempt),
                        Step::Shutdown => {
                            let _ = attempt.await;
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Start an attempt for this trigger, unless captures are disabled or
    /// one is already running (the caller guarantees the latter).
    fn handle_trigger(&self, event: TriggerEvent) -> Option<JoinHandle<()>> {
        if !self.enabled.get() {
            debug!(event = event.label(), "capture disabled, ignoring trigger");
            return None;
        }
        info!(event = event.label(), "trigger accepted, starting capture");
        let gateway = Arc::clone(&self.gateway);
        let store = Arc::clone(&self.store);
        let album = self.album.clone();
        let state = Arc::clone(&self.state);
        let image_wait = self.image_wait;
        Some(tokio::spawn(async move {
            run_attempt(gateway, store, album, state, image_wait).await;
        }))
    }
}

/// One full traversal of the pipeline, ending back at idle with all
/// handles released no matter what happened in between.
async fn run_attempt<G: CameraGateway, S: MediaStore>(
    gateway: Arc<G>,
    store: Arc<S>,
    album: String,
    state: Arc<watch::Sender<CaptureState>>,
    image_wait: Duration,
) {
    let started = Instant::now();
    let mut session = CaptureSession::<G::Device>::new();
    let result = attempt(&*gateway, &store, &album, &state, image_wait, &mut session).await;

    transition(&state, CaptureState::Cleanup);
    session.release();
    transition(&state, CaptureState::Idle);

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(photo) => info!(%photo, elapsed_ms, "capture saved"),
        Err(e) => warn!(error = %e, elapsed_ms, "capture attempt failed"),
    }
}

async fn attempt<G: CameraGateway, S: MediaStore>(
    gateway: &G,
    store: &Arc<S>,
    album: &str,
    state: &watch::Sender<CaptureState>,
    image_wait: Duration,
    session: &mut CaptureSession<G::Device>,
) -> Result<PhotoRef> {
    transition(state, CaptureState::Opening);
    let info = gateway
        .devices()?
        .into_iter()
        .find(|d| d.facing == Facing::Front)
        .ok_or(Error::NoFrontCamera)?;
    let device = gateway.open(&info.id).await?;
    let device = session.device.insert(device);

    transition(state, CaptureState::Configuring);
    let sizes = device.still_sizes()?;
    let size = largest_still_size(&sizes)
        .ok_or_else(|| Error::SessionConfig("no supported still sizes".to_string()))?;
    let stream = device.create_stream(size).await?;
    let stream = session.stream.insert(stream);
    let orientation = jpeg_orientation(
        info.sensor_orientation,
        gateway.display_rotation(),
        info.facing,
    );
    debug!(camera = %info.id, %size, orientation, "capture session configured");

    transition(state, CaptureState::Capturing);
    stream
        .submit(StillRequest {
            jpeg_orientation: orientation,
        })
        .await?;
    // Delivery is decoupled from request completion and the gateway gives
    // no guarantee beyond "eventually"; do not wait forever.
    let bytes = match tokio::time::timeout(image_wait, stream.next_image()).await {
        Ok(delivered) => delivered?,
        Err(_) => return Err(Error::CaptureTimedOut(image_wait)),
    };

    transition(state, CaptureState::Saving);
    let display_name = format!("IMG_{}.jpg", Local::now().format("%Y%m%d_%H%M%S"));
    let store = Arc::clone(store);
    let album = album.to_string();
    task::spawn_blocking(move || save_photo(store.as_ref(), &album, &display_name, &bytes))
        .await
        .map_err(|e| Error::Save(format!("save task failed: {e}")))?
}

/// Reserve, write and finalize one photo. A failed write or finalize
/// discards the reserved entry so no pending row outlives the attempt.
fn save_photo<S: MediaStore>(
    store: &S,
    album: &str,
    display_name: &str,
    bytes: &[u8],
) -> Result<PhotoRef> {
    let pending: PendingRef = store
        .reserve(display_name, JPEG_MIME, album)
        .map_err(|e| Error::Save(e.to_string()))?;
    if let Err(e) = store.write(&pending, bytes) {
        store.discard(pending);
        return Err(Error::Save(e.to_string()));
    }
    match store.finalize(pending) {
        Ok(photo) => Ok(photo),
        Err(e) => {
            store.discard(pending);
            Err(Error::Save(e.to_string()))
        }
    }
}

fn transition(state: &watch::Sender<CaptureState>, next: CaptureState) {
    let prev = *state.borrow();
    if prev != next {
        debug!(from = prev.label(), to = next.label(), "capture state");
    }
    let _ = state.send(next);
}
