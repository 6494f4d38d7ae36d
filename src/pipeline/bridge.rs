//! Frame bridge: pulls raw frames on a dedicated thread, converts them into
//! pooled display buffers and publishes the newest one.
//!
//! Publishing swaps an immutable [`PublishedFrame`] into an `ArcSwapOption`.
//! Readers load the handle once and keep it for the whole repaint; they never
//! block the acquisition thread and never see a buffer mid-conversion. The
//! pipeline is "latest wins": a frame published before anyone read it is
//! simply superseded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use tracing::{debug, error, info, instrument, warn};

use super::pool::{DisplayBuffer, DisplayPool};
use super::stats::{BridgeStats, FpsWindow, SharedCounters};
use crate::capture::{decoder, Camera, PixelFormat, RawFrame};
use crate::error::{BridgeError, CameraError, ConfigError};
use crate::BridgeConfig;

/// Upper bound on a single `poll_frame` wait, and so on how long `stop` takes
pub const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Called once from the acquisition thread when the camera reports an error
pub type FailureHandler = Box<dyn FnOnce(CameraError) + Send + 'static>;

/// The latest frame ready to render
#[derive(Debug)]
pub struct PublishedFrame {
    buffer: Arc<DisplayBuffer>,
    generation: u64,
    sequence: u64,
    format: PixelFormat,
    captured_at: Instant,
}

impl PublishedFrame {
    /// RGBA8 pixels, `height` rows of `pitch` bytes
    pub fn pixels(&self) -> &[u8] {
        self.buffer.pixels()
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn pitch(&self) -> usize {
        self.buffer.pitch()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Camera sequence number of the source frame
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Pixel format the camera delivered
    pub fn source_format(&self) -> PixelFormat {
        self.format
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

struct Shared {
    published: ArcSwapOption<PublishedFrame>,
    generation: AtomicU64,
    /// Highest generation any reader has loaded
    last_read: AtomicU64,
    counters: SharedCounters,
}

/// Render-side view of the bridge; cheap to clone
#[derive(Clone)]
pub struct FrameHandle {
    shared: Arc<Shared>,
}

impl FrameHandle {
    /// Latest published frame, without blocking
    pub fn current_frame(&self) -> Option<Arc<PublishedFrame>> {
        let frame = self.shared.published.load_full();
        if let Some(frame) = &frame {
            self.shared.last_read.fetch_max(frame.generation, Ordering::Relaxed);
        }
        frame
    }

    pub fn stats(&self) -> BridgeStats {
        self.shared.counters.snapshot()
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Option<Box<dyn Camera>>>,
}

/// Owns the acquisition thread and the published frame slot
pub struct FrameBridge {
    config: BridgeConfig,
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

impl FrameBridge {
    pub fn new(config: BridgeConfig) -> Result<Self, ConfigError> {
        if config.pool_size < 2 {
            return Err(ConfigError::PoolSize(config.pool_size));
        }
        Ok(Self {
            config,
            shared: Arc::new(Shared {
                published: ArcSwapOption::empty(),
                generation: AtomicU64::new(0),
                last_read: AtomicU64::new(0),
                counters: SharedCounters::default(),
            }),
            worker: None,
        })
    }

    pub fn handle(&self) -> FrameHandle {
        FrameHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn current_frame(&self) -> Option<Arc<PublishedFrame>> {
        self.handle().current_frame()
    }

    /// Latest published frame without counting it as read by the viewer
    pub fn peek_frame(&self) -> Option<Arc<PublishedFrame>> {
        self.shared.published.load_full()
    }

    pub fn stats(&self) -> BridgeStats {
        self.shared.counters.snapshot()
    }

    /// Whether the acquisition thread is alive
    pub fn is_pulling(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Start pulling from an acquiring camera.
    ///
    /// On failure the camera is handed back untouched.
    #[instrument(skip_all, fields(pool_size = self.config.pool_size))]
    pub fn start(
        &mut self,
        camera: Box<dyn Camera>,
        on_failure: FailureHandler,
    ) -> Result<(), (BridgeError, Box<dyn Camera>)> {
        if self.worker.is_some() {
            return Err((BridgeError::AlreadyRunning, camera));
        }
        let pool = match DisplayPool::new(self.config.pool_size) {
            Ok(pool) => pool,
            Err(e) => return Err((e.into(), camera)),
        };

        self.shared.counters.reset();
        let stop = Arc::new(AtomicBool::new(false));
        // The camera follows the thread through a channel so that a failed
        // spawn leaves it with us
        let (tx, rx) = flume::bounded::<Box<dyn Camera>>(1);

        let mut pull = PullLoop {
            pool,
            shared: Arc::clone(&self.shared),
            stop: Arc::clone(&stop),
            fps: FpsWindow::new(),
            last_sequence: None,
        };
        let core = self.config.acquisition_core;
        let spawned = thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || {
                let mut camera = rx.recv().ok()?;
                if let Some(core) = core {
                    pin_to_core(core);
                }
                pull.run(camera.as_mut(), on_failure);
                Some(camera)
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => return Err((e.into(), camera)),
        };
        if let Err(flume::SendError(camera)) = tx.send(camera) {
            let _ = handle.join();
            return Err((BridgeError::Handoff, camera));
        }

        info!("Frame bridge started");
        self.worker = Some(Worker { stop, handle });
        Ok(())
    }

    /// Halt pulling, clear the published frame and return the camera.
    ///
    /// Returns within one poll timeout. Safe to call when not running.
    pub fn stop(&mut self) -> Option<Box<dyn Camera>> {
        let camera = self.join();
        self.shared.published.store(None);
        camera
    }

    /// Collect the camera from a thread that ended on its own, keeping the
    /// last published frame on screen.
    pub fn reclaim(&mut self) -> Option<Box<dyn Camera>> {
        self.join()
    }

    fn join(&mut self) -> Option<Box<dyn Camera>> {
        let worker = self.worker.take()?;
        worker.stop.store(true, Ordering::Release);
        match worker.handle.join() {
            Ok(camera) => {
                info!("Frame bridge stopped");
                camera
            }
            Err(_) => {
                error!("Acquisition thread panicked; camera lost");
                None
            }
        }
    }
}

impl Drop for FrameBridge {
    fn drop(&mut self) {
        if let Some(mut camera) = self.stop() {
            let _ = camera.stop_acquisition();
            camera.close();
        }
    }
}

fn pin_to_core(core: usize) {
    let id = core_affinity::get_core_ids().and_then(|ids| ids.into_iter().find(|id| id.id == core));
    match id {
        Some(id) if core_affinity::set_for_current(id) => info!(core, "Acquisition thread pinned"),
        _ => warn!(core, "Could not pin acquisition thread"),
    }
}

/// State owned by the acquisition thread
struct PullLoop {
    pool: DisplayPool,
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    fps: FpsWindow,
    last_sequence: Option<u64>,
}

impl PullLoop {
    fn run(&mut self, camera: &mut dyn Camera, on_failure: FailureHandler) {
        while !self.stop.load(Ordering::Acquire) {
            match camera.poll_frame(POLL_TIMEOUT) {
                Ok(Some(frame)) => self.deliver(frame),
                Ok(None) => continue,
                Err(e) => {
                    error!("Camera error, stopping acquisition: {e}");
                    on_failure(e);
                    // Everything but the frozen published frame is released
                    // when the pool drops with this thread
                    return;
                }
            }
        }
        debug!("Pull loop exiting on stop request");
    }

    fn deliver(&mut self, frame: RawFrame) {
        let counters = &self.shared.counters;
        counters.frames_received.fetch_add(1, Ordering::Relaxed);

        let sequence = frame.meta.sequence;
        if self.last_sequence.is_some_and(|last| sequence < last) {
            counters.frames_out_of_order.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("camview_frames_dropped").increment(1);
            debug!(sequence, "Dropping out-of-order frame");
            return;
        }

        let busy = self.pool.in_use();
        let Some((index, buffer)) = self.pool.checkout() else {
            counters.frames_no_buffer.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("camview_frames_dropped").increment(1);
            debug!(sequence, "No free display buffer, dropping frame");
            return;
        };
        counters.record_in_use(busy + 1);

        let started = Instant::now();
        match decoder::decode_frame(&frame, buffer.pixels_mut()) {
            Ok((width, height)) => buffer.set_dimensions(width, height),
            Err(e) => {
                counters.frames_discarded.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("camview_frames_discarded").increment(1);
                warn!(sequence, "Discarding frame: {e}");
                return;
            }
        }
        metrics::histogram!("camview_convert_time_us").record(started.elapsed().as_micros() as f64);

        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        buffer.set_generation(generation);
        let buffer = self.pool.publish(index, generation);

        let published = Arc::new(PublishedFrame {
            buffer,
            generation,
            sequence,
            format: frame.meta.format,
            captured_at: frame.timestamp,
        });
        if let Some(previous) = self.shared.published.swap(Some(published)) {
            if previous.generation > self.shared.last_read.load(Ordering::Relaxed) {
                counters.frames_superseded.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.last_sequence = Some(sequence);
        counters.frames_published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("camview_frames_published").increment(1);
        counters.set_fps(self.fps.record(frame.timestamp));
        counters.record_in_use(self.pool.in_use());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FeatureDescriptor, FeatureSetting, FrameMetadata};
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed script of poll results, then reports empty forever
    struct ScriptedCamera {
        script: VecDeque<Result<Option<RawFrame>, CameraError>>,
        idle_wait: Duration,
    }

    impl ScriptedCamera {
        fn new(script: Vec<Result<Option<RawFrame>, CameraError>>) -> Box<Self> {
            Box::new(Self {
                script: script.into(),
                idle_wait: Duration::from_millis(5),
            })
        }

        /// Once the script runs out, every poll blocks for its whole timeout
        fn stalling(script: Vec<Result<Option<RawFrame>, CameraError>>) -> Box<Self> {
            Box::new(Self {
                script: script.into(),
                idle_wait: Duration::MAX,
            })
        }
    }

    impl Camera for ScriptedCamera {
        fn open(&mut self, _: &[FeatureSetting]) -> Result<(), CameraError> {
            Ok(())
        }
        fn configure(&mut self, _: &[FeatureSetting]) -> Result<(), CameraError> {
            Ok(())
        }
        fn features(&self) -> Vec<FeatureDescriptor> {
            Vec::new()
        }
        fn start_acquisition(&mut self) -> Result<(), CameraError> {
            Ok(())
        }
        fn stop_acquisition(&mut self) -> Result<(), CameraError> {
            Ok(())
        }
        fn poll_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>, CameraError> {
            match self.script.pop_front() {
                Some(next) => next,
                None => {
                    thread::sleep(timeout.min(self.idle_wait));
                    Ok(None)
                }
            }
        }
        fn close(&mut self) {}
    }

    fn mono(sequence: u64) -> Result<Option<RawFrame>, CameraError> {
        Ok(Some(RawFrame::new(
            Bytes::from(vec![sequence as u8; 4]),
            FrameMetadata {
                sequence,
                width: 2,
                height: 2,
                stride: 0,
                format: PixelFormat::Mono8,
                device_timestamp: None,
            },
        )))
    }

    fn bridge() -> FrameBridge {
        FrameBridge::new(BridgeConfig {
            pool_size: 3,
            acquisition_core: None,
        })
        .unwrap()
    }

    fn ignore_failure() -> FailureHandler {
        Box::new(|_| {})
    }

    fn wait_for(bridge: &FrameBridge, pred: impl Fn(&BridgeStats) -> bool) -> BridgeStats {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let stats = bridge.stats();
            if pred(&stats) {
                return stats;
            }
            assert!(Instant::now() < deadline, "timed out: {stats:?}");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn rejects_pool_smaller_than_two() {
        let err = FrameBridge::new(BridgeConfig {
            pool_size: 1,
            acquisition_core: None,
        })
        .err();
        assert!(matches!(err, Some(ConfigError::PoolSize(1))));
    }

    #[test]
    fn latest_frame_wins() {
        let mut bridge = bridge();
        bridge
            .start(ScriptedCamera::new(vec![mono(1), mono(2), mono(3)]), ignore_failure())
            .map_err(|(e, _)| e)
            .unwrap();

        let stats = wait_for(&bridge, |s| s.frames_published == 3);
        let frame = bridge.current_frame().unwrap();
        assert_eq!(frame.sequence(), 3);
        assert_eq!(frame.pixels()[0], 3);
        assert_eq!(stats.frames_superseded, 2);
        assert!(stats.buffers_in_use <= 3);
        assert!(stats.buffers_in_use_peak <= 3);

        assert!(bridge.stop().is_some());
        assert!(bridge.current_frame().is_none());
    }

    #[test]
    fn out_of_order_frames_are_dropped() {
        let mut bridge = bridge();
        bridge
            .start(ScriptedCamera::new(vec![mono(5), mono(4), mono(6)]), ignore_failure())
            .map_err(|(e, _)| e)
            .unwrap();

        let stats = wait_for(&bridge, |s| s.frames_received == 3);
        assert_eq!(stats.frames_out_of_order, 1);
        assert_eq!(bridge.current_frame().unwrap().sequence(), 6);
        bridge.stop();
    }

    #[test]
    fn corrupt_frames_are_discarded_not_fatal() {
        let truncated = Ok(Some(RawFrame::new(
            Bytes::from_static(&[0; 2]),
            FrameMetadata {
                sequence: 2,
                width: 4,
                height: 4,
                stride: 0,
                format: PixelFormat::Rgb8,
                device_timestamp: None,
            },
        )));
        let mut bridge = bridge();
        bridge
            .start(ScriptedCamera::new(vec![mono(1), truncated, mono(3)]), ignore_failure())
            .map_err(|(e, _)| e)
            .unwrap();

        let stats = wait_for(&bridge, |s| s.frames_received == 3);
        assert_eq!(stats.frames_discarded, 1);
        assert!(bridge.is_pulling());
        bridge.stop();
    }

    #[test]
    fn camera_error_reports_and_freezes_last_frame() {
        let reported = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&reported);
        let mut bridge = bridge();
        bridge
            .start(
                ScriptedCamera::new(vec![mono(1), Err(CameraError::Disconnected)]),
                Box::new(move |e| *sink.lock().unwrap() = Some(e.to_string())),
            )
            .map_err(|(e, _)| e)
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while bridge.is_pulling() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(reported.lock().unwrap().as_deref(), Some("camera disconnected"));

        // The last good frame stays visible after the thread is reclaimed
        assert!(bridge.reclaim().is_some());
        assert_eq!(bridge.current_frame().unwrap().sequence(), 1);
    }

    #[test]
    fn stop_interrupts_a_blocked_poll_within_its_timeout() {
        let mut bridge = bridge();
        bridge
            .start(ScriptedCamera::stalling(vec![mono(1)]), ignore_failure())
            .map_err(|(e, _)| e)
            .unwrap();
        wait_for(&bridge, |s| s.frames_published == 1);
        // Let the thread settle into a poll that waits out the full timeout
        thread::sleep(POLL_TIMEOUT / 5);

        let started = Instant::now();
        let camera = bridge.stop();
        let took = started.elapsed();
        assert!(camera.is_some());
        assert!(took < POLL_TIMEOUT * 2, "stop took {took:?}");
        assert!(!bridge.is_pulling());
    }

    #[test]
    fn second_start_hands_camera_back() {
        let mut bridge = bridge();
        bridge
            .start(ScriptedCamera::new(vec![]), ignore_failure())
            .map_err(|(e, _)| e)
            .unwrap();
        let (err, _camera) = bridge
            .start(ScriptedCamera::new(vec![]), ignore_failure())
            .unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyRunning));
        bridge.stop();
    }

    #[test]
    fn stop_without_start_is_harmless() {
        let mut bridge = bridge();
        assert!(bridge.stop().is_none());
        assert!(bridge.stop().is_none());
    }
}
