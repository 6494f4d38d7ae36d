//! Acquisition counters shared between the bridge thread and readers

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// Capture instants kept for the frame rate estimate
const FPS_WINDOW: usize = 32;

/// Counters written by the acquisition thread
#[derive(Default)]
pub(crate) struct BridgeCounters {
    pub frames_received: AtomicU64,
    pub frames_published: AtomicU64,
    /// Published but replaced before any reader saw them
    pub frames_superseded: AtomicU64,
    /// Older than an already published frame
    pub frames_out_of_order: AtomicU64,
    /// No free display buffer
    pub frames_no_buffer: AtomicU64,
    /// Conversion failed (incomplete or corrupt)
    pub frames_discarded: AtomicU64,
    pub buffers_in_use: AtomicUsize,
    pub buffers_in_use_peak: AtomicUsize,
    /// f64 bits of the current estimate
    fps_bits: AtomicU64,
}

/// Padded so the hot counters don't share a line with the published handle
pub(crate) type SharedCounters = CachePadded<BridgeCounters>;

impl BridgeCounters {
    pub fn set_fps(&self, fps: f64) {
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub fn record_in_use(&self, in_use: usize) {
        self.buffers_in_use.store(in_use, Ordering::Relaxed);
        self.buffers_in_use_peak.fetch_max(in_use, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            frames_superseded: self.frames_superseded.load(Ordering::Relaxed),
            frames_out_of_order: self.frames_out_of_order.load(Ordering::Relaxed),
            frames_no_buffer: self.frames_no_buffer.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            buffers_in_use: self.buffers_in_use.load(Ordering::Relaxed),
            buffers_in_use_peak: self.buffers_in_use_peak.load(Ordering::Relaxed),
            fps: f64::from_bits(self.fps_bits.load(Ordering::Relaxed)),
        }
    }

    /// Zero everything for a new acquisition run
    pub fn reset(&self) {
        for counter in [
            &self.frames_received,
            &self.frames_published,
            &self.frames_superseded,
            &self.frames_out_of_order,
            &self.frames_no_buffer,
            &self.frames_discarded,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.buffers_in_use.store(0, Ordering::Relaxed);
        self.buffers_in_use_peak.store(0, Ordering::Relaxed);
        self.set_fps(0.0);
    }
}

/// Point-in-time copy of the bridge counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BridgeStats {
    pub frames_received: u64,
    pub frames_published: u64,
    pub frames_superseded: u64,
    pub frames_out_of_order: u64,
    pub frames_no_buffer: u64,
    pub frames_discarded: u64,
    pub buffers_in_use: usize,
    pub buffers_in_use_peak: usize,
    pub fps: f64,
}

impl BridgeStats {
    /// Frames that never reached the screen
    pub fn frames_dropped(&self) -> u64 {
        self.frames_superseded + self.frames_out_of_order + self.frames_no_buffer + self.frames_discarded
    }
}

/// Rolling frame rate over the last few capture instants
pub(crate) struct FpsWindow {
    instants: HeapRb<Instant>,
}

impl FpsWindow {
    pub fn new() -> Self {
        Self {
            instants: HeapRb::new(FPS_WINDOW),
        }
    }

    pub fn record(&mut self, at: Instant) -> f64 {
        self.instants.push_overwrite(at);
        let n = self.instants.occupied_len();
        if n < 2 {
            return 0.0;
        }
        let mut iter = self.instants.iter();
        let (Some(first), Some(last)) = (iter.next(), iter.last()) else {
            return 0.0;
        };
        let span = last.duration_since(*first).as_secs_f64();
        if span > 0.0 {
            (n - 1) as f64 / span
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fps_from_evenly_spaced_frames() {
        let mut window = FpsWindow::new();
        let start = Instant::now();
        let mut fps = 0.0;
        for i in 0..10 {
            fps = window.record(start + Duration::from_millis(100 * i));
        }
        assert!((fps - 10.0).abs() < 1e-6, "fps = {fps}");
    }

    #[test]
    fn window_forgets_old_frames() {
        let mut window = FpsWindow::new();
        let start = Instant::now();
        // A slow start followed by a full window of 50 fps
        window.record(start);
        let fast = start + Duration::from_secs(10);
        let mut fps = 0.0;
        for i in 0..FPS_WINDOW as u64 {
            fps = window.record(fast + Duration::from_millis(20 * i));
        }
        assert!((fps - 50.0).abs() < 1e-6, "fps = {fps}");
    }

    #[test]
    fn dropped_sums_every_cause() {
        let stats = BridgeStats {
            frames_superseded: 1,
            frames_out_of_order: 2,
            frames_no_buffer: 3,
            frames_discarded: 4,
            ..Default::default()
        };
        assert_eq!(stats.frames_dropped(), 10);
    }

    #[test]
    fn peak_tracks_maximum() {
        let counters = BridgeCounters::default();
        counters.record_in_use(2);
        counters.record_in_use(1);
        let snap = counters.snapshot();
        assert_eq!(snap.buffers_in_use, 1);
        assert_eq!(snap.buffers_in_use_peak, 2);
    }
}
