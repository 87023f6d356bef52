//! Motion sensor adapter: turns a live video feed into a motion magnitude and
//! a domain-offset target.
//!
//! A [`VideoDevice`] publishes [`VideoFrame`]s into a lock-free SPSC ring from
//! its own thread. On the analysis cadence the adapter drains the ring, keeps
//! only the newest frame, and feeds it to the [`MotionAnalyzer`], which
//! compares a mirrored low-resolution luminance image against the previous one
//! and tracks the weighted centroid of changed pixels.

use std::sync::Arc;

use glam::DVec2;
use ringbuf::traits::{Consumer as _, Producer as _, Split as _};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use flowfield_core::error::FlowError;
use flowfield_core::field::DOMAIN_ORIGIN;

use crate::lifecycle::{AdapterState, DeviceSession, Pending, Poll};

/// Frames buffered between the device thread and the frame loop.
const FRAME_RING_CAPACITY: usize = 4;

/// One RGBA8 video frame, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    width: usize,
    height: usize,
    rgba: Vec<u8>,
}

impl VideoFrame {
    /// Returns `FlowError::InvalidDimensions` if the buffer is not `width * height * 4` bytes.
    pub fn new(width: usize, height: usize, rgba: Vec<u8>) -> Result<Self, FlowError> {
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(4))
            .ok_or(FlowError::InvalidDimensions)?;
        if rgba.len() != expected {
            return Err(FlowError::InvalidDimensions);
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    /// A frame filled with one color.
    pub fn solid(width: usize, height: usize, rgb: [u8; 3]) -> Self {
        let rgba = std::iter::repeat([rgb[0], rgb[1], rgb[2], 255])
            .take(width * height)
            .flatten()
            .collect();
        Self {
            width,
            height,
            rgba,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    /// Mutable access to one pixel's RGB, `None` outside the frame.
    pub fn rgb_mut(&mut self, x: usize, y: usize) -> Option<&mut [u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y * self.width + x) * 4;
        Some(&mut self.rgba[i..i + 3])
    }

    fn luminance(&self, x: usize, y: usize) -> f32 {
        let i = (y * self.width + x) * 4;
        let [r, g, b] = [self.rgba[i], self.rgba[i + 1], self.rgba[i + 2]].map(f32::from);
        0.2126 * r + 0.7152 * g + 0.0722 * b
    }
}

/// Producer half handed to a [`VideoDevice`]. Frames that do not fit are dropped.
pub struct FramePublisher {
    prod: HeapProd<VideoFrame>,
}

impl FramePublisher {
    /// Returns `false` if the ring was full and the frame was dropped.
    pub fn publish(&mut self, frame: VideoFrame) -> bool {
        self.prod.try_push(frame).is_ok()
    }
}

/// A camera or other video source.
pub trait VideoDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Opens the device and starts publishing frames. May block.
    fn acquire(&self, frames: FramePublisher) -> Result<Box<dyn DeviceSession>, FlowError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Analysis resolution.
    pub width: usize,
    pub height: usize,
    /// Compare every `stride`-th pixel on both axes.
    pub stride: usize,
    /// Luminance difference a pixel must exceed to count as motion.
    pub threshold: f32,
    /// Difference at which a pixel reaches full weight.
    pub full_weight_delta: f32,
    /// Magnitude multiplier applied when no motion is seen.
    pub decay: f64,
    /// Domain offset reached at the frame edge.
    pub domain_range: f64,
    /// Analyse on frames where `frame_index % cadence == 0`.
    pub cadence: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            width: 160,
            height: 120,
            stride: 2,
            threshold: 18.0,
            full_weight_delta: 64.0,
            decay: 0.92,
            domain_range: 180.0,
            cadence: 2,
        }
    }
}

/// Frame-differencing motion estimator.
#[derive(Debug, Clone)]
pub struct MotionAnalyzer {
    config: MotionConfig,
    previous: Option<Vec<f32>>,
    current: Vec<f32>,
    magnitude: f64,
    centroid: DVec2,
    target: DVec2,
}

impl MotionAnalyzer {
    pub fn new(config: MotionConfig) -> Self {
        let centroid = DVec2::new(config.width as f64, config.height as f64) * 0.5;
        Self {
            config,
            previous: None,
            current: Vec::new(),
            magnitude: 0.0,
            centroid,
            target: DVec2::splat(DOMAIN_ORIGIN),
        }
    }

    /// Motion magnitude in [0, 1].
    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }

    /// Domain offset the field should ease toward.
    pub fn target(&self) -> DVec2 {
        self.target
    }

    /// Weighted centroid of the last detected motion, in analysis pixels.
    pub fn centroid(&self) -> DVec2 {
        self.centroid
    }

    /// Multiplies the magnitude by the decay factor.
    pub fn decay(&mut self) {
        self.magnitude *= self.config.decay;
    }

    /// Forgets the previous frame and recentres the target.
    pub fn reset(&mut self) {
        self.previous = None;
        self.target = DVec2::splat(DOMAIN_ORIGIN);
    }

    /// Analyses one frame and returns the new magnitude.
    ///
    /// The first frame after construction or [`reset`](Self::reset) only
    /// becomes the reference and yields magnitude 0. An empty frame counts
    /// as "no motion".
    pub fn analyze(&mut self, frame: &VideoFrame) -> f64 {
        let (w, h) = (self.config.width, self.config.height);
        if frame.width == 0 || frame.height == 0 || w == 0 || h == 0 {
            self.decay();
            return self.magnitude;
        }
        self.downsample(frame);

        let Some(previous) = self.previous.as_mut() else {
            self.previous = Some(std::mem::take(&mut self.current));
            self.magnitude = 0.0;
            return self.magnitude;
        };

        let stride = self.config.stride.max(1);
        let mut sum = DVec2::ZERO;
        let mut weight = 0.0_f64;
        for y in (0..h).step_by(stride) {
            for x in (0..w).step_by(stride) {
                let i = y * w + x;
                let d = (self.current[i] - previous[i]).abs();
                if d > self.config.threshold {
                    let wgt = f64::from((d / self.config.full_weight_delta).min(1.0));
                    sum += DVec2::new(x as f64, y as f64) * wgt;
                    weight += wgt;
                }
            }
        }

        if weight > 0.0 {
            let centroid = sum / weight;
            let half = DVec2::new(w as f64, h as f64) * 0.5;
            let d = (centroid - half) / half;
            self.centroid = centroid;
            self.magnitude = d.length().clamp(0.0, 1.0);
            self.target = DVec2::splat(DOMAIN_ORIGIN) + d * self.config.domain_range;
        } else {
            self.magnitude *= self.config.decay;
        }
        std::mem::swap(previous, &mut self.current);
        self.magnitude
    }

    /// Mirrors horizontally and nearest-samples into `self.current` as luminance.
    fn downsample(&mut self, frame: &VideoFrame) {
        let (w, h) = (self.config.width, self.config.height);
        self.current.clear();
        self.current.reserve(w * h);
        for y in 0..h {
            let sy = ((y * frame.height) / h).min(frame.height - 1);
            for x in 0..w {
                let sx = ((x * frame.width) / w).min(frame.width - 1);
                self.current.push(frame.luminance(frame.width - 1 - sx, sy));
            }
        }
    }
}

/// Motion adapter over an injected [`VideoDevice`].
pub struct MotionAdapter {
    device: Arc<dyn VideoDevice>,
    state: AdapterState,
    pending: Option<Pending<Box<dyn DeviceSession>>>,
    session: Option<Box<dyn DeviceSession>>,
    frames: Option<HeapCons<VideoFrame>>,
    analyzer: MotionAnalyzer,
    cadence: u64,
    last_error: Option<String>,
}

impl MotionAdapter {
    pub fn new(device: Arc<dyn VideoDevice>, config: MotionConfig) -> Self {
        let cadence = config.cadence.max(1);
        Self {
            device,
            state: AdapterState::Disabled,
            pending: None,
            session: None,
            frames: None,
            analyzer: MotionAnalyzer::new(config),
            cadence,
            last_error: None,
        }
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    /// Why the last acquisition failed, if it did.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn magnitude(&self) -> f64 {
        self.analyzer.magnitude()
    }

    pub fn target_offset(&self) -> DVec2 {
        self.analyzer.target()
    }

    /// Starts acquiring the device. No-op unless disabled.
    pub fn enable(&mut self) {
        if self.state != AdapterState::Disabled {
            return;
        }
        let (prod, cons) = HeapRb::<VideoFrame>::new(FRAME_RING_CAPACITY).split();
        let publisher = FramePublisher { prod };
        let device = Arc::clone(&self.device);
        match Pending::spawn(self.device.name(), move || device.acquire(publisher)) {
            Ok(pending) => {
                info!(device = self.device.name(), "motion control enabling");
                self.pending = Some(pending);
                self.frames = Some(cons);
                self.state = AdapterState::Enabling;
                self.last_error = None;
            }
            Err(e) => self.fail(e),
        }
    }

    /// Stops the device and discards the reference frame. Idempotent.
    pub fn disable(&mut self) {
        if self.state == AdapterState::Disabled && self.session.is_none() {
            return;
        }
        self.pending = None;
        if let Some(mut session) = self.session.take() {
            session.stop();
        }
        self.frames = None;
        self.analyzer.reset();
        self.state = AdapterState::Disabled;
        info!(device = self.device.name(), "motion control disabled");
    }

    /// Checks on an in-flight acquisition.
    pub fn poll(&mut self) -> AdapterState {
        if self.state != AdapterState::Enabling {
            return self.state;
        }
        let outcome = match self.pending.as_ref().map(Pending::poll) {
            Some(Poll::Waiting) => return self.state,
            Some(Poll::Ready(outcome)) => outcome,
            None => Err(FlowError::device(self.device.name(), "no acquisition in flight")),
        };
        self.pending = None;
        match outcome {
            Ok(session) => {
                self.session = Some(session);
                self.state = AdapterState::Active;
                info!(device = self.device.name(), "motion control active");
            }
            Err(e) => self.fail(e),
        }
        self.state
    }

    /// Per-frame hook. Runs analysis on the cadence and returns the current magnitude.
    pub fn on_frame(&mut self, frame_index: u64) -> f64 {
        self.poll();
        if frame_index % self.cadence != 0 {
            return self.analyzer.magnitude();
        }
        let latest = match (&self.state, self.frames.as_mut()) {
            (AdapterState::Active, Some(frames)) => {
                let mut latest = None;
                while let Some(frame) = frames.try_pop() {
                    latest = Some(frame);
                }
                latest
            }
            _ => None,
        };
        match latest {
            Some(frame) => self.analyzer.analyze(&frame),
            None => {
                self.analyzer.decay();
                self.analyzer.magnitude()
            }
        }
    }

    fn fail(&mut self, e: FlowError) {
        warn!(device = self.device.name(), error = %e, "motion control unavailable");
        self.pending = None;
        self.frames = None;
        self.state = AdapterState::Disabled;
        self.last_error = Some(e.to_string());
    }
}

impl Drop for MotionAdapter {
    fn drop(&mut self) {
        self.disable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    fn analyzer() -> MotionAnalyzer {
        MotionAnalyzer::new(MotionConfig::default())
    }

    /// A 160x120 black frame with a white square at (x0, y0) in camera space.
    fn square(x0: usize, y0: usize, size: usize) -> VideoFrame {
        let mut f = VideoFrame::solid(160, 120, [0, 0, 0]);
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                if let Some(px) = f.rgb_mut(x, y) {
                    px.copy_from_slice(&[255, 255, 255]);
                }
            }
        }
        f
    }

    #[test]
    fn frame_new_checks_buffer_length() {
        assert!(VideoFrame::new(2, 2, vec![0; 16]).is_ok());
        assert!(VideoFrame::new(2, 2, vec![0; 15]).is_err());
        assert!(VideoFrame::new(usize::MAX, 2, vec![]).is_err());
    }

    #[test]
    fn first_frame_only_becomes_reference() {
        let mut a = analyzer();
        assert_eq!(a.analyze(&square(10, 10, 20)), 0.0);
        assert_eq!(a.target(), DVec2::splat(DOMAIN_ORIGIN));
    }

    #[test]
    fn identical_frames_decay_magnitude() {
        let mut a = analyzer();
        a.analyze(&square(0, 0, 10));
        a.magnitude = 0.5;
        let m = a.analyze(&square(0, 0, 10));
        assert!((m - 0.46).abs() < 1e-12);
    }

    #[test]
    fn motion_on_camera_left_moves_target_right() {
        // Camera-space left is screen-space right after mirroring.
        let mut a = analyzer();
        a.analyze(&VideoFrame::solid(160, 120, [0, 0, 0]));
        let m = a.analyze(&square(0, 50, 20));
        assert!(m > 0.5, "magnitude {m}");
        assert!(a.target().x > DOMAIN_ORIGIN + 100.0, "target {:?}", a.target());
        assert!((a.target().y - DOMAIN_ORIGIN).abs() < 20.0);
        assert!(a.centroid().x > 140.0);
    }

    #[test]
    fn centred_motion_has_small_magnitude() {
        let mut a = analyzer();
        a.analyze(&VideoFrame::solid(160, 120, [0, 0, 0]));
        let m = a.analyze(&square(70, 50, 20));
        assert!(m < 0.1, "magnitude {m}");
    }

    #[test]
    fn small_changes_below_threshold_are_ignored() {
        let mut a = analyzer();
        a.analyze(&VideoFrame::solid(160, 120, [100, 100, 100]));
        a.magnitude = 1.0;
        let m = a.analyze(&VideoFrame::solid(160, 120, [110, 110, 110]));
        assert!((m - 0.92).abs() < 1e-12);
    }

    #[test]
    fn larger_frames_are_downsampled() {
        let mut a = analyzer();
        a.analyze(&VideoFrame::solid(640, 480, [0, 0, 0]));
        let mut moved = VideoFrame::solid(640, 480, [0, 0, 0]);
        for y in 0..480 {
            for x in 600..640 {
                moved.rgb_mut(x, y).unwrap().copy_from_slice(&[255, 255, 255]);
            }
        }
        a.analyze(&moved);
        assert!(a.target().x < DOMAIN_ORIGIN - 100.0);
    }

    #[test]
    fn reset_forgets_reference_and_recentres() {
        let mut a = analyzer();
        a.analyze(&VideoFrame::solid(160, 120, [0, 0, 0]));
        a.analyze(&square(0, 0, 30));
        a.reset();
        assert_eq!(a.target(), DVec2::splat(DOMAIN_ORIGIN));
        assert_eq!(a.analyze(&square(100, 100, 10)), 0.0);
    }

    #[test]
    fn empty_frame_counts_as_no_motion() {
        let mut a = analyzer();
        a.magnitude = 1.0;
        assert!((a.analyze(&VideoFrame::solid(0, 0, [0, 0, 0])) - 0.92).abs() < 1e-12);
    }

    // -- adapter --

    struct MockCamera {
        fail: bool,
        frames: Mutex<Vec<VideoFrame>>,
        stopped: Arc<AtomicBool>,
        acquired: AtomicUsize,
    }

    impl MockCamera {
        fn new(frames: Vec<VideoFrame>) -> Arc<Self> {
            Arc::new(Self {
                fail: false,
                frames: Mutex::new(frames),
                stopped: Arc::new(AtomicBool::new(false)),
                acquired: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                frames: Mutex::new(Vec::new()),
                stopped: Arc::new(AtomicBool::new(false)),
                acquired: AtomicUsize::new(0),
            })
        }
    }

    struct MockSession {
        stopped: Arc<AtomicBool>,
        _publisher: FramePublisher,
    }

    impl DeviceSession for MockSession {
        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    impl VideoDevice for MockCamera {
        fn name(&self) -> &str {
            "mock-camera"
        }

        fn acquire(&self, mut frames: FramePublisher) -> Result<Box<dyn DeviceSession>, FlowError> {
            if self.fail {
                return Err(FlowError::device("mock-camera", "permission denied"));
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            for f in self.frames.lock().unwrap().drain(..) {
                frames.publish(f);
            }
            Ok(Box::new(MockSession {
                stopped: Arc::clone(&self.stopped),
                _publisher: frames,
            }))
        }
    }

    fn settle(adapter: &mut MotionAdapter) -> AdapterState {
        let deadline = Instant::now() + Duration::from_secs(5);
        while adapter.poll() == AdapterState::Enabling {
            assert!(Instant::now() < deadline, "adapter stuck enabling");
            std::thread::sleep(Duration::from_millis(2));
        }
        adapter.state()
    }

    #[test]
    fn enable_reaches_active_and_disable_releases_device() {
        let cam = MockCamera::new(Vec::new());
        let mut adapter = MotionAdapter::new(cam.clone(), MotionConfig::default());
        assert_eq!(adapter.state(), AdapterState::Disabled);
        adapter.enable();
        assert_ne!(adapter.state(), AdapterState::Disabled);
        assert_eq!(settle(&mut adapter), AdapterState::Active);

        adapter.disable();
        assert_eq!(adapter.state(), AdapterState::Disabled);
        assert!(cam.stopped.load(Ordering::SeqCst));
        adapter.disable();
    }

    #[test]
    fn enable_twice_acquires_once() {
        let cam = MockCamera::new(Vec::new());
        let mut adapter = MotionAdapter::new(cam.clone(), MotionConfig::default());
        adapter.enable();
        adapter.enable();
        settle(&mut adapter);
        adapter.enable();
        assert_eq!(cam.acquired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_acquisition_reverts_to_disabled() {
        let mut adapter = MotionAdapter::new(MockCamera::failing(), MotionConfig::default());
        adapter.enable();
        assert_eq!(settle(&mut adapter), AdapterState::Disabled);
        assert!(adapter.last_error().unwrap().contains("permission denied"));
    }

    #[test]
    fn active_adapter_analyses_latest_frame_on_cadence() {
        let frames = vec![VideoFrame::solid(160, 120, [0, 0, 0])];
        let cam = MockCamera::new(frames);
        let mut adapter = MotionAdapter::new(cam, MotionConfig::default());
        adapter.enable();
        settle(&mut adapter);
        // Odd frame: no analysis, the reference frame stays queued.
        assert_eq!(adapter.on_frame(1), 0.0);
        assert_eq!(adapter.on_frame(2), 0.0);
        assert!(adapter.analyzer.previous.is_some());
    }

    #[test]
    fn inactive_adapter_decays_on_cadence_only() {
        let mut adapter = MotionAdapter::new(MockCamera::new(Vec::new()), MotionConfig::default());
        adapter.analyzer.magnitude = 1.0;
        adapter.on_frame(1);
        assert_eq!(adapter.magnitude(), 1.0);
        adapter.on_frame(2);
        assert!((adapter.magnitude() - 0.92).abs() < 1e-12);
    }

    #[test]
    fn drop_stops_the_session() {
        let cam = MockCamera::new(Vec::new());
        {
            let mut adapter = MotionAdapter::new(cam.clone(), MotionConfig::default());
            adapter.enable();
            settle(&mut adapter);
        }
        assert!(cam.stopped.load(Ordering::SeqCst));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn magnitude_stays_in_unit_interval_and_decay_is_monotone(
                shades in proptest::collection::vec(0_u8..=255, 2..12),
                x0 in 0_usize..150,
                y0 in 0_usize..110,
            ) {
                let mut a = analyzer();
                for (k, shade) in shades.iter().enumerate() {
                    let f = if k % 2 == 0 {
                        VideoFrame::solid(160, 120, [*shade; 3])
                    } else {
                        square(x0, y0, 10)
                    };
                    let m = a.analyze(&f);
                    prop_assert!((0.0..=1.0).contains(&m));
                }
                let mut prev = a.magnitude();
                for _ in 0..20 {
                    a.decay();
                    prop_assert!(a.magnitude() <= prev);
                    prev = a.magnitude();
                }
            }
        }
    }
}
