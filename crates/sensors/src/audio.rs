//! Audio sensor adapter.
//!
//! An [`AudioDevice`] pushes mono `f32` samples into a lock-free SPSC ring from
//! its callback thread. Once the device is active a dedicated analysis thread
//! drains the ring into a sliding window, runs a [`SpectrumAnalyzer`] every
//! quarter window, and publishes the band energies into a [`LatestSample`]
//! slot that the frame loop reads without locking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ringbuf::traits::{Consumer as _, Producer as _, Split as _};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, info, warn};

use flowfield_core::error::FlowError;

use crate::lifecycle::{AdapterState, DeviceSession, Pending, Poll};
use crate::slot::LatestSample;
use crate::spectrum::{AudioBands, SpectrumAnalyzer, SpectrumConfig};

/// Samples buffered between the device callback and the analysis thread.
const SAMPLE_RING_CAPACITY: usize = 1 << 18;

/// Producer half handed to an [`AudioDevice`]. Samples that do not fit are dropped.
pub struct SamplePublisher {
    prod: HeapProd<f32>,
}

impl SamplePublisher {
    /// Pushes mono samples. Returns how many were accepted.
    pub fn publish(&mut self, samples: &[f32]) -> usize {
        self.prod.push_slice(samples)
    }

    /// Downmixes interleaved `f32` frames to mono and pushes them.
    pub fn publish_interleaved(&mut self, data: &[f32], channels: usize) -> usize {
        self.publish_interleaved_with(data, channels, |s| s)
    }

    /// Downmixes interleaved frames of any sample type, converting each
    /// sample with `to_f32`.
    pub fn publish_interleaved_with<T: Copy>(
        &mut self,
        data: &[T],
        channels: usize,
        to_f32: impl Fn(T) -> f32,
    ) -> usize {
        let channels = channels.max(1);
        let mut pushed = 0;
        for frame in data.chunks(channels) {
            let acc: f32 = frame.iter().map(|&s| to_f32(s)).sum();
            let mono = acc / frame.len() as f32;
            if self.prod.try_push(mono).is_ok() {
                pushed += 1;
            }
        }
        pushed
    }
}

/// A running input stream returned by [`AudioDevice::acquire`].
pub struct AudioStream {
    pub session: Box<dyn DeviceSession>,
    pub sample_rate: u32,
}

/// A microphone or other audio source.
pub trait AudioDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Opens the device and starts publishing samples. May block.
    fn acquire(&self, samples: SamplePublisher) -> Result<AudioStream, FlowError>;
}

struct AnalysisThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AnalysisThread {
    fn spawn(
        mut samples: HeapCons<f32>,
        analyzer: SpectrumAnalyzer,
        out: Arc<LatestSample<4>>,
    ) -> Result<Self, FlowError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("audio-analysis".into())
            .spawn(move || analyze_loop(&mut samples, analyzer, &stop_for_thread, &out))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for AnalysisThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn analyze_loop(
    samples: &mut HeapCons<f32>,
    mut analyzer: SpectrumAnalyzer,
    stop: &AtomicBool,
    out: &LatestSample<4>,
) {
    let n = analyzer.fft_size();
    let hop = (n / 4).max(1);
    let mut ring = vec![0.0_f32; n];
    let mut ordered = vec![0.0_f32; n];
    let mut write_pos = 0usize;
    let mut filled = 0usize;
    let mut since_last = 0usize;

    while !stop.load(Ordering::Relaxed) {
        let mut got_any = false;
        while let Some(s) = samples.try_pop() {
            got_any = true;
            ring[write_pos] = s;
            write_pos = (write_pos + 1) % n;
            filled = (filled + 1).min(n);
            since_last += 1;
            if filled == n && since_last >= hop {
                since_last = 0;
                let (newer, older) = ring.split_at(write_pos);
                ordered[..older.len()].copy_from_slice(older);
                ordered[older.len()..].copy_from_slice(newer);
                out.store(analyzer.process(&ordered).to_array());
            }
        }
        if !got_any {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Audio adapter over an injected [`AudioDevice`].
pub struct AudioAdapter {
    device: Arc<dyn AudioDevice>,
    config: SpectrumConfig,
    state: AdapterState,
    pending: Option<Pending<AudioStream>>,
    session: Option<Box<dyn DeviceSession>>,
    samples: Option<HeapCons<f32>>,
    analysis: Option<AnalysisThread>,
    bands: Arc<LatestSample<4>>,
    sample_rate: Option<u32>,
    last_error: Option<String>,
}

impl AudioAdapter {
    pub fn new(device: Arc<dyn AudioDevice>, config: SpectrumConfig) -> Self {
        Self {
            device,
            config,
            state: AdapterState::Disabled,
            pending: None,
            session: None,
            samples: None,
            analysis: None,
            bands: Arc::new(LatestSample::new()),
            sample_rate: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Sample rate reported by the active device.
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    /// Latest band energies, all zero unless the adapter is active.
    pub fn read_audio_bands(&self) -> AudioBands {
        if self.state != AdapterState::Active {
            return AudioBands::SILENT;
        }
        AudioBands::from_array(self.bands.load())
    }

    /// Starts acquiring the device. No-op unless disabled.
    pub fn enable(&mut self) {
        if self.state != AdapterState::Disabled {
            return;
        }
        let (prod, cons) = HeapRb::<f32>::new(SAMPLE_RING_CAPACITY).split();
        let publisher = SamplePublisher { prod };
        let device = Arc::clone(&self.device);
        match Pending::spawn(self.device.name(), move || device.acquire(publisher)) {
            Ok(pending) => {
                info!(device = self.device.name(), "audio reactivity enabling");
                self.pending = Some(pending);
                self.samples = Some(cons);
                self.state = AdapterState::Enabling;
                self.last_error = None;
            }
            Err(e) => self.fail(e),
        }
    }

    /// Stops analysis and the device, and zeroes the bands. Idempotent.
    pub fn disable(&mut self) {
        if self.state == AdapterState::Disabled && self.session.is_none() {
            return;
        }
        self.pending = None;
        if let Some(mut session) = self.session.take() {
            session.stop();
        }
        // Joins the analysis thread before the slot is reset.
        self.analysis = None;
        self.samples = None;
        self.bands.store([0.0; 4]);
        self.sample_rate = None;
        self.state = AdapterState::Disabled;
        info!(device = self.device.name(), "audio reactivity disabled");
    }

    /// Checks on an in-flight acquisition and starts analysis once it succeeds.
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
        match outcome.and_then(|stream| self.start_analysis(stream)) {
            Ok(()) => {
                self.state = AdapterState::Active;
                info!(
                    device = self.device.name(),
                    sample_rate = self.sample_rate,
                    "audio reactivity active"
                );
            }
            Err(e) => self.fail(e),
        }
        self.state
    }

    fn start_analysis(&mut self, stream: AudioStream) -> Result<(), FlowError> {
        let AudioStream {
            mut session,
            sample_rate,
        } = stream;
        let Some(samples) = self.samples.take() else {
            session.stop();
            return Err(FlowError::device(self.device.name(), "sample ring already taken"));
        };
        let analyzer = SpectrumAnalyzer::new(self.config.clone(), sample_rate);
        debug!(fft_size = analyzer.fft_size(), sample_rate, "starting spectrum analysis");
        match AnalysisThread::spawn(samples, analyzer, Arc::clone(&self.bands)) {
            Ok(thread) => {
                self.analysis = Some(thread);
                self.session = Some(session);
                self.sample_rate = Some(sample_rate);
                Ok(())
            }
            Err(e) => {
                session.stop();
                Err(FlowError::device(self.device.name(), format!("analysis thread: {e}")))
            }
        }
    }

    fn fail(&mut self, e: FlowError) {
        warn!(device = self.device.name(), error = %e, "audio reactivity unavailable");
        self.pending = None;
        self.samples = None;
        self.state = AdapterState::Disabled;
        self.last_error = Some(e.to_string());
    }
}

impl Drop for AudioAdapter {
    fn drop(&mut self) {
        self.disable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    const SR: u32 = 48_000;

    fn tone(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.8 * (std::f32::consts::TAU * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    struct MockMic {
        fail: bool,
        samples: Vec<f32>,
        stopped: Arc<AtomicBool>,
        acquired: AtomicUsize,
    }

    impl MockMic {
        fn new(samples: Vec<f32>) -> Arc<Self> {
            Arc::new(Self {
                fail: false,
                samples,
                stopped: Arc::new(AtomicBool::new(false)),
                acquired: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                samples: Vec::new(),
                stopped: Arc::new(AtomicBool::new(false)),
                acquired: AtomicUsize::new(0),
            })
        }
    }

    struct MockSession {
        stopped: Arc<AtomicBool>,
        _publisher: SamplePublisher,
    }

    impl DeviceSession for MockSession {
        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    impl AudioDevice for MockMic {
        fn name(&self) -> &str {
            "mock-mic"
        }

        fn acquire(&self, mut samples: SamplePublisher) -> Result<AudioStream, FlowError> {
            if self.fail {
                return Err(FlowError::device("mock-mic", "no input device"));
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            samples.publish(&self.samples);
            Ok(AudioStream {
                session: Box::new(MockSession {
                    stopped: Arc::clone(&self.stopped),
                    _publisher: samples,
                }),
                sample_rate: SR,
            })
        }
    }

    fn settle(adapter: &mut AudioAdapter) -> AdapterState {
        let deadline = Instant::now() + Duration::from_secs(5);
        while adapter.poll() == AdapterState::Enabling {
            assert!(Instant::now() < deadline, "adapter stuck enabling");
            thread::sleep(Duration::from_millis(2));
        }
        adapter.state()
    }

    fn wait_for_bands(adapter: &AudioAdapter, ok: impl Fn(AudioBands) -> bool) -> AudioBands {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let b = adapter.read_audio_bands();
            if ok(b) {
                return b;
            }
            assert!(Instant::now() < deadline, "bands never settled: {b:?}");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn publish_interleaved_downmixes_to_mono() {
        let (prod, mut cons) = HeapRb::<f32>::new(8).split();
        let mut p = SamplePublisher { prod };
        assert_eq!(p.publish_interleaved(&[1.0, -1.0, 0.5, 0.5], 2), 2);
        assert_eq!(cons.try_pop(), Some(0.0));
        assert_eq!(cons.try_pop(), Some(0.5));
        assert_eq!(cons.try_pop(), None);
    }

    #[test]
    fn publish_interleaved_with_converts_samples() {
        let (prod, mut cons) = HeapRb::<f32>::new(8).split();
        let mut p = SamplePublisher { prod };
        p.publish_interleaved_with(&[i16::MAX, i16::MAX], 2, |s| f32::from(s) / 32768.0);
        let v = cons.try_pop().unwrap();
        assert!((v - 1.0).abs() < 1e-3);
    }

    #[test]
    fn full_ring_drops_samples() {
        let (prod, _cons) = HeapRb::<f32>::new(4).split();
        let mut p = SamplePublisher { prod };
        assert_eq!(p.publish(&[0.0; 10]), 4);
    }

    #[test]
    fn disabled_adapter_reads_silence() {
        let adapter = AudioAdapter::new(MockMic::new(Vec::new()), SpectrumConfig::default());
        assert_eq!(adapter.read_audio_bands(), AudioBands::SILENT);
        assert_eq!(adapter.sample_rate(), None);
    }

    #[test]
    fn bass_tone_reaches_low_band() {
        let mic = MockMic::new(tone(100.0, 48_000));
        let mut adapter = AudioAdapter::new(mic, SpectrumConfig::default());
        adapter.enable();
        assert_eq!(settle(&mut adapter), AdapterState::Active);
        assert_eq!(adapter.sample_rate(), Some(SR));
        let b = wait_for_bands(&adapter, |b| b.low > 0.3);
        assert!(b.low > b.high, "{b:?}");
    }

    #[test]
    fn disable_zeroes_bands_and_stops_device() {
        let mic = MockMic::new(tone(100.0, 48_000));
        let mut adapter = AudioAdapter::new(mic.clone(), SpectrumConfig::default());
        adapter.enable();
        settle(&mut adapter);
        wait_for_bands(&adapter, |b| b.low > 0.0);

        adapter.disable();
        assert_eq!(adapter.state(), AdapterState::Disabled);
        assert_eq!(adapter.read_audio_bands(), AudioBands::SILENT);
        assert_eq!(adapter.bands.load(), [0.0; 4]);
        assert!(mic.stopped.load(Ordering::SeqCst));
        adapter.disable();
    }

    #[test]
    fn failed_acquisition_reverts_to_disabled() {
        let mut adapter = AudioAdapter::new(MockMic::failing(), SpectrumConfig::default());
        adapter.enable();
        assert_eq!(settle(&mut adapter), AdapterState::Disabled);
        assert!(adapter.last_error().unwrap().contains("no input device"));
        assert_eq!(adapter.read_audio_bands(), AudioBands::SILENT);
    }

    #[test]
    fn enable_while_enabling_acquires_once() {
        let mic = MockMic::new(Vec::new());
        let mut adapter = AudioAdapter::new(mic.clone(), SpectrumConfig::default());
        adapter.enable();
        adapter.enable();
        settle(&mut adapter);
        adapter.enable();
        assert_eq!(mic.acquired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn re_enable_after_disable_works() {
        let mic = MockMic::new(tone(100.0, 8192));
        let mut adapter = AudioAdapter::new(mic.clone(), SpectrumConfig::default());
        adapter.enable();
        settle(&mut adapter);
        adapter.disable();
        adapter.enable();
        assert_eq!(settle(&mut adapter), AdapterState::Active);
        assert_eq!(mic.acquired.load(Ordering::SeqCst), 2);
    }
}
