//! Timed recording of rendered frames.
//!
//! A [`CaptureSession`] negotiates an encoder from an ordered codec
//! preference list, then hands frames to a worker thread through a bounded
//! channel. The render loop never waits on the encoder: when the queue is
//! full the frame is dropped and counted.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flowfield_core::error::FlowError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;

pub const PNG_SEQUENCE: &str = "png-sequence";

/// Preferred codecs, most preferred first.
pub const DEFAULT_CODECS: [&str; 4] = ["webm;vp9", "webm;vp8", "webm", PNG_SEQUENCE];

/// One RGBA8 frame handed to an encoder.
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    pub width: usize,
    pub height: usize,
    pub rgba: Vec<u8>,
}

/// Where and how an encoder should write.
#[derive(Debug, Clone)]
pub struct EncoderParams {
    pub width: usize,
    pub height: usize,
    pub fps: u32,
    /// Artifact path without extension. Encoders pick their own suffix or
    /// treat it as a directory.
    pub dest: PathBuf,
}

/// Consumes frames on the capture worker thread.
pub trait VideoEncoder: Send {
    fn encode(&mut self, frame: CaptureFrame) -> Result<(), FlowError>;

    /// Flushes everything and returns the artifact path.
    fn finish(self: Box<Self>) -> Result<PathBuf, FlowError>;
}

/// Opens encoders by codec name.
pub trait EncoderFactory {
    fn supports(&self, codec: &str) -> bool;

    fn open(&self, codec: &str, params: &EncoderParams) -> Result<Box<dyn VideoEncoder>, FlowError>;
}

/// Result of a finished capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureArtifact {
    pub codec: String,
    pub path: PathBuf,
    /// Frames the encoder wrote.
    pub frames: u64,
    /// Frames dropped because the encoder queue was full.
    pub dropped: u64,
}

/// Tries each codec in order and returns the first encoder that opens.
///
/// Returns `FlowError::EncodingUnavailable` listing every codec tried when
/// none is usable.
pub fn negotiate(
    factory: &dyn EncoderFactory,
    codecs: &[String],
    params: &EncoderParams,
) -> Result<(String, Box<dyn VideoEncoder>), FlowError> {
    let mut tried = Vec::with_capacity(codecs.len());
    for codec in codecs {
        if !factory.supports(codec) {
            debug!(codec = %codec, "codec not supported");
            tried.push(codec.clone());
            continue;
        }
        match factory.open(codec, params) {
            Ok(encoder) => {
                if !tried.is_empty() {
                    warn!(codec = %codec, skipped = ?tried, "capture falling back to a less preferred codec");
                }
                return Ok((codec.clone(), encoder));
            }
            Err(e) => {
                warn!(codec = %codec, error = %e, "encoder failed to open");
                tried.push(codec.clone());
            }
        }
    }
    Err(FlowError::EncodingUnavailable { tried })
}

/// Encoders shipped with the runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEncoders;

impl EncoderFactory for BuiltinEncoders {
    fn supports(&self, codec: &str) -> bool {
        cfg!(feature = "png") && codec == PNG_SEQUENCE
    }

    fn open(&self, codec: &str, params: &EncoderParams) -> Result<Box<dyn VideoEncoder>, FlowError> {
        match codec {
            #[cfg(feature = "png")]
            PNG_SEQUENCE => Ok(Box::new(PngSequenceEncoder::create(params)?)),
            _ => {
                let _ = params;
                Err(FlowError::EncodingUnavailable {
                    tried: vec![codec.to_string()],
                })
            }
        }
    }
}

/// Writes every frame as `frame-NNNNN.png` into a directory, plus a
/// `manifest.json` describing the sequence.
#[cfg(feature = "png")]
#[derive(Debug)]
pub struct PngSequenceEncoder {
    dir: PathBuf,
    width: usize,
    height: usize,
    fps: u32,
    written: u64,
}

#[cfg(feature = "png")]
impl PngSequenceEncoder {
    pub fn create(params: &EncoderParams) -> Result<Self, FlowError> {
        std::fs::create_dir_all(&params.dest)?;
        Ok(Self {
            dir: params.dest.clone(),
            width: params.width,
            height: params.height,
            fps: params.fps,
            written: 0,
        })
    }

    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame-{index:05}.png"))
    }
}

#[cfg(feature = "png")]
impl VideoEncoder for PngSequenceEncoder {
    fn encode(&mut self, frame: CaptureFrame) -> Result<(), FlowError> {
        if (frame.width, frame.height) != (self.width, self.height) {
            return Err(FlowError::InvalidDimensions);
        }
        let path = self.frame_path(self.written);
        flowfield_render::snapshot::write_rgba_png(frame.width, frame.height, frame.rgba, &path)?;
        self.written += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<PathBuf, FlowError> {
        let manifest = serde_json::json!({
            "codec": PNG_SEQUENCE,
            "width": self.width,
            "height": self.height,
            "fps": self.fps,
            "frames": self.written,
        });
        let bytes =
            serde_json::to_vec_pretty(&manifest).map_err(|e| FlowError::Io(e.to_string()))?;
        std::fs::write(self.dir.join("manifest.json"), bytes)?;
        Ok(self.dir)
    }
}

type WorkerOutcome = Result<(PathBuf, u64), FlowError>;

fn encode_loop(mut encoder: Box<dyn VideoEncoder>, frames: Receiver<CaptureFrame>) -> WorkerOutcome {
    let mut written = 0u64;
    let mut failure = None;
    // Keep draining after a failure so the sender never sees a stuck queue.
    for frame in frames {
        if failure.is_some() {
            continue;
        }
        match encoder.encode(frame) {
            Ok(()) => written += 1,
            Err(e) => {
                warn!(error = %e, frames = written, "capture encoder failed, discarding remaining frames");
                failure = Some(e);
            }
        }
    }
    if let Some(e) = failure {
        return Err(e);
    }
    let path = encoder.finish()?;
    Ok((path, written))
}

/// A recording in progress.
pub struct CaptureSession {
    codec: String,
    started: Duration,
    duration: Duration,
    frame_interval: Duration,
    next_frame_at: Duration,
    submitted: u64,
    dropped: u64,
    tx: Option<SyncSender<CaptureFrame>>,
    worker: Option<JoinHandle<WorkerOutcome>>,
}

impl CaptureSession {
    /// Opens an encoder and starts the worker. `now` is the host clock at
    /// the call; the session is due once `now ≥ start + duration`.
    pub fn start(
        factory: &dyn EncoderFactory,
        config: &CaptureConfig,
        params: EncoderParams,
        now: Duration,
        duration: Duration,
    ) -> Result<Self, FlowError> {
        let (codec, encoder) = negotiate(factory, &config.codecs, &params)?;
        let (tx, rx) = mpsc::sync_channel(config.queue_depth.max(1));
        let worker = thread::Builder::new()
            .name("capture-encoder".into())
            .spawn(move || encode_loop(encoder, rx))?;
        info!(
            codec = %codec,
            dest = %params.dest.display(),
            seconds = duration.as_secs_f64(),
            "capture started"
        );
        Ok(Self {
            codec,
            started: now,
            duration,
            frame_interval: Duration::from_secs_f64(1.0 / f64::from(config.fps.max(1))),
            next_frame_at: now,
            submitted: 0,
            dropped: 0,
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn codec(&self) -> &str {
        &self.codec
    }

    pub fn frames_submitted(&self) -> u64 {
        self.submitted
    }

    pub fn frames_dropped(&self) -> u64 {
        self.dropped
    }

    /// `true` once the requested duration has elapsed.
    pub fn is_due(&self, now: Duration) -> bool {
        now.saturating_sub(self.started) >= self.duration
    }

    /// `true` when a frame should be sampled at `now` for the configured fps.
    pub fn wants_frame(&self, now: Duration) -> bool {
        !self.is_due(now) && now >= self.next_frame_at
    }

    /// Queues a frame without blocking. Returns `false` if it was dropped.
    pub fn submit(&mut self, now: Duration, frame: CaptureFrame) -> bool {
        let next = self.next_frame_at + self.frame_interval;
        self.next_frame_at = if next <= now { now + self.frame_interval } else { next };
        let Some(tx) = self.tx.as_ref() else {
            self.dropped += 1;
            return false;
        };
        match tx.try_send(frame) {
            Ok(()) => {
                self.submitted += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                debug!(dropped = self.dropped, "capture queue full, frame dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped += 1;
                false
            }
        }
    }

    /// Stops accepting frames. The encoder keeps draining what is queued.
    pub fn close(&mut self) {
        if self.tx.take().is_some() {
            debug!(submitted = self.submitted, "capture queue closed");
        }
    }

    /// `true` once the queue is closed and the encoder has written
    /// everything, so [`finish`](Self::finish) returns without waiting.
    pub fn is_drained(&self) -> bool {
        self.tx.is_none() && self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Closes the queue, waits for the encoder, and returns the artifact.
    pub fn finish(mut self) -> Result<CaptureArtifact, FlowError> {
        self.tx = None;
        let outcome = match self.worker.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| FlowError::Io("capture encoder thread panicked".into()))?,
            None => Err(FlowError::Io("capture already finished".into())),
        };
        let (path, frames) = outcome?;
        let artifact = CaptureArtifact {
            codec: self.codec.clone(),
            path,
            frames,
            dropped: self.dropped,
        };
        info!(
            codec = %artifact.codec,
            path = %artifact.path.display(),
            frames = artifact.frames,
            dropped = artifact.dropped,
            "capture finished"
        );
        Ok(artifact)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.tx = None;
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Default artifact location for a capture of `duration` under `dir`:
/// `flowfield-{secs}s`, or `flowfield-{secs}s-N` with the first free `N`
/// when earlier captures already used the name.
pub fn default_dest(dir: &Path, duration: Duration) -> PathBuf {
    let stem = format!("flowfield-{}s", duration.as_secs());
    let first = dir.join(&stem);
    if !first.exists() {
        return first;
    }
    (2u32..)
        .map(|n| dir.join(format!("{stem}-{n}")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn params(dest: PathBuf) -> EncoderParams {
        EncoderParams {
            width: 4,
            height: 3,
            fps: 60,
            dest,
        }
    }

    fn frame() -> CaptureFrame {
        CaptureFrame {
            width: 4,
            height: 3,
            rgba: vec![128; 4 * 3 * 4],
        }
    }

    fn codecs(list: &[&str]) -> Vec<String> {
        list.iter().map(|c| c.to_string()).collect()
    }

    /// Supports a fixed set of codecs; encoders count frames and may block
    /// until the gate sender is dropped.
    struct MockFactory {
        supported: Vec<&'static str>,
        broken: Vec<&'static str>,
        gate: Mutex<Option<Receiver<()>>>,
        encoded: Arc<Mutex<u64>>,
    }

    impl MockFactory {
        fn new(supported: &[&'static str]) -> Self {
            Self {
                supported: supported.to_vec(),
                broken: Vec::new(),
                gate: Mutex::new(None),
                encoded: Arc::new(Mutex::new(0)),
            }
        }
    }

    struct MockEncoder {
        gate: Option<Receiver<()>>,
        encoded: Arc<Mutex<u64>>,
        dest: PathBuf,
    }

    impl VideoEncoder for MockEncoder {
        fn encode(&mut self, _frame: CaptureFrame) -> Result<(), FlowError> {
            if let Some(gate) = &self.gate {
                let _ = gate.recv();
            }
            *self.encoded.lock().unwrap() += 1;
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<PathBuf, FlowError> {
            Ok(self.dest.with_extension("webm"))
        }
    }

    impl EncoderFactory for MockFactory {
        fn supports(&self, codec: &str) -> bool {
            self.supported.contains(&codec)
        }

        fn open(&self, codec: &str, params: &EncoderParams) -> Result<Box<dyn VideoEncoder>, FlowError> {
            if self.broken.contains(&codec) {
                return Err(FlowError::Io(format!("{codec} encoder crashed")));
            }
            Ok(Box::new(MockEncoder {
                gate: self.gate.lock().unwrap().take(),
                encoded: Arc::clone(&self.encoded),
                dest: params.dest.clone(),
            }))
        }
    }

    #[test]
    fn negotiation_picks_first_supported_codec() {
        let f = MockFactory::new(&["webm;vp8", "webm"]);
        let (codec, _) = negotiate(&f, &codecs(&DEFAULT_CODECS), &params("x".into())).unwrap();
        assert_eq!(codec, "webm;vp8");
    }

    #[test]
    fn negotiation_skips_encoders_that_fail_to_open() {
        let mut f = MockFactory::new(&["webm;vp9", "webm"]);
        f.broken.push("webm;vp9");
        let (codec, _) = negotiate(&f, &codecs(&DEFAULT_CODECS), &params("x".into())).unwrap();
        assert_eq!(codec, "webm");
    }

    #[test]
    fn negotiation_reports_every_codec_tried() {
        let f = MockFactory::new(&[]);
        let err = negotiate(&f, &codecs(&["webm;vp9", "webm"]), &params("x".into()))
            .err()
            .unwrap();
        match err {
            FlowError::EncodingUnavailable { tried } => assert_eq!(tried, codecs(&["webm;vp9", "webm"])),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(feature = "png")]
    #[test]
    fn builtin_encoders_fall_back_to_png_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let (codec, _) = negotiate(
            &BuiltinEncoders,
            &codecs(&DEFAULT_CODECS),
            &params(dir.path().join("seq")),
        )
        .unwrap();
        assert_eq!(codec, PNG_SEQUENCE);
    }

    #[cfg(feature = "png")]
    #[test]
    fn png_sequence_writes_numbered_frames_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("capture");
        let mut session = CaptureSession::start(
            &BuiltinEncoders,
            &CaptureConfig {
                queue_depth: 16,
                ..CaptureConfig::default()
            },
            params(dest.clone()),
            Duration::ZERO,
            Duration::from_secs(1),
        )
        .unwrap();
        for i in 0..3 {
            assert!(session.submit(Duration::from_millis(20 * i), frame()));
        }
        let artifact = session.finish().unwrap();

        assert_eq!(artifact.codec, PNG_SEQUENCE);
        assert_eq!(artifact.path, dest);
        assert_eq!(artifact.frames, 3);
        assert!(dest.join("frame-00000.png").exists());
        assert!(dest.join("frame-00002.png").exists());
        let manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dest.join("manifest.json")).unwrap()).unwrap();
        assert_eq!(manifest["frames"], 3);
        assert_eq!(manifest["fps"], 60);
    }

    #[cfg(feature = "png")]
    #[test]
    fn mismatched_frame_size_fails_the_capture() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = CaptureSession::start(
            &BuiltinEncoders,
            &CaptureConfig::default(),
            params(dir.path().join("bad")),
            Duration::ZERO,
            Duration::from_secs(1),
        )
        .unwrap();
        session.submit(
            Duration::ZERO,
            CaptureFrame {
                width: 2,
                height: 2,
                rgba: vec![0; 16],
            },
        );
        assert!(matches!(session.finish(), Err(FlowError::InvalidDimensions)));
    }

    #[test]
    fn full_queue_drops_frames_instead_of_blocking() {
        let f = MockFactory::new(&["webm"]);
        let (gate_tx, gate_rx) = mpsc::channel();
        *f.gate.lock().unwrap() = Some(gate_rx);
        let mut session = CaptureSession::start(
            &f,
            &CaptureConfig {
                codecs: codecs(&["webm"]),
                queue_depth: 2,
                ..CaptureConfig::default()
            },
            params("out".into()),
            Duration::ZERO,
            Duration::from_secs(10),
        )
        .unwrap();

        for _ in 0..20 {
            session.submit(Duration::ZERO, frame());
        }
        // The worker holds at most one frame and the queue two more.
        assert!(session.frames_submitted() <= 3);
        assert_eq!(session.frames_submitted() + session.frames_dropped(), 20);

        let submitted = session.frames_submitted();
        drop(gate_tx);
        let artifact = session.finish().unwrap();
        assert_eq!(artifact.frames, submitted);
        assert_eq!(artifact.frames, *f.encoded.lock().unwrap());
        assert_eq!(artifact.dropped, 20 - submitted);
        assert_eq!(artifact.path, PathBuf::from("out.webm"));
    }

    #[test]
    fn due_after_duration_elapses() {
        let f = MockFactory::new(&["webm"]);
        let session = CaptureSession::start(
            &f,
            &CaptureConfig {
                codecs: codecs(&["webm"]),
                ..CaptureConfig::default()
            },
            params("out".into()),
            Duration::from_secs(5),
            Duration::from_secs(10),
        )
        .unwrap();
        assert!(!session.is_due(Duration::from_secs(5)));
        assert!(!session.is_due(Duration::from_millis(14_999)));
        assert!(session.is_due(Duration::from_secs(15)));
        assert!(!session.wants_frame(Duration::from_secs(15)));
    }

    #[test]
    fn frames_are_sampled_at_the_configured_rate() {
        let f = MockFactory::new(&["webm"]);
        let mut session = CaptureSession::start(
            &f,
            &CaptureConfig {
                codecs: codecs(&["webm"]),
                fps: 10,
                queue_depth: 64,
                ..CaptureConfig::default()
            },
            params("out".into()),
            Duration::ZERO,
            Duration::from_secs(1),
        )
        .unwrap();
        // 120 Hz refresh for one second.
        for i in 0..120u64 {
            let now = Duration::from_micros(i * 8_333);
            if session.wants_frame(now) {
                session.submit(now, frame());
            }
        }
        let n = session.frames_submitted();
        assert!((9..=11).contains(&n), "sampled {n} frames");
    }

    #[test]
    fn default_dest_names_the_duration() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            default_dest(dir.path(), Duration::from_secs(10)),
            dir.path().join("flowfield-10s")
        );
    }

    #[test]
    fn default_dest_skips_names_already_taken() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("flowfield-10s")).unwrap();
        std::fs::write(dir.path().join("flowfield-10s-2"), b"").unwrap();
        assert_eq!(
            default_dest(dir.path(), Duration::from_secs(10)),
            dir.path().join("flowfield-10s-3")
        );
        assert_eq!(
            default_dest(dir.path(), Duration::from_secs(5)),
            dir.path().join("flowfield-5s")
        );
    }

    #[test]
    fn closed_session_drains_without_blocking_the_caller() {
        let f = MockFactory::new(&["webm"]);
        let (gate_tx, gate_rx) = mpsc::channel();
        *f.gate.lock().unwrap() = Some(gate_rx);
        let mut session = CaptureSession::start(
            &f,
            &CaptureConfig {
                codecs: codecs(&["webm"]),
                queue_depth: 4,
                ..CaptureConfig::default()
            },
            params("out".into()),
            Duration::ZERO,
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(session.submit(Duration::ZERO, frame()));
        assert!(!session.is_drained());

        session.close();
        assert!(!session.is_drained(), "encoder is still held by the gate");
        assert!(!session.submit(Duration::from_millis(20), frame()));

        drop(gate_tx);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !session.is_drained() {
            assert!(std::time::Instant::now() < deadline, "encoder never drained");
            std::thread::sleep(Duration::from_millis(1));
        }
        let artifact = session.finish().unwrap();
        assert_eq!(artifact.frames, 1);
        assert_eq!(artifact.dropped, 1);
    }
}
