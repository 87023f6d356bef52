//! The `FlowEngine` facade: owns the field, particles, surface, sensor
//! adapters, scheduler and capture session, and runs one frame per
//! [`FlowEngine::on_vsync`] while a frame request is pending.

use std::sync::Arc;
use std::time::Duration;

use flowfield_core::controls::ControlValues;
use flowfield_core::error::FlowError;
use flowfield_core::field::{FieldState, FieldVariant, FlowField, RenderMode};
use flowfield_core::noise::SimplexNoise;
use flowfield_core::particle::{ParticleSystem, DEFAULT_PARTICLES};
use flowfield_core::surface::{Raster, Surface};
use flowfield_render::{clear, Dispatcher, HeightmapRenderer, Modulation, RenderContext, BACKGROUND};
use flowfield_sensors::audio::{AudioAdapter, AudioDevice};
use flowfield_sensors::lifecycle::AdapterState;
use flowfield_sensors::motion::{MotionAdapter, VideoDevice};
use flowfield_sensors::spectrum::AudioBands;
use tracing::{debug, info, warn};

use crate::capture::{
    default_dest, BuiltinEncoders, CaptureArtifact, CaptureFrame, CaptureSession, EncoderFactory,
    EncoderParams,
};
use crate::config::EngineConfig;
use crate::scheduler::{PlayState, Scheduler};

/// Fraction of the remaining distance the domain offset moves each frame.
pub const OFFSET_EASING: f64 = 0.1;

pub struct FlowEngine {
    config: EngineConfig,
    field: FlowField,
    state: FieldState,
    particles: ParticleSystem,
    surface: Raster,
    dispatcher: Dispatcher,
    scheduler: Scheduler,
    motion: Option<MotionAdapter>,
    audio: Option<AudioAdapter>,
    encoders: Box<dyn EncoderFactory>,
    capture: Option<CaptureSession>,
    /// Session past its duration whose encoder is still writing queued frames.
    draining: Option<CaptureSession>,
    capture_result: Option<Result<CaptureArtifact, FlowError>>,
    /// Controls the engine state was last synced to; starts at the defaults
    /// the engine is built with.
    last_controls: ControlValues,
    modulation: Modulation,
    bands: AudioBands,
    frame_index: u64,
}

impl FlowEngine {
    /// Builds a stopped engine with a black surface and the default
    /// particle population.
    pub fn new(config: EngineConfig) -> Result<Self, FlowError> {
        config.validate()?;
        let field = FlowField::new(SimplexNoise::new(config.noise_seed), config.field.clone());
        let mut particles =
            ParticleSystem::new(config.width as f64, config.height as f64, config.seed)?;
        particles.initialize(DEFAULT_PARTICLES);
        let surface = Raster::new(config.width, config.height, BACKGROUND)?;
        let dispatcher = Dispatcher::new(
            RenderMode::default(),
            HeightmapRenderer::new(config.heightmap_resolution),
        );
        let modulation = Modulation::unmodulated(ControlValues::default().strength);
        debug!(
            width = config.width,
            height = config.height,
            seed = config.seed,
            noise_seed = config.noise_seed,
            "flow engine created"
        );
        Ok(Self {
            field,
            state: FieldState::default(),
            particles,
            surface,
            dispatcher,
            scheduler: Scheduler::new(),
            motion: None,
            audio: None,
            encoders: Box::new(BuiltinEncoders),
            capture: None,
            draining: None,
            capture_result: None,
            last_controls: ControlValues::default(),
            modulation,
            bands: AudioBands::SILENT,
            frame_index: 0,
            config,
        })
    }

    /// Attaches the camera used by motion control.
    pub fn with_motion_device(mut self, device: Arc<dyn VideoDevice>) -> Self {
        self.motion = Some(MotionAdapter::new(device, self.config.motion.clone()));
        self
    }

    /// Attaches the microphone used by audio reactivity.
    pub fn with_audio_device(mut self, device: Arc<dyn AudioDevice>) -> Self {
        self.audio = Some(AudioAdapter::new(device, self.config.spectrum.clone()));
        self
    }

    /// Replaces the encoders offered to capture sessions.
    pub fn with_encoders(mut self, encoders: Box<dyn EncoderFactory>) -> Self {
        self.encoders = encoders;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn surface(&self) -> &Raster {
        &self.surface
    }

    pub fn field_state(&self) -> &FieldState {
        &self.state
    }

    pub fn particles(&self) -> &ParticleSystem {
        &self.particles
    }

    pub fn play_state(&self) -> PlayState {
        self.scheduler.state()
    }

    pub fn render_mode(&self) -> RenderMode {
        self.dispatcher.mode()
    }

    /// Frames executed since construction.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Modulation applied to the most recent frame.
    pub fn modulation(&self) -> Modulation {
        self.modulation
    }

    /// Audio bands read for the most recent frame.
    pub fn audio_bands(&self) -> AudioBands {
        self.bands
    }

    pub fn motion_state(&self) -> AdapterState {
        self.motion.as_ref().map_or(AdapterState::Disabled, MotionAdapter::state)
    }

    pub fn audio_state(&self) -> AdapterState {
        self.audio.as_ref().map_or(AdapterState::Disabled, AudioAdapter::state)
    }

    /// `true` while a capture records or its encoder is still draining.
    pub fn is_capturing(&self) -> bool {
        self.capture.is_some() || self.draining.is_some()
    }

    /// `true` while a capture accepts frames.
    pub fn is_recording(&self) -> bool {
        self.capture.is_some()
    }

    // -- animation control --

    /// Enters running and schedules a frame.
    pub fn start(&mut self) {
        self.scheduler.play();
    }

    /// Cancels the pending frame. Idempotent.
    pub fn stop(&mut self) {
        self.scheduler.pause();
    }

    /// Clears the surface, respawns the population at its current size, and
    /// starts running.
    pub fn reset(&mut self) {
        self.stop();
        clear(&mut self.surface);
        let count = self.particles.len();
        self.particles.initialize(count);
        info!(particles = count, "flow engine reset");
        self.start();
    }

    /// Switches render mode, clearing the surface if it changed.
    pub fn set_render_mode(&mut self, mode: RenderMode) {
        self.state.mode = mode;
        self.dispatcher.set_mode(mode, &mut self.surface);
    }

    /// Switches the field variant, clearing the surface if it changed.
    pub fn set_field_variant(&mut self, variant: FieldVariant) {
        if self.state.variant == variant {
            return;
        }
        debug!(from = %self.state.variant, to = %variant, "field variant switched");
        self.state.variant = variant;
        clear(&mut self.surface);
    }

    /// Respawns the population with `count` clamped to [100, 5000].
    /// Returns the actual count.
    pub fn set_particle_count(&mut self, count: usize) -> usize {
        let n = self.particles.initialize(count);
        debug!(requested = count, actual = n, "particle count set");
        n
    }

    /// Writes the current surface as a PNG.
    #[cfg(feature = "png")]
    pub fn export_still_image(&self, path: &std::path::Path) -> Result<(), FlowError> {
        flowfield_render::snapshot::write_png(&self.surface, path)?;
        info!(path = %path.display(), "still image exported");
        Ok(())
    }

    // -- sensors --

    /// Starts acquiring the camera. Fails only if no camera is attached;
    /// acquisition errors surface later through [`motion_state`](Self::motion_state).
    pub fn enable_motion_control(&mut self) -> Result<AdapterState, FlowError> {
        let adapter = self
            .motion
            .as_mut()
            .ok_or_else(|| FlowError::device("camera", "no video device attached"))?;
        adapter.enable();
        Ok(adapter.state())
    }

    pub fn disable_motion_control(&mut self) {
        if let Some(adapter) = self.motion.as_mut() {
            adapter.disable();
        }
    }

    /// Starts acquiring the microphone. Fails only if none is attached.
    pub fn enable_audio_control(&mut self) -> Result<AdapterState, FlowError> {
        let adapter = self
            .audio
            .as_mut()
            .ok_or_else(|| FlowError::device("microphone", "no audio device attached"))?;
        adapter.enable();
        Ok(adapter.state())
    }

    pub fn disable_audio_control(&mut self) {
        if let Some(adapter) = self.audio.as_mut() {
            adapter.disable();
        }
        self.bands = AudioBands::SILENT;
    }

    // -- capture --

    /// Starts recording for `duration` from `now` and forces the animation
    /// to run. A capture already in progress is finished first.
    ///
    /// Returns the negotiated codec.
    pub fn start_capture(&mut self, duration: Duration, now: Duration) -> Result<String, FlowError> {
        if self.is_capturing() {
            self.finish_capture();
        }
        let params = EncoderParams {
            width: self.surface.width(),
            height: self.surface.height(),
            fps: self.config.capture.fps,
            dest: default_dest(&self.config.capture.output_dir, duration),
        };
        let session = CaptureSession::start(
            self.encoders.as_ref(),
            &self.config.capture,
            params,
            now,
            duration,
        )?;
        let codec = session.codec().to_string();
        self.capture = Some(session);
        self.capture_result = None;
        self.start();
        Ok(codec)
    }

    /// Ends the capture now, waiting for the encoder to write every queued
    /// frame. The outcome is kept for
    /// [`take_capture_result`](Self::take_capture_result). The scheduler
    /// keeps its current state.
    pub fn finish_capture(&mut self) {
        if let Some(session) = self.draining.take() {
            self.store_capture_result(session);
        }
        if let Some(session) = self.capture.take() {
            self.store_capture_result(session);
        }
    }

    fn store_capture_result(&mut self, session: CaptureSession) {
        let result = session.finish();
        if let Err(e) = &result {
            warn!(error = %e, "capture failed");
        }
        self.capture_result = Some(result);
    }

    /// Stops feeding a due capture and leaves its encoder draining on the
    /// worker thread; the frame loop collects it once the worker is done.
    fn close_due_capture(&mut self, now: Duration) {
        if !self.capture.as_ref().is_some_and(|c| c.is_due(now)) {
            return;
        }
        if let Some(mut session) = self.capture.take() {
            session.close();
            if let Some(previous) = self.draining.replace(session) {
                self.store_capture_result(previous);
            }
        }
    }

    fn collect_drained_capture(&mut self) {
        if self.draining.as_ref().is_some_and(CaptureSession::is_drained) {
            if let Some(session) = self.draining.take() {
                self.store_capture_result(session);
            }
        }
    }

    /// Outcome of the last finished capture, once.
    pub fn take_capture_result(&mut self) -> Option<Result<CaptureArtifact, FlowError>> {
        self.capture_result.take()
    }

    // -- frame loop --

    /// Host refresh callback. Runs one frame if a request is pending and
    /// returns whether it did.
    ///
    /// A due capture stops recording first, whether or not a frame runs, and
    /// its artifact becomes available once the encoder has drained.
    pub fn on_vsync(&mut self, now: Duration, controls: &ControlValues) -> bool {
        self.close_due_capture(now);
        self.collect_drained_capture();
        if self.scheduler.take_due().is_none() {
            return false;
        }

        let controls = controls.clamped();
        self.apply_controls(&controls);

        let motion = match self.motion.as_mut() {
            Some(adapter) => {
                let magnitude = adapter.on_frame(self.frame_index);
                self.state.set_target_offset(adapter.target_offset());
                magnitude
            }
            None => 0.0,
        };
        self.bands = match self.audio.as_mut() {
            Some(adapter) => {
                adapter.poll();
                adapter.read_audio_bands()
            }
            None => AudioBands::SILENT,
        };

        self.state.ease_offset(OFFSET_EASING);
        self.modulation = Modulation::new(
            controls.strength,
            motion,
            f64::from(self.bands.low),
            f64::from(self.bands.high),
        );
        self.state.advance(controls.speed, f64::from(self.bands.mid));

        let ctx = RenderContext {
            field: &self.field,
            state: &self.state,
            controls: &controls,
            modulation: self.modulation,
        };
        self.dispatcher.render(&ctx, &mut self.particles, &mut self.surface);

        if let Some(session) = self.capture.as_mut() {
            if session.wants_frame(now) {
                session.submit(
                    now,
                    CaptureFrame {
                        width: self.surface.width(),
                        height: self.surface.height(),
                        rgba: self.surface.to_rgba8(),
                    },
                );
            }
        }

        self.frame_index += 1;
        self.scheduler.reschedule();
        true
    }

    /// Applies mode, variant and count only when they differ from the
    /// previous frame's controls, so API calls are not overridden every frame.
    fn apply_controls(&mut self, controls: &ControlValues) {
        let last = std::mem::replace(&mut self.last_controls, controls.clone());
        if last.mode != controls.mode {
            self.set_render_mode(controls.mode);
        }
        if last.variant != controls.variant {
            self.set_field_variant(controls.variant);
        }
        self.particles.set_base_hue(controls.hue);
        if last.count != controls.count {
            self.set_particle_count(controls.count);
        }
    }
}

impl Drop for FlowEngine {
    fn drop(&mut self) {
        self.finish_capture();
    }
}
