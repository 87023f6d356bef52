#![deny(unsafe_code)]
//! CLI binary for the flowfield visualizer.
//!
//! Subcommands:
//! - `render`: run the flow field N frames, write a PNG
//! - `capture`: record a timed capture through the codec preference list
//! - `list`: print render modes, field variants and codecs

mod error;

use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use clap::{ArgAction, Args, Parser, Subcommand};
use error::CliError;
use flowfield_core::controls::ControlValues;
use flowfield_core::field::{FieldVariant, RenderMode};
use flowfield_core::seed::Seed;
use flowfield_runtime::{EngineConfig, FlowEngine, DEFAULT_CODECS};
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowfield", about = "Sensor-modulated noise flow-field renderer")]
struct Cli {
    /// Output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace). `RUST_LOG` wins.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct SceneArgs {
    /// Surface width in pixels.
    #[arg(short = 'W', long)]
    width: Option<usize>,

    /// Surface height in pixels.
    #[arg(short = 'H', long)]
    height: Option<usize>,

    /// Particle spawn seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Noise permutation seed.
    #[arg(long)]
    noise_seed: Option<u32>,

    /// Render mode (particles, ribbons, arrows, heightmap).
    #[arg(short, long)]
    mode: Option<String>,

    /// Field variant (fbm, curl, warp).
    #[arg(long)]
    variant: Option<String>,

    /// Control values as a JSON object (count, scale, strength, fade, speed, hue).
    #[arg(long, default_value = "{}")]
    params: String,

    /// Engine config JSON file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replay a saved seed JSON file (size, seeds, params, frames).
    #[arg(long)]
    seed_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the field for N frames and write a PNG snapshot.
    Render {
        #[command(flatten)]
        scene: SceneArgs,

        /// Frames to simulate. Defaults to the seed file's count, else 300.
        #[arg(short, long)]
        frames: Option<usize>,

        /// Output file path.
        #[arg(short, long, default_value = "flowfield.png")]
        output: PathBuf,
    },
    /// Record a capture of the given length.
    Capture {
        #[command(flatten)]
        scene: SceneArgs,

        /// Capture length in seconds.
        #[arg(short, long, default_value_t = 10.0)]
        seconds: f64,

        /// Capture frame rate.
        #[arg(long, default_value_t = 60)]
        fps: u32,

        /// Directory the capture artifact is written into.
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Drive audio reactivity from the default (or matching) microphone.
        /// Implies real-time pacing.
        #[cfg(feature = "cpal")]
        #[arg(long)]
        mic: bool,

        /// Input device name filter for `--mic`.
        #[cfg(feature = "cpal")]
        #[arg(long)]
        mic_device: Option<String>,
    },
    /// List render modes, field variants and capture codecs.
    List,
}

struct Scene {
    config: EngineConfig,
    controls: ControlValues,
    frames: Option<usize>,
}

fn load_json(path: &Path) -> Result<Value, CliError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::Io(format!("read {}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| CliError::Input(format!("invalid JSON in {}: {e}", path.display())))
}

fn build_scene(args: &SceneArgs) -> Result<Scene, CliError> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json(&load_json(path)?),
        None => EngineConfig::default(),
    };

    let params: Value = serde_json::from_str(&args.params)
        .map_err(|e| CliError::Input(format!("invalid --params JSON: {e}")))?;
    if !params.is_object() {
        return Err(CliError::Input("--params must be a JSON object".into()));
    }
    let mut controls = ControlValues::from_json(&params);
    let mut frames = None;

    if let Some(path) = &args.seed_file {
        let seed: Seed = serde_json::from_value(load_json(path)?)
            .map_err(|e| CliError::Input(format!("invalid seed file {}: {e}", path.display())))?;
        seed.validate()?;
        let replay = EngineConfig::from_seed(&seed);
        config.width = replay.width;
        config.height = replay.height;
        config.seed = replay.seed;
        config.noise_seed = replay.noise_seed;
        controls = seed.controls();
        frames = (seed.frames > 0).then_some(seed.frames);
        debug!(path = %path.display(), "replaying seed file");
    }

    if let Some(w) = args.width {
        config.width = w;
    }
    if let Some(h) = args.height {
        config.height = h;
    }
    if let Some(s) = args.seed {
        config.seed = s;
    }
    if let Some(s) = args.noise_seed {
        config.noise_seed = s;
    }
    if let Some(m) = &args.mode {
        controls.mode = m.parse::<RenderMode>()?;
    }
    if let Some(v) = &args.variant {
        controls.variant = v.parse::<FieldVariant>()?;
    }
    Ok(Scene {
        config,
        controls,
        frames,
    })
}

/// Host clock for frame `i`: synthetic at `fps`, or wall time when paced.
fn frame_clock(i: u64, fps: u32, paced_from: Option<Instant>) -> Duration {
    let ideal = Duration::from_secs_f64(i as f64 / f64::from(fps.max(1)));
    match paced_from {
        Some(start) => {
            let target = start + ideal;
            let now = Instant::now();
            if target > now {
                thread::sleep(target - now);
            }
            start.elapsed()
        }
        None => ideal,
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::List => {
            let modes: Vec<&str> = RenderMode::ALL.iter().map(|m| m.as_str()).collect();
            let variants: Vec<&str> = FieldVariant::ALL.iter().map(|v| v.as_str()).collect();
            #[cfg(feature = "cpal")]
            let inputs = flowfield_sensors::cpal_input::list_input_devices().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "could not list input devices");
                Vec::new()
            });
            #[cfg(not(feature = "cpal"))]
            let inputs: Vec<String> = Vec::new();

            if cli.json {
                print_json(&serde_json::json!({
                    "modes": modes,
                    "variants": variants,
                    "codecs": DEFAULT_CODECS,
                    "inputs": inputs,
                }))?;
            } else {
                println!("Render modes:");
                println!("  {}", modes.join(", "));
                println!("Field variants:");
                println!("  {}", variants.join(", "));
                println!("Capture codecs (preference order):");
                println!("  {}", DEFAULT_CODECS.join(", "));
                if !inputs.is_empty() {
                    println!("Audio inputs:");
                    for name in &inputs {
                        println!("  {name}");
                    }
                }
            }
        }
        Command::Render {
            scene,
            frames,
            output,
        } => {
            let scene = build_scene(&scene)?;
            let frames = frames.or(scene.frames).unwrap_or(300);
            let (width, height, seed) = (scene.config.width, scene.config.height, scene.config.seed);

            let mut engine = FlowEngine::new(scene.config)?;
            engine.start();
            let started = Instant::now();
            for i in 0..frames as u64 {
                engine.on_vsync(frame_clock(i, 60, None), &scene.controls);
            }
            info!(frames, elapsed_ms = started.elapsed().as_millis() as u64, "render finished");
            engine.export_still_image(&output)?;

            if cli.json {
                print_json(&serde_json::json!({
                    "mode": scene.controls.mode.as_str(),
                    "variant": scene.controls.variant.as_str(),
                    "width": width,
                    "height": height,
                    "frames": frames,
                    "seed": seed,
                    "output": output.display().to_string(),
                }))?;
            } else {
                eprintln!(
                    "rendered {} / {} ({width}x{height}, {frames} frames, seed {seed}) -> {}",
                    scene.controls.mode,
                    scene.controls.variant,
                    output.display()
                );
            }
        }
        Command::Capture {
            scene,
            seconds,
            fps,
            output_dir,
            #[cfg(feature = "cpal")]
            mic,
            #[cfg(feature = "cpal")]
            mic_device,
        } => {
            if !seconds.is_finite() || seconds <= 0.0 {
                return Err(CliError::Input("--seconds must be positive".into()));
            }
            let mut scene = build_scene(&scene)?;
            scene.config.capture.fps = fps.max(1);
            scene.config.capture.output_dir = output_dir;
            std::fs::create_dir_all(&scene.config.capture.output_dir)?;

            #[allow(unused_mut)]
            let mut engine = FlowEngine::new(scene.config)?;
            #[allow(unused_mut)]
            let mut paced = false;
            #[cfg(feature = "cpal")]
            if mic {
                let device = flowfield_sensors::cpal_input::CpalMicrophone::new(mic_device);
                engine = engine.with_audio_device(std::sync::Arc::new(device));
                engine.enable_audio_control()?;
                paced = true;
            }

            let codec = engine.start_capture(Duration::from_secs_f64(seconds), Duration::ZERO)?;
            info!(codec = %codec, seconds, fps, paced, "capturing");
            let paced_from = paced.then(Instant::now);
            let mut i = 0u64;
            while engine.is_capturing() {
                engine.on_vsync(frame_clock(i, fps, paced_from), &scene.controls);
                if !engine.is_recording() {
                    // Encoder is writing the last queued frames.
                    thread::sleep(Duration::from_millis(1));
                }
                i += 1;
            }
            engine.disable_audio_control();

            let artifact = match engine.take_capture_result() {
                Some(result) => result?,
                None => return Err(CliError::Io("capture produced no result".into())),
            };
            if cli.json {
                print_json(&serde_json::to_value(&artifact)?)?;
            } else {
                eprintln!(
                    "captured {} frames ({} dropped) as {} -> {}",
                    artifact.frames,
                    artifact.dropped,
                    artifact.codec,
                    artifact.path.display()
                );
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = cli.json;
    if let Err(e) = run(cli) {
        if json_mode {
            let j = serde_json::json!({"error": e.to_string(), "exit_code": e.exit_code()});
            eprintln!("{}", serde_json::to_string_pretty(&j).unwrap_or_default());
        } else {
            eprintln!("error: {e}");
        }
        process::exit(e.exit_code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn scene_args(extra: &[&str]) -> SceneArgs {
        let mut argv = vec!["flowfield", "render"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Render { scene, .. } => scene,
            _ => unreachable!(),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config_defaults() {
        let s = build_scene(&scene_args(&[
            "-W", "64", "-H", "48", "--seed", "3", "--mode", "Arrows", "--variant", "curl",
        ]))
        .unwrap();
        assert_eq!((s.config.width, s.config.height, s.config.seed), (64, 48, 3));
        assert_eq!(s.controls.mode, RenderMode::Arrows);
        assert_eq!(s.controls.variant, FieldVariant::Curl);
    }

    #[test]
    fn params_are_clamped_not_rejected() {
        let s = build_scene(&scene_args(&["--params", r#"{"count": 99999, "fade": 3}"#])).unwrap();
        assert_eq!(s.controls.count, 5000);
        assert_eq!(s.controls.fade, 0.5);
    }

    #[test]
    fn unknown_mode_is_an_input_error() {
        let err = build_scene(&scene_args(&["--mode", "spirals"])).err().unwrap();
        assert_eq!(err.exit_code(), 12);
    }

    #[test]
    fn non_object_params_are_rejected() {
        let err = build_scene(&scene_args(&["--params", "[1,2]"])).err().unwrap();
        assert_eq!(err.exit_code(), 12);
    }

    #[test]
    fn seed_file_sets_size_seeds_and_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        let mut seed = Seed::new(40, 30, 11);
        seed.frames = 25;
        seed.params = serde_json::json!({"mode": "ribbons"});
        std::fs::write(&path, serde_json::to_string(&seed).unwrap()).unwrap();

        let s = build_scene(&scene_args(&["--seed-file", path.to_str().unwrap()])).unwrap();
        assert_eq!((s.config.width, s.config.height, s.config.seed), (40, 30, 11));
        assert_eq!(s.controls.mode, RenderMode::Ribbons);
        assert_eq!(s.frames, Some(25));
    }

    #[test]
    fn synthetic_clock_steps_by_frame_interval() {
        assert_eq!(frame_clock(0, 60, None), Duration::ZERO);
        assert_eq!(frame_clock(60, 60, None), Duration::from_secs(1));
        assert_eq!(frame_clock(5, 0, None), Duration::from_secs(5));
    }
}
