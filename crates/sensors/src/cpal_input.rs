//! Microphone input through `cpal`.
//!
//! `cpal::Stream` is not `Send` on every host, so the stream is built and
//! owned by a dedicated thread that parks until the session is stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat};
use tracing::{debug, warn};

use flowfield_core::error::FlowError;

use crate::audio::{AudioDevice, AudioStream, SamplePublisher};
use crate::lifecycle::DeviceSession;

const DEVICE: &str = "microphone";

/// Names of the host's input devices.
pub fn list_input_devices() -> Result<Vec<String>, FlowError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| FlowError::device(DEVICE, format!("enumerate input devices: {e}")))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// The default input device, or the first one whose name contains `query`
/// (case-insensitive).
pub struct CpalMicrophone {
    name: String,
    query: Option<String>,
}

impl CpalMicrophone {
    pub fn new(query: Option<String>) -> Self {
        let name = match &query {
            Some(q) => format!("{DEVICE} ({q})"),
            None => DEVICE.to_string(),
        };
        Self { name, query }
    }
}

impl AudioDevice for CpalMicrophone {
    fn name(&self) -> &str {
        &self.name
    }

    fn acquire(&self, samples: SamplePublisher) -> Result<AudioStream, FlowError> {
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let query = self.query.clone();
        let handle = thread::Builder::new()
            .name("cpal-input".into())
            .spawn(move || match open_stream(query.as_deref(), samples) {
                Ok((stream, sample_rate)) => {
                    let _ = tx.send(Ok(sample_rate));
                    while !stop_for_thread.load(Ordering::Acquire) {
                        thread::park();
                    }
                    drop(stream);
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                }
            })?;

        let sample_rate = match rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(FlowError::device(&self.name, "input thread exited"));
            }
        };
        Ok(AudioStream {
            session: Box::new(CpalSession {
                stop,
                handle: Some(handle),
            }),
            sample_rate,
        })
    }
}

struct CpalSession {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceSession for CpalSession {
    fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(h) = self.handle.take() {
            h.thread().unpark();
            let _ = h.join();
        }
    }
}

impl Drop for CpalSession {
    fn drop(&mut self) {
        DeviceSession::stop(self);
    }
}

fn select_device(host: &cpal::Host, query: Option<&str>) -> Result<cpal::Device, FlowError> {
    let Some(want) = query.map(str::to_lowercase) else {
        return host
            .default_input_device()
            .ok_or_else(|| FlowError::device(DEVICE, "no default input device"));
    };
    let mut devices = host
        .input_devices()
        .map_err(|e| FlowError::device(DEVICE, format!("enumerate input devices: {e}")))?;
    devices
        .find(|d| {
            d.name()
                .map(|n| n.to_lowercase().contains(&want))
                .unwrap_or(false)
        })
        .ok_or_else(|| FlowError::device(DEVICE, format!("no input device matching {want:?}")))
}

fn open_stream(
    query: Option<&str>,
    mut samples: SamplePublisher,
) -> Result<(cpal::Stream, u32), FlowError> {
    let host = cpal::default_host();
    let device = select_device(&host, query)?;
    let supported = device
        .default_input_config()
        .map_err(|e| FlowError::device(DEVICE, format!("default input config: {e}")))?;
    let sample_rate = supported.sample_rate().0;
    let channels = usize::from(supported.channels());
    let config: cpal::StreamConfig = supported.config();
    debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        format = ?supported.sample_format(),
        "opening input stream"
    );

    let err_fn = |err| warn!(error = %err, "audio input stream error");
    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _| {
                samples.publish_interleaved(data, channels);
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _| push_converted(&mut samples, data, channels),
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _| push_converted(&mut samples, data, channels),
            err_fn,
            None,
        ),
        fmt => {
            return Err(FlowError::device(
                DEVICE,
                format!("unsupported sample format: {fmt:?}"),
            ))
        }
    }
    .map_err(|e| FlowError::device(DEVICE, format!("build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| FlowError::device(DEVICE, format!("start input stream: {e}")))?;
    Ok((stream, sample_rate))
}

fn push_converted<T: Sample<Float = f32> + Copy>(
    samples: &mut SamplePublisher,
    data: &[T],
    channels: usize,
) {
    samples.publish_interleaved_with(data, channels, |s| s.to_float_sample());
}
