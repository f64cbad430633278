use std::sync::mpsc;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use tracing::info;

/// Seconds of audio the callback can run ahead of the detection loop.
const QUEUE_SECS: usize = 5;

/// Linear-interpolation resampler from the device rate to the detector rate.
struct Resampler {
    ratio: f64,
    fractional_pos: f64,
}

impl Resampler {
    fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            ratio: source_rate as f64 / target_rate as f64,
            fractional_pos: 0.0,
        }
    }

    /// Returns true if resampling is needed (rates differ).
    fn is_needed(&self) -> bool {
        (self.ratio - 1.0).abs() > 0.001
    }

    /// Resample a block of mono samples into `out`, replacing its contents.
    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        out.clear();
        if input.is_empty() {
            return;
        }

        while (self.fractional_pos as usize) < input.len() {
            let idx = self.fractional_pos as usize;
            let frac = self.fractional_pos - idx as f64;

            let current = input[idx];
            let next = if idx + 1 < input.len() {
                input[idx + 1]
            } else {
                current
            };

            out.push(current + (next - current) * frac as f32);
            self.fractional_pos += self.ratio;
        }

        self.fractional_pos -= input.len() as f64;
    }
}

/// Detector side of the capture path: mono samples at the configured rate,
/// plus stream errors reported by the device.
pub struct AudioInput {
    pub consumer: HeapCons<f32>,
    pub faults: mpsc::Receiver<String>,
}

impl AudioInput {
    /// An input fed by hand instead of a device, `capacity` samples deep.
    pub fn channel(capacity: usize) -> (HeapProd<f32>, mpsc::Sender<String>, AudioInput) {
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let (fault_tx, faults) = mpsc::channel();
        (producer, fault_tx, AudioInput { consumer, faults })
    }
}

fn device_name(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.to_string())
        .unwrap_or_else(|_| "Unknown".into())
}

/// Names of the available input devices.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .context("Failed to enumerate input devices")?;
    Ok(devices.map(|d| device_name(&d)).collect())
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device> {
    match name {
        None => host
            .default_input_device()
            .context("No input device available. Check microphone permissions."),
        Some(name) => host
            .input_devices()
            .context("Failed to enumerate input devices")?
            .find(|d| device_name(d) == name)
            .with_context(|| format!("Input device '{}' not found", name)),
    }
}

/// Open the input device and start streaming mono samples at `target_rate`.
/// The stream stops when the returned `Stream` is dropped.
pub fn build_input_stream(device: Option<&str>, target_rate: u32) -> Result<(Stream, AudioInput)> {
    let host = cpal::default_host();
    let device = find_device(&host, device)?;

    let supported = device
        .default_input_config()
        .context("Failed to get default input config")?;

    let sample_format = supported.sample_format();
    let sample_rate = supported.sample_rate();
    let channels = supported.channels();

    info!(
        device = %device_name(&device),
        sample_rate,
        channels,
        format = ?sample_format,
        "audio device opened"
    );

    let config: StreamConfig = supported.into();

    let (producer, fault_tx, input) = AudioInput::channel(target_rate as usize * QUEUE_SECS);

    let stream = build_stream_for_format(
        &device,
        &config,
        sample_format,
        sample_rate,
        target_rate,
        channels,
        producer,
        fault_tx,
    )?;

    stream.play().context("Failed to start audio stream")?;

    Ok((stream, input))
}

#[allow(clippy::too_many_arguments)]
fn build_stream_for_format(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    sample_rate: u32,
    target_rate: u32,
    channels: u16,
    producer: HeapProd<f32>,
    faults: mpsc::Sender<String>,
) -> Result<Stream> {
    let rates = (sample_rate, target_rate);
    match format {
        SampleFormat::F32 => {
            build_typed_stream::<f32>(device, config, rates, channels, producer, faults, |s| s)
        }
        SampleFormat::I16 => build_typed_stream::<i16>(
            device,
            config,
            rates,
            channels,
            producer,
            faults,
            |s| s as f32 / 32768.0,
        ),
        SampleFormat::U16 => build_typed_stream::<u16>(
            device,
            config,
            rates,
            channels,
            producer,
            faults,
            |s| (s as f32 / 32768.0) - 1.0,
        ),
        other => anyhow::bail!("Unsupported sample format: {:?}", other),
    }
}

fn build_typed_stream<T: cpal::SizedSample + Send + 'static>(
    device: &cpal::Device,
    config: &StreamConfig,
    (sample_rate, target_rate): (u32, u32),
    channels: u16,
    mut producer: HeapProd<f32>,
    faults: mpsc::Sender<String>,
    to_f32: fn(T) -> f32,
) -> Result<Stream> {
    // Buffers live in the closure and are reused; the callback never allocates
    // once they have grown to the device block size.
    let mut mono_buf: Vec<f32> = Vec::with_capacity(4096);
    let mut resample_buf: Vec<f32> = Vec::with_capacity(4096);
    let mut resampler = Resampler::new(sample_rate, target_rate);
    let needs_resample = resampler.is_needed();
    let ch = channels as usize;

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _info: &cpal::InputCallbackInfo| {
            mono_buf.clear();
            if ch == 1 {
                mono_buf.extend(data.iter().map(|&s| to_f32(s)));
            } else {
                for frame in data.chunks(ch) {
                    let sum: f32 = frame.iter().map(|&s| to_f32(s)).sum();
                    mono_buf.push(sum / ch as f32);
                }
            }

            let samples = if needs_resample {
                resampler.process(&mono_buf, &mut resample_buf);
                &resample_buf
            } else {
                &mono_buf
            };

            // Lock-free; if the detector falls behind the excess is dropped.
            producer.push_slice(samples);
        },
        move |err| {
            let _ = faults.send(err.to_string());
        },
        None,
    )?;

    Ok(stream)
}
