//! Microphone input via cpal

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;

use super::session::AudioTrack;

/// Seconds of audio kept when nobody drains the buffer
const MAX_BUFFERED_SECONDS: usize = 2;

/// Default input device streaming interleaved f32 samples
pub struct MicrophoneCapture {
    stream: Option<cpal::Stream>,
    samples: Arc<Mutex<VecDeque<f32>>>,
    running: Arc<AtomicBool>,
    sample_rate: u32,
    channels: u16,
    device_name: String,
}

impl MicrophoneCapture {
    /// Open the default input device and start streaming
    pub fn open() -> Result<Self, String> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| "No default input device".to_string())?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let config = device
            .default_input_config()
            .map_err(|e| format!("Failed to get input config: {}", e))?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels();
        let capacity = sample_rate as usize * channels as usize * MAX_BUFFERED_SECONDS;

        tracing::info!(
            "Microphone: {} @ {}Hz, {} channels",
            device_name,
            sample_rate,
            channels
        );

        let samples = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));
        let running = Arc::new(AtomicBool::new(true));
        let err_fn = |err| tracing::error!("Audio input error: {}", err);
        let sample_format = config.sample_format();
        let stream_config: cpal::StreamConfig = config.into();

        let stream = match sample_format {
            cpal::SampleFormat::F32 => {
                let samples = Arc::clone(&samples);
                let running = Arc::clone(&running);
                device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if running.load(Ordering::Relaxed) {
                            push_samples(&samples, capacity, data.iter().copied());
                        }
                    },
                    err_fn,
                    None,
                )
            }
            cpal::SampleFormat::I16 => {
                let samples = Arc::clone(&samples);
                let running = Arc::clone(&running);
                device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        if running.load(Ordering::Relaxed) {
                            push_samples(
                                &samples,
                                capacity,
                                data.iter().map(|&s| s as f32 / i16::MAX as f32),
                            );
                        }
                    },
                    err_fn,
                    None,
                )
            }
            cpal::SampleFormat::U16 => {
                let samples = Arc::clone(&samples);
                let running = Arc::clone(&running);
                device.build_input_stream(
                    &stream_config,
                    move |data: &[u16], _: &cpal::InputCallbackInfo| {
                        if running.load(Ordering::Relaxed) {
                            push_samples(
                                &samples,
                                capacity,
                                data.iter().map(|&s| (s as f32 / u16::MAX as f32) * 2.0 - 1.0),
                            );
                        }
                    },
                    err_fn,
                    None,
                )
            }
            other => return Err(format!("Unsupported sample format: {:?}", other)),
        }
        .map_err(|e| format!("Failed to build stream: {}", e))?;

        stream
            .play()
            .map_err(|e| format!("Failed to start stream: {}", e))?;

        Ok(Self {
            stream: Some(stream),
            samples,
            running,
            sample_rate,
            channels,
            device_name,
        })
    }

    /// Take every buffered sample
    pub fn drain(&self) -> Vec<f32> {
        self.samples.lock().drain(..).collect()
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::warn!("Failed to pause microphone stream: {}", e);
            }
            tracing::info!("Microphone stopped: {}", self.device_name);
        }
        self.samples.lock().clear();
    }
}

/// Append samples, dropping the oldest beyond `capacity`
fn push_samples(buffer: &Mutex<VecDeque<f32>>, capacity: usize, data: impl Iterator<Item = f32>) {
    let mut buffer = buffer.lock();
    buffer.extend(data);
    let overflow = buffer.len().saturating_sub(capacity);
    if overflow > 0 {
        buffer.drain(..overflow);
    }
}

impl AudioTrack for MicrophoneCapture {
    fn label(&self) -> &str {
        &self.device_name
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn drain_samples(&mut self) -> Vec<f32> {
        self.drain()
    }

    fn stop(&mut self) {
        MicrophoneCapture::stop(self);
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
