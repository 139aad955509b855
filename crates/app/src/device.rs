//! Sound card output through cpal.
//!
//! A cpal stream is not `Send` on every host, so it is created, played and
//! dropped on a dedicated thread. [`DeviceBackend`] only owns the channel
//! that tells that thread to stop, which keeps it usable as an
//! [`OutputBackend`] inside the engine.

use std::{
    sync::mpsc,
    thread::{self, JoinHandle},
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use oscshow_core::{audio::RenderCallback, AudioConfig, OutputBackend, ScopeError};

#[derive(Debug, Default)]
pub struct DeviceBackend {
    stop: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputBackend for DeviceBackend {
    fn open(
        &mut self,
        config: &AudioConfig,
        callback: RenderCallback,
    ) -> oscshow_core::Result<()> {
        self.close();

        let (ready_tx, ready_rx) = mpsc::channel::<oscshow_core::Result<()>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let config = config.clone();

        let worker = thread::Builder::new()
            .name("audio-device".into())
            .spawn(move || {
                let stream = match build_stream(&config, callback) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Sender dropped or stop requested: either way the stream goes.
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.stop = Some(stop_tx);
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = worker.join();
                Err(err)
            }
            Err(_) => {
                let _ = worker.join();
                Err(ScopeError::msg("audio device thread exited during setup"))
            }
        }
    }

    fn close(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if worker.join().is_err() {
            tracing::warn!("audio device thread panicked");
        }
    }
}

impl Drop for DeviceBackend {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream(
    config: &AudioConfig,
    callback: RenderCallback,
) -> oscshow_core::Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| ScopeError::msg("no audio output device found"))?;
    let supported = device
        .default_output_config()
        .map_err(|err| ScopeError::msg(format!("failed to query output config: {err}")))?;
    tracing::info!(
        host = ?host.id(),
        device = device.name().unwrap_or_default(),
        format = ?supported.sample_format(),
        "opening audio device"
    );

    let sample_format = supported.sample_format();
    let mut stream_config: cpal::StreamConfig = supported.into();
    stream_config.channels = oscshow_core::audio::CHANNELS as u16;
    stream_config.sample_rate = cpal::SampleRate(config.sample_rate);
    stream_config.buffer_size = cpal::BufferSize::Fixed(config.block_size as u32);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_typed::<f32>(&device, &stream_config, config, callback),
        cpal::SampleFormat::I16 => build_typed::<i16>(&device, &stream_config, config, callback),
        cpal::SampleFormat::U16 => build_typed::<u16>(&device, &stream_config, config, callback),
        other => Err(ScopeError::msg(format!("unsupported sample format {other:?}"))),
    }?;

    stream
        .play()
        .map_err(|err| ScopeError::msg(format!("failed to start audio stream: {err}")))?;
    Ok(stream)
}

fn build_typed<T>(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    config: &AudioConfig,
    mut callback: RenderCallback,
) -> oscshow_core::Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    // Rendered in f32, converted into the device format. Grows only if the
    // host hands out a larger buffer than requested.
    let mut scratch = vec![0.0_f32; config.block_size.max(1) * oscshow_core::audio::CHANNELS];

    device
        .build_output_stream(
            stream_config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if scratch.len() < data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                let block = &mut scratch[..data.len()];
                callback(block);
                for (out, sample) in data.iter_mut().zip(block.iter()) {
                    *out = T::from_sample(*sample);
                }
            },
            |err| tracing::error!(%err, "audio stream error"),
            None,
        )
        .map_err(|err| ScopeError::msg(format!("failed to build audio stream: {err}")))
}
