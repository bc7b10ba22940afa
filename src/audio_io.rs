//! cpal-backed audio I/O.
//!
//! The output callback owns the engine outright: it drains the command ring,
//! then renders the block. Nothing on that path locks or allocates. Shutdown
//! is a message on a plain channel, polled from the keep-alive loop.

use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use log::{error, info, warn};
use ringbuf::traits::{Consumer, Producer};
use ringbuf::{HeapCons, HeapProd};

use crate::command::{Command, InstrumentId};
use crate::engine::AudioEngine;
use crate::error::EngineError;

/// Sample rate and usable output channel count of the default device,
/// queried once at startup.
pub fn output_spec() -> Result<(u32, u16), EngineError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(EngineError::NoOutputDevice)?;
    let config = device
        .default_output_config()
        .map_err(|e| EngineError::Stream(e.to_string()))?;
    let channels = config.channels().clamp(1, 2);
    Ok((config.sample_rate().0, channels))
}

/// Run the output stream until `shutdown` fires. The engine moves into the
/// audio callback; all further control goes through `commands`.
pub fn run_output_stream(
    mut engine: AudioEngine,
    mut commands: HeapCons<Command>,
    shutdown: Receiver<()>,
) -> Result<(), EngineError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(EngineError::NoOutputDevice)?;
    let supported = device
        .default_output_config()
        .map_err(|e| EngineError::Stream(e.to_string()))?;
    let sample_format = supported.sample_format();
    let mut config: StreamConfig = supported.into();
    config.channels = engine.channels();

    let callback = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        while let Some(cmd) = commands.try_pop() {
            engine.handle_command(cmd);
        }
        engine.process_block(data);
    };
    let err_fn = |err| error!("output stream error: {err}");

    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_output_stream(&config, callback, err_fn, None)
            .map_err(|e| EngineError::Stream(e.to_string()))?,
        other => {
            return Err(EngineError::Stream(format!(
                "unsupported sample format {other:?}"
            )))
        }
    };
    stream.play().map_err(|e| EngineError::Stream(e.to_string()))?;
    info!("output stream running");

    wait_for_shutdown(&shutdown);
    Ok(())
}

/// Run an input stream that feeds captured frames to a live instrument as
/// [`Command::FeedCapture`] messages until `shutdown` fires.
pub fn run_capture_stream(
    instrument: InstrumentId,
    mut feed: HeapProd<Command>,
    shutdown: Receiver<()>,
) -> Result<(), EngineError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(EngineError::NoInputDevice)?;
    let supported = device
        .default_input_config()
        .map_err(|e| EngineError::Stream(e.to_string()))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let channels = (config.channels as usize).max(1);

    let callback = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        // Collapse interleaved input to one mixed channel.
        let frames: Vec<f32> = data
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        let cmd = Command::FeedCapture { instrument, frames };
        if feed.try_push(cmd).is_err() {
            warn!("capture feed full, dropping a chunk");
        }
    };
    let err_fn = |err| error!("input stream error: {err}");

    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_input_stream(&config, callback, err_fn, None)
            .map_err(|e| EngineError::Stream(e.to_string()))?,
        other => {
            return Err(EngineError::Stream(format!(
                "unsupported sample format {other:?}"
            )))
        }
    };
    stream.play().map_err(|e| EngineError::Stream(e.to_string()))?;
    info!("capture stream running");

    wait_for_shutdown(&shutdown);
    Ok(())
}

fn wait_for_shutdown(shutdown: &Receiver<()>) {
    loop {
        match shutdown.recv_timeout(Duration::from_millis(100)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}
