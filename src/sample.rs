//! Sample loading: decode an audio file (or `data:` URL) into mono sample
//! data at the engine rate.
//!
//! Stereo and multichannel material is collapsed to one mixed channel; the
//! chain's pan stage places that mono signal afterwards.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::error::EngineError;
use crate::source::SampleData;

/// Load a sample from a file path or a base64 `data:` URL.
/// `natural_freq` is the frequency the material sounds at unit rate.
pub fn load_sample(
    path: &str,
    engine_rate: f32,
    natural_freq: f64,
) -> Result<Arc<SampleData>, EngineError> {
    let (frames, src_rate) = if path.starts_with("data:") {
        let idx = path
            .find(',')
            .ok_or_else(|| EngineError::Decode("invalid data url".to_string()))?;
        let (_, b64) = path.split_at(idx + 1);
        let bytes = BASE64
            .decode(b64.trim())
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        decode_reader(Cursor::new(bytes))?
    } else {
        if !Path::new(path).is_file() {
            return Err(EngineError::SampleNotFound(path.to_string()));
        }
        let file = File::open(path).map_err(|e| EngineError::Decode(e.to_string()))?;
        decode_reader(file)?
    };

    let frames = if src_rate != engine_rate as u32 {
        resample_linear_mono(&frames, src_rate, engine_rate as u32)
    } else {
        frames
    };

    Ok(Arc::new(SampleData::new(frames, engine_rate, natural_freq)))
}

/// Decode any probe-able container/codec to mono f32 frames.
fn decode_reader<R: MediaSource + 'static>(reader: R) -> Result<(Vec<f32>, u32), EngineError> {
    let mss = MediaSourceStream::new(Box::new(reader), Default::default());
    let probed = get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| EngineError::Decode(e.to_string()))?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| EngineError::Decode("no default track".to_string()))?;
    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| EngineError::Decode(e.to_string()))?;
    let src_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| EngineError::Decode("unknown sample rate".to_string()))?;
    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| EngineError::Decode("unknown channel count".to_string()))?
        .count();
    if channels == 0 || channels > 2 {
        return Err(EngineError::UnsupportedChannels(channels as u16));
    }

    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut frames: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(EngineError::Decode(e.to_string())),
        };
        let decoded = decoder
            .decode(&packet)
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        if sample_buf.is_none() {
            sample_buf = Some(SampleBuffer::<f32>::new(
                decoded.capacity() as u64,
                *decoded.spec(),
            ));
        }
        let sbuf = sample_buf.as_mut().expect("buffer was just created");
        sbuf.copy_interleaved_ref(decoded);
        for frame in sbuf.samples().chunks(channels) {
            // Collapse to one mixed channel.
            let sum: f32 = frame.iter().sum();
            frames.push(sum / channels as f32);
        }
    }
    Ok((frames, src_rate))
}

fn resample_linear_mono(input: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || input.is_empty() {
        return input.to_vec();
    }
    let duration = input.len() as f64 / src_rate as f64;
    let out_frames = (duration * dst_rate as f64).round() as usize;
    let mut out = vec![0.0f32; out_frames];
    for (i, slot) in out.iter_mut().enumerate() {
        let pos = i as f64 / dst_rate as f64 * src_rate as f64;
        let idx = pos.floor() as usize;
        let frac = pos - idx as f64;
        let idx2 = (idx + 1).min(input.len() - 1);
        *slot = ((1.0 - frac) * input[idx] as f64 + frac * input[idx2] as f64) as f32;
    }
    out
}
