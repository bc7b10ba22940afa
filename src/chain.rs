//! One independently controllable signal path:
//! source → ramped amplitude → pan splitter → stereo mix-in.

use log::debug;

use crate::dsp::{pan2, LinearRamp};
use crate::error::EngineError;
use crate::pitch;
use crate::source::{SampleReader, VoiceSource};

pub const VOLUME_MAX: i32 = 127;
pub const PAN_CENTER: i32 = 63;

/// A single voice. Owned by exactly one pool slot; never destroyed, only
/// stopped and reset back to its defaults.
#[derive(Debug, Clone)]
pub struct VoiceChain {
    source: VoiceSource,
    amplitude: LinearRamp,
    volume_midi: i32,
    pan_midi: i32,
    pan: f32,
    frequency: f64,
    pitch: f64,
    playing: bool,
    paused: bool,
    muted: bool,
    sample_rate: f32,
}

impl VoiceChain {
    pub fn new(source: VoiceSource, sample_rate: f32, volume: i32) -> Result<Self, EngineError> {
        if !(0..=VOLUME_MAX).contains(&volume) {
            return Err(EngineError::VolumeOutOfRange(volume));
        }
        let frequency = source.frequency();
        Ok(Self {
            source,
            amplitude: LinearRamp::new(volume as f32 / VOLUME_MAX as f32),
            volume_midi: volume,
            pan_midi: PAN_CENTER,
            pan: midi_pan_to_float(PAN_CENTER),
            frequency,
            pitch: pitch::frequency_to_pitch(frequency),
            playing: false,
            paused: false,
            muted: false,
            sample_rate,
        })
    }

    pub fn source(&self) -> &VoiceSource {
        &self.source
    }

    pub(crate) fn sample_reader_mut(&mut self) -> Option<&mut SampleReader> {
        match &mut self.source {
            VoiceSource::Sample(reader) => Some(reader),
            _ => None,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Set the voice volume (MIDI 0..=127), ramped over `ramp_secs`.
    /// The amplitude is never switched instantaneously.
    pub fn set_volume(&mut self, volume: i32, ramp_secs: f64) -> Result<(), EngineError> {
        if !(0..=VOLUME_MAX).contains(&volume) {
            return Err(EngineError::VolumeOutOfRange(volume));
        }
        if ramp_secs < 0.0 {
            return Err(EngineError::NegativeRamp(ramp_secs));
        }
        self.volume_midi = volume;
        let amp = volume as f32 / VOLUME_MAX as f32;
        self.amplitude.set_target(amp, ramp_secs, self.sample_rate);
        Ok(())
    }

    pub fn volume(&self) -> i32 {
        self.volume_midi
    }

    /// Current (possibly mid-ramp) amplitude in [0, 1].
    pub fn amplitude(&self) -> f32 {
        self.amplitude.value()
    }

    /// Set panning (MIDI 0..=127, 63 is center), mapped linearly to [-1, 1].
    pub fn set_panning(&mut self, panning: i32) -> Result<(), EngineError> {
        if !(0..=127).contains(&panning) {
            return Err(EngineError::PanningOutOfRange(panning));
        }
        self.pan_midi = panning;
        self.pan = midi_pan_to_float(panning);
        Ok(())
    }

    pub fn panning(&self) -> i32 {
        self.pan_midi
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    /// Retune the voice. Oscillators are set directly; sample readers
    /// recompute their playback ratio from the buffer's natural pitch;
    /// composites broadcast to every layer.
    pub fn set_frequency(&mut self, freq: f64) {
        self.frequency = freq;
        self.pitch = pitch::frequency_to_pitch(freq);
        self.source.set_frequency(freq);
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn set_pitch(&mut self, pitch: f64) {
        self.set_frequency(pitch::pitch_to_frequency(pitch));
    }

    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    /// Play a sample window once, from `start_ms` for `size_ms` milliseconds
    /// (`-1.0` means to the end). A voice that is already playing restarts
    /// instead of queueing, favouring responsiveness.
    pub fn play(&mut self, start_ms: f64, size_ms: f64) -> Result<(), EngineError> {
        self.play_looped(0, start_ms, size_ms)
    }

    /// Queue a looping sample window: `times` repeats after the first pass,
    /// `-1` repeats forever. For oscillator-family sources looping is
    /// meaningless and this simply starts the voice.
    pub fn play_looped(
        &mut self,
        times: i32,
        start_ms: f64,
        size_ms: f64,
    ) -> Result<(), EngineError> {
        match &mut self.source {
            VoiceSource::Sample(reader) => {
                if reader.data().is_empty() {
                    return Err(EngineError::EmptySample);
                }
                if start_ms < 0.0 || start_ms > reader.data().duration_ms() {
                    return Err(EngineError::LoopWindowOutOfRange { start_ms, size_ms });
                }
                if self.playing && reader.has_more() {
                    reader.clear();
                }
                let start = reader.data().ms_to_frames(start_ms);
                let size = if size_ms < 0.0 {
                    -1
                } else {
                    reader.data().ms_to_frames(size_ms) as i64
                };
                reader.queue(times, start, size);
                self.playing = true;
                self.paused = false;
                Ok(())
            }
            _ => {
                self.start();
                Ok(())
            }
        }
    }

    /// Start producing sound (oscillator-family voices).
    pub fn start(&mut self) {
        self.playing = true;
        self.paused = false;
        if let VoiceSource::Composite(subs) = &mut self.source {
            for sub in subs {
                sub.start();
            }
        }
    }

    /// Stop immediately. Idempotent: stopping a stopped voice is a no-op.
    pub fn stop(&mut self) {
        if !self.playing && !self.paused {
            return;
        }
        self.playing = false;
        self.paused = false;
        self.source.stop();
    }

    /// Freeze the voice in place; the read position is retained.
    pub fn pause(&mut self) {
        if self.paused {
            debug!("voice already paused");
            return;
        }
        self.paused = true;
    }

    /// Continue from the paused position.
    pub fn resume(&mut self) {
        if !self.paused {
            debug!("voice is not paused");
            return;
        }
        self.paused = false;
    }

    pub fn is_playing(&self) -> bool {
        match &self.source {
            VoiceSource::Sample(reader) => reader.has_more(),
            _ => self.playing,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// One mono sample: source through the amplitude ramp, before panning.
    /// Composite parents sum this across their layers.
    pub(crate) fn next_mono_sample(&mut self) -> f32 {
        if !self.playing || self.paused {
            return 0.0;
        }
        let sample_rate = self.sample_rate;
        let s = self.source.next_sample(sample_rate);
        let amp = self.amplitude.next();
        if self.muted {
            0.0
        } else {
            s * amp
        }
    }

    /// Mix this voice additively into an interleaved stereo buffer.
    pub fn render(&mut self, out: &mut [f32]) {
        if !self.playing || self.paused {
            return;
        }
        for frame in out.chunks_exact_mut(2) {
            let s = self.next_mono_sample();
            let (l, r) = pan2(s, self.pan);
            frame[0] += l;
            frame[1] += r;
        }
    }
}

fn midi_pan_to_float(panning: i32) -> f32 {
    panning as f32 / 127.0 * 2.0 - 1.0
}
