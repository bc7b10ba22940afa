//! The closed set of sound sources a voice chain can be built around.
//!
//! Every source renders mono; stereo placement happens later in the chain's
//! pan stage. Dispatch is a single enum rather than trait objects so the
//! render loop stays branch-predictable and allocation free.

use std::f32::consts::TAU;
use std::sync::Arc;

use crate::chain::VoiceChain;
use crate::dsp::Waveform;

/// Immutable audio data shared by every voice of a sampled instrument.
///
/// Frames are mono; stereo material is collapsed to a single mixed channel
/// when loaded or recorded.
#[derive(Debug, Clone)]
pub struct SampleData {
    frames: Vec<f32>,
    sample_rate: f32,
    natural_freq: f64,
}

impl SampleData {
    /// `natural_freq` is the frequency the material is considered to sound
    /// at when played back at unit rate.
    pub fn new(frames: Vec<f32>, sample_rate: f32, natural_freq: f64) -> Self {
        Self {
            frames,
            sample_rate,
            natural_freq,
        }
    }

    /// An empty buffer, used by live instruments before any take exists.
    pub fn empty(sample_rate: f32, natural_freq: f64) -> Self {
        Self::new(Vec::new(), sample_rate, natural_freq)
    }

    pub fn frames(&self) -> &[f32] {
        &self.frames
    }

    pub fn len_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn natural_freq(&self) -> f64 {
        self.natural_freq
    }

    pub fn duration_ms(&self) -> f64 {
        self.frames.len() as f64 / self.sample_rate as f64 * 1000.0
    }

    pub fn ms_to_frames(&self, ms: f64) -> usize {
        (self.sample_rate as f64 * ms / 1000.0) as usize
    }
}

/// Phase-accumulator oscillator over a single-cycle waveform.
#[derive(Debug, Clone)]
pub struct Oscillator {
    waveform: Waveform,
    frequency: f64,
    phase: f32,
}

impl Oscillator {
    pub fn new(waveform: Waveform, frequency: f64) -> Self {
        Self {
            waveform,
            frequency,
            phase: 0.0,
        }
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn set_frequency(&mut self, freq: f64) {
        self.frequency = freq;
    }

    fn next_sample(&mut self, sample_rate: f32) -> f32 {
        let s = self.waveform.sample(self.phase);
        self.phase = (self.phase + (self.frequency / sample_rate as f64) as f32).rem_euclid(1.0);
        s
    }
}

/// Carrier/modulator sine pair.
///
/// The modulator runs at `base_frequency / timbre_ratio` and its output,
/// scaled by the base frequency, drives the carrier's instantaneous
/// frequency. Because the modulator tracks the carrier proportionally,
/// retuning the pair preserves its timbre.
#[derive(Debug, Clone)]
pub struct FmPair {
    base_frequency: f64,
    timbre_ratio: f64,
    carrier_phase: f32,
    modulator_phase: f32,
}

impl FmPair {
    pub fn new(frequency: f64, timbre_ratio: f64) -> Self {
        Self {
            base_frequency: frequency,
            timbre_ratio,
            carrier_phase: 0.0,
            modulator_phase: 0.0,
        }
    }

    pub fn frequency(&self) -> f64 {
        self.base_frequency
    }

    pub fn set_frequency(&mut self, freq: f64) {
        self.base_frequency = freq;
    }

    pub fn timbre_ratio(&self) -> f64 {
        self.timbre_ratio
    }

    pub fn modulator_frequency(&self) -> f64 {
        self.base_frequency / self.timbre_ratio
    }

    fn next_sample(&mut self, sample_rate: f32) -> f32 {
        let modulator = (TAU * self.modulator_phase).sin();
        self.modulator_phase = (self.modulator_phase
            + (self.modulator_frequency() / sample_rate as f64) as f32)
            .rem_euclid(1.0);

        let carrier_freq = modulator as f64 * self.base_frequency;
        let s = (TAU * self.carrier_phase).sin();
        self.carrier_phase =
            (self.carrier_phase + (carrier_freq / sample_rate as f64) as f32).rem_euclid(1.0);
        s
    }
}

/// Variable-rate interpolating reader over shared sample data.
///
/// Pitch shifting is done by resampling: the playback ratio is recomputed
/// from the buffer's natural frequency on every retune, so repeated retunes
/// cannot accumulate rate error.
#[derive(Debug, Clone)]
pub struct SampleReader {
    data: Arc<SampleData>,
    position: f64,
    start_frame: usize,
    end_frame: usize,
    /// Passes of the window left to play; `None` loops forever.
    passes_remaining: Option<u32>,
    frequency: f64,
    active: bool,
}

impl SampleReader {
    pub fn new(data: Arc<SampleData>) -> Self {
        let frequency = data.natural_freq();
        let end_frame = data.len_frames();
        Self {
            data,
            position: 0.0,
            start_frame: 0,
            end_frame,
            passes_remaining: Some(0),
            frequency,
            active: false,
        }
    }

    pub fn data(&self) -> &Arc<SampleData> {
        &self.data
    }

    /// Swap in new sample data, stopping playback.
    pub fn set_data(&mut self, data: Arc<SampleData>) {
        self.active = false;
        self.position = 0.0;
        self.start_frame = 0;
        self.end_frame = data.len_frames();
        self.frequency = data.natural_freq();
        self.data = data;
    }

    /// Queue a playback window. `repeats` counts passes after the first
    /// (`-1` loops forever), `size_frames == -1` means "to the end".
    pub fn queue(&mut self, repeats: i32, start_frame: usize, size_frames: i64) {
        let total = self.data.len_frames();
        let start = start_frame.min(total);
        let end = if size_frames < 0 {
            total
        } else {
            (start + size_frames as usize).min(total)
        };
        self.start_frame = start;
        self.end_frame = end;
        self.position = start as f64;
        self.passes_remaining = if repeats < 0 {
            None
        } else {
            Some(repeats as u32 + 1)
        };
        self.active = end > start;
    }

    /// Drop any queued playback and rewind to the window start.
    pub fn clear(&mut self) {
        self.active = false;
        self.position = self.start_frame as f64;
    }

    pub fn has_more(&self) -> bool {
        self.active
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn set_frequency(&mut self, freq: f64) {
        self.frequency = freq;
    }

    /// Effective playback ratio in source frames per output frame.
    pub fn rate(&self, engine_rate: f32) -> f64 {
        let natural = self.data.natural_freq();
        let tune = if natural > 0.0 {
            self.frequency / natural
        } else {
            1.0
        };
        self.data.sample_rate() as f64 / engine_rate as f64 * tune
    }

    fn next_sample(&mut self, engine_rate: f32) -> f32 {
        if !self.active {
            return 0.0;
        }
        let frames = self.data.frames();
        let idx = self.position.floor() as usize;
        let frac = (self.position - idx as f64) as f32;
        let a = frames.get(idx).copied().unwrap_or(0.0);
        let b = frames.get(idx + 1).copied().unwrap_or(a);
        let s = a + (b - a) * frac;

        self.position += self.rate(engine_rate);
        if self.position >= self.end_frame as f64 {
            let overshoot = self.position - self.end_frame as f64;
            match &mut self.passes_remaining {
                None => {
                    self.position = self.start_frame as f64 + overshoot;
                }
                Some(n) => {
                    *n = n.saturating_sub(1);
                    if *n == 0 {
                        self.active = false;
                        self.position = self.start_frame as f64;
                    } else {
                        self.position = self.start_frame as f64 + overshoot;
                    }
                }
            }
        }
        s
    }
}

/// Tagged source kind dispatched by the voice chain.
#[derive(Debug, Clone)]
pub enum VoiceSource {
    Oscillator(Oscillator),
    Sample(SampleReader),
    Fm(FmPair),
    /// Immutable fan-in of sub-chains; frequency sets broadcast, stop
    /// delegates. Built once at construction, never rewired.
    Composite(Vec<VoiceChain>),
}

impl VoiceSource {
    pub fn set_frequency(&mut self, freq: f64) {
        match self {
            VoiceSource::Oscillator(osc) => osc.set_frequency(freq),
            VoiceSource::Sample(reader) => reader.set_frequency(freq),
            VoiceSource::Fm(pair) => pair.set_frequency(freq),
            VoiceSource::Composite(subs) => {
                for sub in subs {
                    sub.set_frequency(freq);
                }
            }
        }
    }

    pub fn frequency(&self) -> f64 {
        match self {
            VoiceSource::Oscillator(osc) => osc.frequency(),
            VoiceSource::Sample(reader) => reader.frequency(),
            VoiceSource::Fm(pair) => pair.frequency(),
            VoiceSource::Composite(subs) => subs
                .first()
                .map(|sub| sub.frequency())
                .unwrap_or(crate::pitch::CONCERT_A_HZ),
        }
    }

    pub(crate) fn next_sample(&mut self, sample_rate: f32) -> f32 {
        match self {
            VoiceSource::Oscillator(osc) => osc.next_sample(sample_rate),
            VoiceSource::Sample(reader) => reader.next_sample(sample_rate),
            VoiceSource::Fm(pair) => pair.next_sample(sample_rate),
            VoiceSource::Composite(subs) => {
                subs.iter_mut().map(|sub| sub.next_mono_sample()).sum()
            }
        }
    }

    pub(crate) fn stop(&mut self) {
        match self {
            VoiceSource::Sample(reader) => reader.clear(),
            VoiceSource::Composite(subs) => {
                for sub in subs {
                    sub.stop();
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp_data(len: usize) -> Arc<SampleData> {
        let frames: Vec<f32> = (0..len).map(|i| i as f32).collect();
        Arc::new(SampleData::new(frames, 1000.0, 440.0))
    }

    #[test]
    fn oscillator_sine_starts_at_zero_and_rises() {
        let mut osc = Oscillator::new(Waveform::Sine, 100.0);
        let first = osc.next_sample(1000.0);
        assert_abs_diff_eq!(first, 0.0, epsilon = 1e-6);
        let second = osc.next_sample(1000.0);
        assert!(second > 0.0);
    }

    #[test]
    fn reader_plays_exact_pass_count() {
        // times = 2 must yield three full passes.
        let data = ramp_data(10);
        let mut reader = SampleReader::new(data);
        reader.queue(2, 0, -1);

        let mut produced = 0usize;
        while reader.has_more() && produced < 1000 {
            reader.next_sample(1000.0);
            produced += 1;
        }
        assert_eq!(produced, 30);
    }

    #[test]
    fn reader_zero_repeats_is_single_pass() {
        let data = ramp_data(8);
        let mut reader = SampleReader::new(data);
        reader.queue(0, 0, -1);
        let mut produced = 0usize;
        while reader.has_more() && produced < 100 {
            reader.next_sample(1000.0);
            produced += 1;
        }
        assert_eq!(produced, 8);
    }

    #[test]
    fn reader_infinite_loop_keeps_going() {
        let data = ramp_data(4);
        let mut reader = SampleReader::new(data);
        reader.queue(-1, 0, -1);
        for _ in 0..64 {
            reader.next_sample(1000.0);
        }
        assert!(reader.has_more());
    }

    #[test]
    fn reader_window_is_clamped_to_buffer() {
        let data = ramp_data(10);
        let mut reader = SampleReader::new(data);
        reader.queue(0, 4, 100);
        let mut produced = 0usize;
        while reader.has_more() && produced < 100 {
            reader.next_sample(1000.0);
            produced += 1;
        }
        assert_eq!(produced, 6);
    }

    #[test]
    fn reader_retune_is_absolute_not_compounded() {
        let data = ramp_data(100);
        let mut reader = SampleReader::new(data);
        reader.queue(-1, 0, -1);

        // Setting the same frequency many times must not drift the rate.
        for _ in 0..50 {
            reader.set_frequency(880.0);
        }
        assert_abs_diff_eq!(reader.rate(1000.0), 2.0, epsilon = 1e-9);

        reader.set_frequency(440.0);
        assert_abs_diff_eq!(reader.rate(1000.0), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn empty_reader_produces_silence() {
        let mut reader = SampleReader::new(Arc::new(SampleData::empty(1000.0, 440.0)));
        reader.queue(0, 0, -1);
        assert!(!reader.has_more());
        assert_abs_diff_eq!(reader.next_sample(1000.0), 0.0);
    }

    #[test]
    fn fm_modulator_tracks_carrier() {
        let mut pair = FmPair::new(440.0, 3.0);
        assert_abs_diff_eq!(pair.modulator_frequency(), 440.0 / 3.0, epsilon = 1e-9);
        pair.set_frequency(660.0);
        assert_abs_diff_eq!(pair.modulator_frequency(), 220.0, epsilon = 1e-9);
    }
}
