//! Instruments: a voice pool plus a pitch allocator, built by a factory
//! keyed on the source kind. Sampled playback, single-cycle oscillators,
//! two-oscillator FM and additive stacks are all the same struct wired with
//! different sources; live sampling adds a capture buffer on top.

use std::sync::Arc;

use log::info;

use crate::allocator::PitchAllocator;
use crate::capture::LiveCaptureBuffer;
use crate::chain::{VoiceChain, VOLUME_MAX};
use crate::dsp::{Envelope, Waveform, DEFAULT_RAMP_SECS};
use crate::error::EngineError;
use crate::pitch;
use crate::pool::VoicePool;
use crate::source::{FmPair, Oscillator, SampleData, SampleReader, VoiceSource};

/// Construction recipe for one voice's source.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    Sine { frequency: f64 },
    Square { frequency: f64 },
    Triangle { frequency: f64 },
    Fm { frequency: f64, timbre_ratio: f64 },
    Sample { data: Arc<SampleData> },
    Live { max_seconds: f64, natural_pitch: f64 },
    Additive { layers: Vec<SourceSpec> },
}

impl SourceSpec {
    fn is_layerable(&self) -> bool {
        !matches!(self, SourceSpec::Live { .. } | SourceSpec::Additive { .. })
    }
}

#[derive(Debug)]
pub struct Instrument {
    pool: VoicePool,
    allocator: PitchAllocator,
    envelope: Envelope,
    capture: Option<LiveCaptureBuffer>,
    natural_pitch: f64,
}

impl Instrument {
    /// Build an instrument with `voices` parallel chains. The pool size and
    /// the source wiring are fixed for the instrument's whole life.
    pub fn new(
        spec: &SourceSpec,
        voices: usize,
        volume: i32,
        sample_rate: f32,
    ) -> Result<Self, EngineError> {
        let natural_pitch = match spec {
            SourceSpec::Live { natural_pitch, .. } => *natural_pitch,
            SourceSpec::Sample { data } => pitch::frequency_to_pitch(data.natural_freq()),
            SourceSpec::Sine { frequency }
            | SourceSpec::Square { frequency }
            | SourceSpec::Triangle { frequency }
            | SourceSpec::Fm { frequency, .. } => pitch::frequency_to_pitch(*frequency),
            SourceSpec::Additive { .. } => pitch::CONCERT_A_PITCH,
        };

        let chains = (0..voices)
            .map(|_| build_chain(spec, sample_rate, volume))
            .collect::<Result<Vec<_>, _>>()?;
        let pool = VoicePool::new(chains)?;

        let capture = match spec {
            SourceSpec::Live { max_seconds, .. } => {
                Some(LiveCaptureBuffer::new(*max_seconds, sample_rate))
            }
            _ => None,
        };

        info!("instrument created with {voices} voices");
        Ok(Self {
            pool,
            allocator: PitchAllocator::new(voices),
            envelope: Envelope::default(),
            capture,
            natural_pitch,
        })
    }

    pub fn pool(&self) -> &VoicePool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut VoicePool {
        &mut self.pool
    }

    pub fn allocator(&self) -> &PitchAllocator {
        &self.allocator
    }

    /// The stored amplitude envelope description. The engine never applies
    /// it; collaborators shaping the signal read it from here.
    pub fn envelope(&self) -> Envelope {
        self.envelope
    }

    pub fn set_envelope(&mut self, envelope: Envelope) {
        self.envelope = envelope;
    }

    pub fn natural_pitch(&self) -> f64 {
        self.natural_pitch
    }

    /// Begin sounding `pitch` (MIDI, possibly fractional) at `volume`.
    /// Allocates a voice, retunes it, ramps the volume in and starts it.
    /// Returns the voice index so adapters can address it later.
    pub fn note_on(&mut self, pitch_midi: f64, volume: i32) -> Result<usize, EngineError> {
        let freq = pitch::pitch_to_frequency(pitch_midi);
        let voice = self.allocator.allocate(freq).ok_or(EngineError::NoFreeVoice)?;
        self.pool.set_frequency(voice, freq)?;
        self.pool.set_volume(voice, volume, DEFAULT_RAMP_SECS)?;
        let is_sample = matches!(
            self.pool.chain(voice).map(|c| c.source()),
            Some(VoiceSource::Sample(_))
        );
        let started = if is_sample {
            self.pool.play(voice, 0.0, -1.0)
        } else {
            self.pool.start(voice)
        };
        if let Err(e) = started {
            // Do not leave a silent voice allocated.
            self.allocator.deallocate(freq);
            return Err(e);
        }
        Ok(voice)
    }

    /// Like [`Instrument::note_on`] but keyed directly by frequency, for
    /// adapters that already work in Hertz.
    pub fn note_on_hz(&mut self, freq: f64, volume: i32) -> Result<usize, EngineError> {
        self.note_on(pitch::frequency_to_pitch(freq), volume)
    }

    /// Stop sounding `pitch`. Unknown pitches are a quiet no-op.
    pub fn note_off(&mut self, pitch_midi: f64) {
        self.note_off_hz(pitch::pitch_to_frequency(pitch_midi));
    }

    pub fn note_off_hz(&mut self, freq: f64) {
        if let Some(voice) = self.allocator.deallocate(freq) {
            let _ = self.pool.stop(voice);
        }
    }

    /// Stop every voice and forget every allocation.
    pub fn stop_all(&mut self) {
        self.allocator.clear();
        self.pool.stop_all();
    }

    // --- live capture -----------------------------------------------------

    pub fn capture(&self) -> Option<&LiveCaptureBuffer> {
        self.capture.as_ref()
    }

    pub fn is_recording(&self) -> bool {
        self.capture.as_ref().is_some_and(|c| c.is_recording())
    }

    pub fn start_recording(&mut self) -> Result<(), EngineError> {
        self.capture
            .as_mut()
            .ok_or(EngineError::NoCaptureBuffer)?
            .start_recording()
    }

    /// Append input frames to a take in progress.
    pub fn feed_capture(&mut self, frames: &[f32]) {
        if let Some(capture) = &mut self.capture {
            capture.write_frames(frames);
        }
    }

    /// Finish the take and hand the recorded material to every voice.
    pub fn stop_recording(&mut self) -> Result<usize, EngineError> {
        let capture = self.capture.as_mut().ok_or(EngineError::NoCaptureBuffer)?;
        let len = capture.stop_recording()?;
        let data = capture.snapshot(pitch::pitch_to_frequency(self.natural_pitch))?;
        for chain in self.pool.chains_mut() {
            if let Some(reader) = chain.sample_reader_mut() {
                reader.set_data(data.clone());
            }
        }
        Ok(len)
    }

    /// Clear the take, reset every voice and leave the instrument ready to
    /// record again.
    pub fn erase(&mut self) -> Result<(), EngineError> {
        let capture = self.capture.as_mut().ok_or(EngineError::NoCaptureBuffer)?;
        capture.erase()?;
        let empty = Arc::new(SampleData::empty(
            capture.sample_rate(),
            pitch::pitch_to_frequency(self.natural_pitch),
        ));
        self.allocator.clear();
        self.pool.reset_all();
        for chain in self.pool.chains_mut() {
            if let Some(reader) = chain.sample_reader_mut() {
                reader.set_data(empty.clone());
            }
        }
        Ok(())
    }
}

fn build_chain(spec: &SourceSpec, sample_rate: f32, volume: i32) -> Result<VoiceChain, EngineError> {
    let source = build_source(spec, sample_rate)?;
    VoiceChain::new(source, sample_rate, volume)
}

fn build_source(spec: &SourceSpec, sample_rate: f32) -> Result<VoiceSource, EngineError> {
    Ok(match spec {
        SourceSpec::Sine { frequency } => {
            VoiceSource::Oscillator(Oscillator::new(Waveform::Sine, *frequency))
        }
        SourceSpec::Square { frequency } => {
            VoiceSource::Oscillator(Oscillator::new(Waveform::Square, *frequency))
        }
        SourceSpec::Triangle { frequency } => {
            VoiceSource::Oscillator(Oscillator::new(Waveform::Triangle, *frequency))
        }
        SourceSpec::Fm {
            frequency,
            timbre_ratio,
        } => {
            if *timbre_ratio <= 0.0 {
                return Err(EngineError::InvalidTimbreRatio(*timbre_ratio));
            }
            VoiceSource::Fm(FmPair::new(*frequency, *timbre_ratio))
        }
        SourceSpec::Sample { data } => VoiceSource::Sample(SampleReader::new(data.clone())),
        SourceSpec::Live { natural_pitch, .. } => {
            let empty = Arc::new(SampleData::empty(
                sample_rate,
                pitch::pitch_to_frequency(*natural_pitch),
            ));
            VoiceSource::Sample(SampleReader::new(empty))
        }
        SourceSpec::Additive { layers } => {
            if layers.is_empty() || layers.iter().any(|l| !l.is_layerable()) {
                return Err(EngineError::InvalidLayer);
            }
            let subs = layers
                .iter()
                .map(|layer| build_chain(layer, sample_rate, VOLUME_MAX))
                .collect::<Result<Vec<_>, _>>()?;
            VoiceSource::Composite(subs)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SR: f32 = 44_100.0;

    #[test]
    fn note_on_twice_reuses_the_voice() {
        let spec = SourceSpec::Sine { frequency: 440.0 };
        let mut inst = Instrument::new(&spec, 4, VOLUME_MAX, SR).unwrap();
        let a = inst.note_on(60.0, 100).unwrap();
        let b = inst.note_on(60.0, 100).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn pool_exhaustion_surfaces_as_no_free_voice() {
        let spec = SourceSpec::Sine { frequency: 440.0 };
        let mut inst = Instrument::new(&spec, 2, VOLUME_MAX, SR).unwrap();
        inst.note_on(60.0, 100).unwrap();
        inst.note_on(62.0, 100).unwrap();
        assert!(matches!(
            inst.note_on(64.0, 100),
            Err(EngineError::NoFreeVoice)
        ));
        inst.note_off(60.0);
        assert!(inst.note_on(64.0, 100).is_ok());
    }

    #[test]
    fn note_on_retunes_the_allocated_voice() {
        let spec = SourceSpec::Sine { frequency: 440.0 };
        let mut inst = Instrument::new(&spec, 2, VOLUME_MAX, SR).unwrap();
        let voice = inst.note_on(69.0, 100).unwrap();
        assert_abs_diff_eq!(
            inst.pool().frequency(voice).unwrap(),
            440.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn fm_timbre_ratio_holds_across_retuning() {
        let spec = SourceSpec::Fm {
            frequency: 440.0,
            timbre_ratio: 3.0,
        };
        let mut inst = Instrument::new(&spec, 2, VOLUME_MAX, SR).unwrap();
        let voice = inst.note_on(57.0, 100).unwrap();
        let chain = inst.pool().chain(voice).unwrap();
        if let VoiceSource::Fm(pair) = chain.source() {
            assert_abs_diff_eq!(
                pair.modulator_frequency(),
                pair.frequency() / 3.0,
                epsilon = 1e-9
            );
        } else {
            panic!("expected an FM source");
        }
    }

    #[test]
    fn bad_timbre_ratio_fails_construction() {
        let spec = SourceSpec::Fm {
            frequency: 440.0,
            timbre_ratio: 0.0,
        };
        assert!(matches!(
            Instrument::new(&spec, 2, VOLUME_MAX, SR),
            Err(EngineError::InvalidTimbreRatio(_))
        ));
    }

    #[test]
    fn additive_broadcasts_frequency_to_every_layer() {
        let spec = SourceSpec::Additive {
            layers: vec![
                SourceSpec::Sine { frequency: 440.0 },
                SourceSpec::Triangle { frequency: 440.0 },
                SourceSpec::Fm {
                    frequency: 440.0,
                    timbre_ratio: 2.0,
                },
            ],
        };
        let mut inst = Instrument::new(&spec, 2, VOLUME_MAX, SR).unwrap();
        let voice = inst.note_on(72.0, 100).unwrap();
        let want = pitch::pitch_to_frequency(72.0);
        let chain = inst.pool().chain(voice).unwrap();
        match chain.source() {
            VoiceSource::Composite(subs) => {
                assert_eq!(subs.len(), 3);
                for sub in subs {
                    assert_abs_diff_eq!(sub.frequency(), want, epsilon = 1e-6);
                }
            }
            _ => panic!("expected a composite source"),
        }
    }

    #[test]
    fn nested_additive_layers_are_rejected() {
        let spec = SourceSpec::Additive {
            layers: vec![SourceSpec::Additive { layers: vec![] }],
        };
        assert!(matches!(
            Instrument::new(&spec, 1, VOLUME_MAX, SR),
            Err(EngineError::InvalidLayer)
        ));
    }

    #[test]
    fn live_instrument_records_then_plays() {
        let spec = SourceSpec::Live {
            max_seconds: 1.0,
            natural_pitch: 69.0,
        };
        let mut inst = Instrument::new(&spec, 2, VOLUME_MAX, SR).unwrap();

        // Nothing recorded yet: playback is refused.
        assert!(matches!(
            inst.pool_mut().play(0, 0.0, -1.0),
            Err(EngineError::EmptySample)
        ));

        inst.start_recording().unwrap();
        inst.feed_capture(&[0.5; 512]);
        let len = inst.stop_recording().unwrap();
        assert_eq!(len, 512);

        inst.pool_mut().play(0, 0.0, -1.0).unwrap();
        assert_eq!(inst.pool().is_playing(0), Some(true));

        // Erase returns the instrument to the empty state.
        inst.erase().unwrap();
        assert!(matches!(
            inst.pool_mut().play(0, 0.0, -1.0),
            Err(EngineError::EmptySample)
        ));
    }

    #[test]
    fn recording_on_non_live_instrument_is_rejected() {
        let spec = SourceSpec::Sine { frequency: 440.0 };
        let mut inst = Instrument::new(&spec, 1, VOLUME_MAX, SR).unwrap();
        assert!(matches!(
            inst.start_recording(),
            Err(EngineError::NoCaptureBuffer)
        ));
    }
}
