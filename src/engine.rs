//! The process-scoped engine context.
//!
//! One `AudioEngine` is constructed at startup and owns the instrument
//! registry, the mixdown scratch buffer and the sample clock. At run time it
//! lives on the audio thread: the callback drains the command ring into
//! [`AudioEngine::handle_command`] and then pulls a block through
//! [`AudioEngine::process_block`]. Command failures are logged and dropped;
//! the render path must keep producing samples no matter what arrives.

use log::{info, warn};

use crate::command::{Command, InstrumentId};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::instrument::Instrument;

/// Peak level above which a rendered block is normalised back down.
const LIMIT_THRESHOLD: f32 = 0.95;

struct PendingStop {
    instrument: InstrumentId,
    due_frame: u64,
}

pub struct AudioEngine {
    sample_rate: f32,
    channels: u16,
    instruments: Vec<Option<Instrument>>,
    pending_stops: Vec<PendingStop>,
    scratch: Vec<f32>,
    master_gain: f32,
    clock_frames: u64,
}

impl AudioEngine {
    /// Only mono and stereo output layouts are supported; anything else is
    /// a configuration error, caught here rather than at render time.
    pub fn new(sample_rate: f32, channels: u16) -> Result<Self, EngineError> {
        if channels != 1 && channels != 2 {
            return Err(EngineError::UnsupportedChannels(channels));
        }
        info!("engine up at {sample_rate} Hz, {channels} channel(s)");
        Ok(Self {
            sample_rate,
            channels,
            instruments: Vec::new(),
            pending_stops: Vec::new(),
            scratch: Vec::new(),
            master_gain: 1.0,
            clock_frames: 0,
        })
    }

    pub fn with_config(
        config: &EngineConfig,
        sample_rate: f32,
        channels: u16,
    ) -> Result<Self, EngineError> {
        let mut engine = Self::new(sample_rate, channels)?;
        engine.master_gain = config.master_gain;
        Ok(engine)
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain.max(0.0);
    }

    /// Frames rendered since startup; the clock deferred stops run on.
    pub fn elapsed_frames(&self) -> u64 {
        self.clock_frames
    }

    // --- registry ---------------------------------------------------------

    /// Add an instrument and return its handle.
    pub fn register(&mut self, instrument: Instrument) -> InstrumentId {
        if let Some(slot) = self.instruments.iter().position(|s| s.is_none()) {
            self.instruments[slot] = Some(instrument);
            slot
        } else {
            self.instruments.push(Some(instrument));
            self.instruments.len() - 1
        }
    }

    /// Remove an instrument. Its pending fades are cancelled.
    pub fn unregister(&mut self, id: InstrumentId) -> Option<Instrument> {
        self.pending_stops.retain(|p| p.instrument != id);
        self.instruments.get_mut(id).and_then(|slot| slot.take())
    }

    pub fn instrument(&self, id: InstrumentId) -> Option<&Instrument> {
        self.instruments.get(id).and_then(|slot| slot.as_ref())
    }

    pub fn instrument_mut(&mut self, id: InstrumentId) -> Option<&mut Instrument> {
        self.instruments.get_mut(id).and_then(|slot| slot.as_mut())
    }

    fn checked(&mut self, id: InstrumentId) -> Result<&mut Instrument, EngineError> {
        self.instruments
            .get_mut(id)
            .and_then(|slot| slot.as_mut())
            .ok_or(EngineError::UnknownInstrument(id))
    }

    // --- control ----------------------------------------------------------

    /// Apply one control command. Failures are reported and swallowed; the
    /// engine keeps playing.
    pub fn handle_command(&mut self, cmd: Command) {
        if let Err(e) = self.apply(cmd) {
            warn!("command dropped: {e}");
        }
    }

    fn apply(&mut self, cmd: Command) -> Result<(), EngineError> {
        match cmd {
            Command::NoteOn {
                instrument,
                pitch,
                volume,
                pan,
            } => {
                let inst = self.checked(instrument)?;
                let voice = inst.note_on(pitch, volume)?;
                if let Some(pan) = pan {
                    inst.pool_mut().set_panning(voice, pan)?;
                }
            }
            Command::NoteOff { instrument, pitch } => {
                self.checked(instrument)?.note_off(pitch);
            }
            Command::SetVolume {
                instrument,
                voice,
                volume,
                ramp_secs,
            } => {
                self.checked(instrument)?
                    .pool_mut()
                    .set_volume(voice, volume, ramp_secs)?;
            }
            Command::SetPanning {
                instrument,
                voice,
                panning,
            } => {
                self.checked(instrument)?
                    .pool_mut()
                    .set_panning(voice, panning)?;
            }
            Command::SetFrequency {
                instrument,
                voice,
                frequency,
            } => {
                self.checked(instrument)?
                    .pool_mut()
                    .set_frequency(voice, frequency)?;
            }
            Command::Play {
                instrument,
                voice,
                start_ms,
                size_ms,
            } => {
                self.checked(instrument)?
                    .pool_mut()
                    .play(voice, start_ms, size_ms)?;
            }
            Command::Loop {
                instrument,
                voice,
                times,
                start_ms,
                size_ms,
            } => {
                self.checked(instrument)?
                    .pool_mut()
                    .play_looped(voice, times, start_ms, size_ms)?;
            }
            Command::Start { instrument, voice } => {
                self.checked(instrument)?.pool_mut().start(voice)?;
            }
            Command::Stop { instrument, voice } => {
                self.checked(instrument)?.pool_mut().stop(voice)?;
            }
            Command::StopAll { instrument } => {
                self.checked(instrument)?.stop_all();
            }
            Command::Pause { instrument, voice } => {
                self.checked(instrument)?.pool_mut().pause(voice)?;
            }
            Command::Resume { instrument, voice } => {
                self.checked(instrument)?.pool_mut().resume(voice)?;
            }
            Command::SetMuted {
                instrument,
                voice,
                muted,
            } => {
                self.checked(instrument)?
                    .pool_mut()
                    .set_muted(voice, muted)?;
            }
            Command::ResetVoice { instrument, voice } => {
                self.checked(instrument)?.pool_mut().reset_voice(voice)?;
            }
            Command::FadeOut { instrument, secs } => {
                self.fade_out(instrument, secs)?;
            }
            Command::StartRecording { instrument } => {
                self.checked(instrument)?.start_recording()?;
            }
            Command::StopRecording { instrument } => {
                self.checked(instrument)?.stop_recording()?;
            }
            Command::Erase { instrument } => {
                self.checked(instrument)?.erase()?;
            }
            Command::FeedCapture { instrument, frames } => {
                self.checked(instrument)?.feed_capture(&frames);
            }
        }
        Ok(())
    }

    /// Ramp every voice of an instrument to silence over `secs` and schedule
    /// the actual stop for when the ramp has finished.
    pub fn fade_out(&mut self, id: InstrumentId, secs: f64) -> Result<(), EngineError> {
        let due_frame = self.clock_frames + (secs.max(0.0) * self.sample_rate as f64) as u64;
        let instrument = self.checked(id)?;
        let voices = instrument.pool().max_voices();
        for voice in 0..voices {
            instrument.pool_mut().set_volume(voice, 0, secs)?;
        }
        self.pending_stops.push(PendingStop {
            instrument: id,
            due_frame,
        });
        Ok(())
    }

    // --- render -----------------------------------------------------------

    /// Render one interleaved block into `out` (laid out for the engine's
    /// channel count). Runs on the audio thread: no locks, no allocation
    /// once the scratch buffer has warmed up.
    pub fn process_block(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let frames = out.len() / self.channels as usize;
        if frames == 0 {
            return;
        }

        self.complete_due_stops();

        // Voices always mix in stereo; mono output folds afterwards.
        if self.scratch.len() != frames * 2 {
            self.scratch.resize(frames * 2, 0.0);
        }
        self.scratch.fill(0.0);
        for instrument in self.instruments.iter_mut().flatten() {
            instrument.pool_mut().render(&mut self.scratch);
        }

        if self.master_gain != 1.0 {
            for s in &mut self.scratch {
                *s *= self.master_gain;
            }
        }

        // Keep stacked voices from clipping.
        let mut peak = 0.0f32;
        for &s in &self.scratch {
            peak = peak.max(s.abs());
        }
        if peak > LIMIT_THRESHOLD {
            let norm = LIMIT_THRESHOLD / peak;
            for s in &mut self.scratch {
                *s *= norm;
            }
        }

        match self.channels {
            1 => {
                for i in 0..frames {
                    out[i] = 0.5 * (self.scratch[i * 2] + self.scratch[i * 2 + 1]);
                }
            }
            _ => out.copy_from_slice(&self.scratch),
        }

        self.clock_frames += frames as u64;
    }

    fn complete_due_stops(&mut self) {
        if self.pending_stops.is_empty() {
            return;
        }
        let now = self.clock_frames;
        let mut due: Vec<InstrumentId> = Vec::new();
        self.pending_stops.retain(|p| {
            if p.due_frame <= now {
                due.push(p.instrument);
                false
            } else {
                true
            }
        });
        for id in due {
            if let Some(instrument) = self.instrument_mut(id) {
                instrument.stop_all();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::VOLUME_MAX;
    use crate::instrument::SourceSpec;

    const SR: f32 = 44_100.0;

    fn engine_with_sine(voices: usize) -> (AudioEngine, InstrumentId) {
        let mut engine = AudioEngine::new(SR, 2).unwrap();
        let inst = Instrument::new(&SourceSpec::Sine { frequency: 440.0 }, voices, VOLUME_MAX, SR)
            .unwrap();
        let id = engine.register(inst);
        (engine, id)
    }

    #[test]
    fn rejects_unsupported_channel_counts() {
        assert!(matches!(
            AudioEngine::new(SR, 3),
            Err(EngineError::UnsupportedChannels(3))
        ));
        assert!(AudioEngine::new(SR, 1).is_ok());
        assert!(AudioEngine::new(SR, 2).is_ok());
    }

    #[test]
    fn note_on_makes_sound_and_note_off_silences() {
        let (mut engine, id) = engine_with_sine(4);
        engine.handle_command(Command::NoteOn {
            instrument: id,
            pitch: 69.0,
            volume: 127,
            pan: None,
        });
        let mut block = vec![0.0f32; 512];
        engine.process_block(&mut block);
        assert!(block.iter().any(|s| s.abs() > 0.01));

        engine.handle_command(Command::NoteOff {
            instrument: id,
            pitch: 69.0,
        });
        engine.process_block(&mut block);
        // Voice stopped: the following block is silent.
        engine.process_block(&mut block);
        assert!(block.iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn commands_for_unknown_instruments_are_dropped_quietly() {
        let (mut engine, _) = engine_with_sine(1);
        engine.handle_command(Command::NoteOn {
            instrument: 42,
            pitch: 60.0,
            volume: 100,
            pan: None,
        });
        let mut block = vec![0.0f32; 64];
        engine.process_block(&mut block);
    }

    #[test]
    fn fade_out_silences_after_the_deadline_without_blocking() {
        let (mut engine, id) = engine_with_sine(2);
        engine.handle_command(Command::NoteOn {
            instrument: id,
            pitch: 69.0,
            volume: 127,
            pan: None,
        });

        let fade_secs = 0.01;
        engine.handle_command(Command::FadeOut {
            instrument: id,
            secs: fade_secs,
        });

        // Render past the fade deadline.
        let mut block = vec![0.0f32; 512];
        let blocks_needed = (fade_secs * SR as f64 / 256.0).ceil() as usize + 2;
        for _ in 0..blocks_needed {
            engine.process_block(&mut block);
        }
        assert_eq!(engine.instrument(id).unwrap().pool().is_playing(0), Some(false));
        engine.process_block(&mut block);
        assert!(block.iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn mono_output_folds_the_stereo_mix() {
        let mut engine = AudioEngine::new(SR, 1).unwrap();
        let inst = Instrument::new(&SourceSpec::Sine { frequency: 440.0 }, 1, VOLUME_MAX, SR)
            .unwrap();
        let id = engine.register(inst);
        engine.handle_command(Command::NoteOn {
            instrument: id,
            pitch: 69.0,
            volume: 127,
            pan: None,
        });
        let mut block = vec![0.0f32; 256];
        engine.process_block(&mut block);
        assert!(block.iter().any(|s| s.abs() > 0.01));
    }

    #[test]
    fn limiter_keeps_blocks_inside_the_threshold() {
        let (mut engine, id) = engine_with_sine(8);
        for pitch in [60.0, 64.0, 67.0, 72.0, 76.0, 79.0] {
            engine.handle_command(Command::NoteOn {
                instrument: id,
                pitch,
                volume: 127,
                pan: None,
            });
        }
        let mut block = vec![0.0f32; 1024];
        for _ in 0..10 {
            engine.process_block(&mut block);
            assert!(block.iter().all(|s| s.abs() <= LIMIT_THRESHOLD + 1e-4));
        }
    }

    #[test]
    fn live_recording_round_trip_through_commands() {
        let mut engine = AudioEngine::new(SR, 2).unwrap();
        let spec = SourceSpec::Live {
            max_seconds: 1.0,
            natural_pitch: 69.0,
        };
        let inst = Instrument::new(&spec, 2, VOLUME_MAX, SR).unwrap();
        let id = engine.register(inst);

        engine.handle_command(Command::StartRecording { instrument: id });
        engine.handle_command(Command::FeedCapture {
            instrument: id,
            frames: vec![0.5; 4410],
        });
        engine.handle_command(Command::StopRecording { instrument: id });
        assert_eq!(
            engine.instrument(id).unwrap().capture().unwrap().recorded_len(),
            Some(4410)
        );

        engine.handle_command(Command::Loop {
            instrument: id,
            voice: 0,
            times: -1,
            start_ms: 0.0,
            size_ms: -1.0,
        });
        let mut block = vec![0.0f32; 512];
        engine.process_block(&mut block);
        assert!(block.iter().any(|s| s.abs() > 0.01));

        // A second take must be refused until the first is erased.
        engine.handle_command(Command::StartRecording { instrument: id });
        assert!(!engine.instrument(id).unwrap().is_recording());
        engine.handle_command(Command::Erase { instrument: id });
        engine.handle_command(Command::StartRecording { instrument: id });
        assert!(engine.instrument(id).unwrap().is_recording());
    }

    #[test]
    fn unregister_frees_the_slot_for_reuse() {
        let (mut engine, id) = engine_with_sine(1);
        assert!(engine.unregister(id).is_some());
        assert!(engine.instrument(id).is_none());
        let inst = Instrument::new(&SourceSpec::Sine { frequency: 220.0 }, 1, VOLUME_MAX, SR)
            .unwrap();
        assert_eq!(engine.register(inst), id);
    }
}
