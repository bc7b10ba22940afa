//! Performance scores: a JSON description of an instrument and the timed
//! note events to play through it. This is what the binaries stream to the
//! engine or render offline; interactive adapters produce the same commands
//! from gestures instead of a file.

use serde::Deserialize;

use crate::command::{Command, InstrumentId};
use crate::error::EngineError;
use crate::instrument::SourceSpec;
use crate::sample;

fn default_sample_rate() -> u32 {
    44_100
}

fn default_volume() -> i32 {
    100
}

fn default_tail_secs() -> f64 {
    1.0
}

fn default_frequency() -> f64 {
    440.0
}

fn default_sample_pitch() -> f64 {
    69.0
}

#[derive(Deserialize, Debug, Clone)]
pub struct Score {
    #[serde(alias = "globalSettings", alias = "global")]
    pub settings: ScoreSettings,
    pub instrument: InstrumentSpec,
    #[serde(default)]
    pub events: Vec<NoteEvent>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ScoreSettings {
    #[serde(default = "default_sample_rate", alias = "sampleRate")]
    pub sample_rate: u32,
    /// Pool size per instrument; falls back to the engine config when absent.
    #[serde(default)]
    pub voices: Option<usize>,
    #[serde(default, alias = "outputFilename")]
    pub output_filename: Option<String>,
    /// Silence appended after the last event when rendering offline.
    #[serde(default = "default_tail_secs", alias = "tailSeconds")]
    pub tail_secs: f64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstrumentSpec {
    Sine {
        #[serde(default = "default_frequency")]
        frequency: f64,
    },
    Square {
        #[serde(default = "default_frequency")]
        frequency: f64,
    },
    Triangle {
        #[serde(default = "default_frequency")]
        frequency: f64,
    },
    Fm {
        #[serde(default = "default_frequency")]
        frequency: f64,
        #[serde(alias = "timbreRatio")]
        timbre_ratio: f64,
    },
    Sample {
        path: String,
        #[serde(default = "default_sample_pitch", alias = "samplePitch")]
        pitch: f64,
    },
    Additive {
        layers: Vec<InstrumentSpec>,
    },
}

impl InstrumentSpec {
    /// Resolve into a construction recipe, loading sample files at the
    /// engine rate.
    pub fn to_source_spec(&self, engine_rate: f32) -> Result<SourceSpec, EngineError> {
        Ok(match self {
            InstrumentSpec::Sine { frequency } => SourceSpec::Sine {
                frequency: *frequency,
            },
            InstrumentSpec::Square { frequency } => SourceSpec::Square {
                frequency: *frequency,
            },
            InstrumentSpec::Triangle { frequency } => SourceSpec::Triangle {
                frequency: *frequency,
            },
            InstrumentSpec::Fm {
                frequency,
                timbre_ratio,
            } => SourceSpec::Fm {
                frequency: *frequency,
                timbre_ratio: *timbre_ratio,
            },
            InstrumentSpec::Sample { path, pitch } => {
                let natural_freq = crate::pitch::pitch_to_frequency(*pitch);
                SourceSpec::Sample {
                    data: sample::load_sample(path, engine_rate, natural_freq)?,
                }
            }
            InstrumentSpec::Additive { layers } => SourceSpec::Additive {
                layers: layers
                    .iter()
                    .map(|l| l.to_source_spec(engine_rate))
                    .collect::<Result<Vec<_>, _>>()?,
            },
        })
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoteAction {
    On,
    Off,
}

#[derive(Deserialize, Debug, Clone)]
pub struct NoteEvent {
    /// Seconds from the start of the performance.
    #[serde(alias = "time", alias = "at_secs")]
    pub at: f64,
    #[serde(alias = "kind")]
    pub action: NoteAction,
    pub pitch: f64,
    #[serde(default = "default_volume", alias = "velocity")]
    pub volume: i32,
    #[serde(default)]
    pub pan: Option<i32>,
}

impl Score {
    /// Total performance length including the render tail.
    pub fn duration_secs(&self) -> f64 {
        let last = self
            .events
            .iter()
            .map(|e| e.at)
            .fold(0.0f64, |acc, t| acc.max(t));
        last + self.settings.tail_secs.max(0.0)
    }

    /// Events as `(due_frame, command)` pairs in time order, addressed to
    /// `instrument`.
    pub fn timeline(&self, instrument: InstrumentId, sample_rate: f32) -> Vec<(u64, Command)> {
        let mut events: Vec<&NoteEvent> = self.events.iter().collect();
        events.sort_by(|a, b| a.at.total_cmp(&b.at));

        let mut out = Vec::with_capacity(events.len() * 2);
        for event in events {
            let due = (event.at.max(0.0) * sample_rate as f64) as u64;
            match event.action {
                NoteAction::On => out.push((
                    due,
                    Command::NoteOn {
                        instrument,
                        pitch: event.pitch,
                        volume: event.volume,
                        pan: event.pan,
                    },
                )),
                NoteAction::Off => out.push((
                    due,
                    Command::NoteOff {
                        instrument,
                        pitch: event.pitch,
                    },
                )),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCORE_JSON: &str = r#"{
        "settings": { "sample_rate": 48000, "voices": 8, "tail_secs": 0.5 },
        "instrument": { "type": "fm", "frequency": 440.0, "timbre_ratio": 3.0 },
        "events": [
            { "at": 0.5, "action": "off", "pitch": 60 },
            { "at": 0.0, "action": "on", "pitch": 60, "volume": 90 }
        ]
    }"#;

    #[test]
    fn parses_and_sorts_the_timeline() {
        let score: Score = serde_json::from_str(SCORE_JSON).unwrap();
        assert_eq!(score.settings.sample_rate, 48_000);
        assert_eq!(score.settings.voices, Some(8));

        let timeline = score.timeline(0, 48_000.0);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].0, 0);
        assert!(matches!(timeline[0].1, Command::NoteOn { pitch, .. } if pitch == 60.0));
        assert_eq!(timeline[1].0, 24_000);
        assert!(matches!(timeline[1].1, Command::NoteOff { .. }));
    }

    #[test]
    fn duration_covers_last_event_plus_tail() {
        let score: Score = serde_json::from_str(SCORE_JSON).unwrap();
        assert!((score.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tolerant_field_names_parse_too() {
        let json = r#"{
            "globalSettings": { "sampleRate": 22050 },
            "instrument": { "type": "sine" },
            "events": [ { "time": 0, "kind": "on", "pitch": 69, "velocity": 64 } ]
        }"#;
        let score: Score = serde_json::from_str(json).unwrap();
        assert_eq!(score.settings.sample_rate, 22_050);
        assert_eq!(score.events[0].volume, 64);
    }

    #[test]
    fn offline_render_of_a_sine_note_decays_to_silence() {
        use crate::chain::VOLUME_MAX;
        use crate::engine::AudioEngine;
        use crate::instrument::Instrument;

        let json = r#"{
            "settings": { "sample_rate": 8000, "voices": 2, "tail_secs": 0.1 },
            "instrument": { "type": "sine", "frequency": 440.0 },
            "events": [
                { "at": 0.0, "action": "on", "pitch": 69, "volume": 127 },
                { "at": 0.2, "action": "off", "pitch": 69 }
            ]
        }"#;
        let score: Score = serde_json::from_str(json).unwrap();
        let rate = score.settings.sample_rate as f32;

        let mut engine = AudioEngine::new(rate, 2).unwrap();
        let spec = score.instrument.to_source_spec(rate).unwrap();
        let voices = score.settings.voices.unwrap_or(16);
        let inst = Instrument::new(&spec, voices, VOLUME_MAX, rate).unwrap();
        let id = engine.register(inst);

        let mut timeline = score.timeline(id, rate).into_iter().peekable();
        let target_frames = (score.duration_secs() * rate as f64) as usize;
        let mut rendered = 0usize;
        let mut buffer = vec![0.0f32; 256];
        let mut heard_sound = false;
        let mut last_block_peak = 0.0f32;
        while rendered < target_frames {
            while let Some((due, _)) = timeline.peek() {
                if *due <= rendered as u64 {
                    let (_, cmd) = timeline.next().unwrap();
                    engine.handle_command(cmd);
                } else {
                    break;
                }
            }
            engine.process_block(&mut buffer);
            let peak = buffer.iter().fold(0.0f32, |a, s| a.max(s.abs()));
            heard_sound |= peak > 0.01;
            last_block_peak = peak;
            rendered += buffer.len() / 2;
        }
        assert!(heard_sound);
        assert!(last_block_peak < 1e-6, "tail was {last_block_peak}");
    }

    #[test]
    fn additive_spec_resolves_layers() {
        let json = r#"{
            "settings": {},
            "instrument": { "type": "additive", "layers": [
                { "type": "sine", "frequency": 440.0 },
                { "type": "square", "frequency": 440.0 }
            ]},
            "events": []
        }"#;
        let score: Score = serde_json::from_str(json).unwrap();
        let spec = score.instrument.to_source_spec(44_100.0).unwrap();
        match spec {
            SourceSpec::Additive { layers } => assert_eq!(layers.len(), 2),
            _ => panic!("expected additive"),
        }
    }
}
