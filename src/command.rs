//! Control-thread → audio-thread messages.
//!
//! Adapters (OSC listeners, GUI callbacks, pads) translate gestures into
//! these commands and push them through a lock-free ring; the audio callback
//! drains the ring at the top of every block.

/// Registry handle for an instrument owned by the engine.
pub type InstrumentId = usize;

#[derive(Debug, Clone)]
pub enum Command {
    /// Allocate a voice for `pitch` (MIDI, possibly fractional) and start it.
    /// When `pan` is given, the allocated voice is panned before it sounds.
    NoteOn {
        instrument: InstrumentId,
        pitch: f64,
        volume: i32,
        pan: Option<i32>,
    },
    /// Release the voice sounding `pitch`.
    NoteOff {
        instrument: InstrumentId,
        pitch: f64,
    },
    SetVolume {
        instrument: InstrumentId,
        voice: usize,
        volume: i32,
        ramp_secs: f64,
    },
    SetPanning {
        instrument: InstrumentId,
        voice: usize,
        panning: i32,
    },
    SetFrequency {
        instrument: InstrumentId,
        voice: usize,
        frequency: f64,
    },
    Play {
        instrument: InstrumentId,
        voice: usize,
        start_ms: f64,
        size_ms: f64,
    },
    Loop {
        instrument: InstrumentId,
        voice: usize,
        times: i32,
        start_ms: f64,
        size_ms: f64,
    },
    Start {
        instrument: InstrumentId,
        voice: usize,
    },
    Stop {
        instrument: InstrumentId,
        voice: usize,
    },
    StopAll {
        instrument: InstrumentId,
    },
    Pause {
        instrument: InstrumentId,
        voice: usize,
    },
    Resume {
        instrument: InstrumentId,
        voice: usize,
    },
    SetMuted {
        instrument: InstrumentId,
        voice: usize,
        muted: bool,
    },
    ResetVoice {
        instrument: InstrumentId,
        voice: usize,
    },
    /// Ramp every voice of the instrument to silence over `secs`, then stop
    /// them once the ramp completes. The stop is scheduled on the audio
    /// clock; nothing blocks.
    FadeOut {
        instrument: InstrumentId,
        secs: f64,
    },
    StartRecording {
        instrument: InstrumentId,
    },
    StopRecording {
        instrument: InstrumentId,
    },
    Erase {
        instrument: InstrumentId,
    },
    /// Input frames from a capture stream, appended to a take in progress.
    FeedCapture {
        instrument: InstrumentId,
        frames: Vec<f32>,
    },
}
