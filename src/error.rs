use thiserror::Error;

/// Everything that can go wrong inside the engine.
///
/// Configuration problems are fatal at construction time. Range and state
/// problems are reported to the caller and leave the engine untouched; the
/// render path never sees them. Exhaustion is an ordinary result the caller
/// decides about (drop the note, retry later).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported channel count {0}: only mono or stereo output is supported")]
    UnsupportedChannels(u16),

    #[error("voice pool size {0} out of range 1..=64")]
    InvalidPoolSize(usize),

    #[error("FM timbre ratio {0} must be positive")]
    InvalidTimbreRatio(f64),

    #[error("additive layers must be oscillator, FM or sample sources")]
    InvalidLayer,

    #[error("no output device available")]
    NoOutputDevice,

    #[error("no input device available")]
    NoInputDevice,

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("volume {0} out of range 0..=127")]
    VolumeOutOfRange(i32),

    #[error("panning {0} out of range 0..=127")]
    PanningOutOfRange(i32),

    #[error("ramp time {0} must not be negative")]
    NegativeRamp(f64),

    #[error("voice {voice} out of range for a pool of {max}")]
    VoiceOutOfRange { voice: usize, max: usize },

    #[error("loop window start {start_ms}ms (size {size_ms}ms) out of range for this sample")]
    LoopWindowOutOfRange { start_ms: f64, size_ms: f64 },

    #[error("a take is already recorded; erase it before recording again")]
    TakeOccupied,

    #[error("already recording")]
    AlreadyRecording,

    #[error("not recording")]
    NotRecording,

    #[error("cannot erase while recording")]
    EraseWhileRecording,

    #[error("sample buffer is empty: record or load before playing")]
    EmptySample,

    #[error("instrument has no capture buffer")]
    NoCaptureBuffer,

    #[error("no free voice available")]
    NoFreeVoice,

    #[error("no instrument registered with id {0}")]
    UnknownInstrument(usize),

    #[error("sample file not found: {0}")]
    SampleNotFound(String),

    #[error("failed to decode sample: {0}")]
    Decode(String),
}
