//! tactus: a polyphonic touch-instrument audio engine.
//!
//! Touch and gesture adapters resolve contacts into `(pitch, volume)` pairs
//! and drive a fixed pool of voice chains through a lock-free command ring;
//! the audio callback owns the engine and renders block by block.

pub mod allocator;
pub mod audio_io;
pub mod capture;
pub mod chain;
pub mod command;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod instrument;
pub mod pitch;
pub mod pool;
pub mod sample;
pub mod score;
pub mod source;
pub mod touch;

pub use allocator::PitchAllocator;
pub use capture::LiveCaptureBuffer;
pub use chain::VoiceChain;
pub use command::{Command, InstrumentId};
pub use config::EngineConfig;
pub use dsp::{Envelope, Waveform};
pub use engine::AudioEngine;
pub use error::EngineError;
pub use instrument::{Instrument, SourceSpec};
pub use pool::VoicePool;
pub use score::Score;
pub use source::{SampleData, VoiceSource};
