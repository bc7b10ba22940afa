//! Bounded live-recording buffer feeding a sampled instrument.
//!
//! State machine: Idle → `start_recording` → Recording → `stop_recording`
//! → Idle with a take. Recording over an existing take is refused until
//! `erase` clears it; writing past capacity truncates with a warning rather
//! than failing the performer mid-take.

use std::sync::Arc;

use log::{info, warn};

use crate::error::EngineError;
use crate::source::SampleData;

#[derive(Debug, Clone)]
pub struct LiveCaptureBuffer {
    frames: Vec<f32>,
    write_cursor: usize,
    recorded_len: Option<usize>,
    recording: bool,
    overrun_warned: bool,
    sample_rate: f32,
}

impl LiveCaptureBuffer {
    pub fn new(max_seconds: f64, sample_rate: f32) -> Self {
        let capacity = (max_seconds * sample_rate as f64) as usize;
        Self {
            frames: vec![0.0; capacity],
            write_cursor: 0,
            recorded_len: None,
            recording: false,
            overrun_warned: false,
            sample_rate,
        }
    }

    pub fn capacity_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Length of the recorded take, `None` while the buffer is untouched.
    pub fn recorded_len(&self) -> Option<usize> {
        self.recorded_len
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_empty(&self) -> bool {
        self.recorded_len.is_none()
    }

    pub fn start_recording(&mut self) -> Result<(), EngineError> {
        if self.recording {
            return Err(EngineError::AlreadyRecording);
        }
        if self.recorded_len.is_some() {
            return Err(EngineError::TakeOccupied);
        }
        self.write_cursor = 0;
        self.overrun_warned = false;
        self.recording = true;
        info!("recording started ({} frames capacity)", self.frames.len());
        Ok(())
    }

    /// Append input frames to the current take. Ignored while not
    /// recording; frames beyond capacity are dropped.
    pub fn write_frames(&mut self, input: &[f32]) {
        if !self.recording {
            return;
        }
        let room = self.frames.len() - self.write_cursor;
        if input.len() > room && !self.overrun_warned {
            warn!(
                "recording exceeded capacity by {} frames, truncating",
                input.len() - room
            );
            self.overrun_warned = true;
        }
        let take = input.len().min(room);
        self.frames[self.write_cursor..self.write_cursor + take].copy_from_slice(&input[..take]);
        self.write_cursor += take;
    }

    /// Finish the take; returns its length in frames.
    pub fn stop_recording(&mut self) -> Result<usize, EngineError> {
        if !self.recording {
            return Err(EngineError::NotRecording);
        }
        self.recording = false;
        self.recorded_len = Some(self.write_cursor);
        info!("recording stopped at {} frames", self.write_cursor);
        Ok(self.write_cursor)
    }

    /// Clear the take and return to the untouched state.
    pub fn erase(&mut self) -> Result<(), EngineError> {
        if self.recording {
            return Err(EngineError::EraseWhileRecording);
        }
        self.frames.fill(0.0);
        self.write_cursor = 0;
        self.recorded_len = None;
        Ok(())
    }

    /// Freeze the take into shareable sample data.
    pub fn snapshot(&self, natural_freq: f64) -> Result<Arc<SampleData>, EngineError> {
        let len = self.recorded_len.ok_or(EngineError::EmptySample)?;
        Ok(Arc::new(SampleData::new(
            self.frames[..len].to_vec(),
            self.sample_rate,
            natural_freq,
        )))
    }
}
