//! Pitch-to-voice allocation.
//!
//! A sounding pitch is keyed by its frequency and mapped to the voice index
//! that plays it. Allocation is idempotent per key: asking again for a pitch
//! that is already sounding returns the same voice. When every voice is
//! taken the allocator reports exhaustion and the caller decides what to do;
//! no voice is ever stolen here.

use std::collections::HashMap;

use log::{debug, warn};

/// Frequencies are keyed at millihertz resolution so the same pitch reached
/// through slightly different float math lands on the same voice.
fn freq_key(freq: f64) -> u64 {
    (freq * 1000.0).round() as u64
}

#[derive(Debug, Clone)]
pub struct PitchAllocator {
    sounding: HashMap<u64, usize>,
    max_voices: usize,
}

impl PitchAllocator {
    pub fn new(max_voices: usize) -> Self {
        Self {
            sounding: HashMap::new(),
            max_voices,
        }
    }

    /// Voice for `freq`, allocating the lowest free index if the pitch is
    /// not already sounding. `None` means every voice is busy.
    pub fn allocate(&mut self, freq: f64) -> Option<usize> {
        let key = freq_key(freq);
        if let Some(&voice) = self.sounding.get(&key) {
            return Some(voice);
        }
        let free = (0..self.max_voices).find(|v| !self.sounding.values().any(|&used| used == *v));
        match free {
            Some(voice) => {
                self.sounding.insert(key, voice);
                debug!("allocated voice {voice} for {freq:.3} Hz");
                Some(voice)
            }
            None => {
                warn!("no free voice for {freq:.3} Hz ({} sounding)", self.sounding.len());
                None
            }
        }
    }

    /// Release the voice sounding `freq`, returning its index. Releasing a
    /// pitch that is not sounding is a no-op with a diagnostic.
    pub fn deallocate(&mut self, freq: f64) -> Option<usize> {
        match self.sounding.remove(&freq_key(freq)) {
            Some(voice) => {
                debug!("released voice {voice} for {freq:.3} Hz");
                Some(voice)
            }
            None => {
                debug!("{freq:.3} Hz is not sounding");
                None
            }
        }
    }

    pub fn voice_for(&self, freq: f64) -> Option<usize> {
        self.sounding.get(&freq_key(freq)).copied()
    }

    pub fn is_sounding(&self, freq: f64) -> bool {
        self.sounding.contains_key(&freq_key(freq))
    }

    pub fn sounding_count(&self) -> usize {
        self.sounding.len()
    }

    pub fn max_voices(&self) -> usize {
        self.max_voices
    }

    /// Forget every allocation, e.g. after an all-notes-off.
    pub fn clear(&mut self) {
        self.sounding.clear();
    }
}
