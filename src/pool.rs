//! Fixed-size collection of voice chains belonging to one instrument.
//!
//! Every public method validates the voice index. Out-of-range requests are
//! reported as errors the caller may log and drop; nothing here panics, the
//! policy is degrade gracefully and keep playing.

use crate::chain::{VoiceChain, PAN_CENTER, VOLUME_MAX};
use crate::dsp::DEFAULT_RAMP_SECS;
use crate::error::EngineError;

/// Hard upper bound on pool size; typical instruments use 1..=16.
pub const MAX_VOICES: usize = 64;

#[derive(Debug, Clone)]
pub struct VoicePool {
    chains: Vec<VoiceChain>,
}

impl VoicePool {
    /// The pool size is fixed for the pool's whole life.
    pub fn new(chains: Vec<VoiceChain>) -> Result<Self, EngineError> {
        if chains.is_empty() || chains.len() > MAX_VOICES {
            return Err(EngineError::InvalidPoolSize(chains.len()));
        }
        Ok(Self { chains })
    }

    pub fn max_voices(&self) -> usize {
        self.chains.len()
    }

    pub fn chain(&self, voice: usize) -> Option<&VoiceChain> {
        self.chains.get(voice)
    }

    fn checked(&mut self, voice: usize) -> Result<&mut VoiceChain, EngineError> {
        let max = self.chains.len();
        self.chains
            .get_mut(voice)
            .ok_or(EngineError::VoiceOutOfRange { voice, max })
    }

    pub fn set_volume(
        &mut self,
        voice: usize,
        volume: i32,
        ramp_secs: f64,
    ) -> Result<(), EngineError> {
        self.checked(voice)?.set_volume(volume, ramp_secs)
    }

    pub fn volume(&self, voice: usize) -> Option<i32> {
        self.chains.get(voice).map(|c| c.volume())
    }

    pub fn set_panning(&mut self, voice: usize, panning: i32) -> Result<(), EngineError> {
        self.checked(voice)?.set_panning(panning)
    }

    pub fn panning(&self, voice: usize) -> Option<i32> {
        self.chains.get(voice).map(|c| c.panning())
    }

    pub fn set_frequency(&mut self, voice: usize, freq: f64) -> Result<(), EngineError> {
        self.checked(voice)?.set_frequency(freq);
        Ok(())
    }

    pub fn frequency(&self, voice: usize) -> Option<f64> {
        self.chains.get(voice).map(|c| c.frequency())
    }

    pub fn set_pitch(&mut self, voice: usize, pitch: f64) -> Result<(), EngineError> {
        self.checked(voice)?.set_pitch(pitch);
        Ok(())
    }

    pub fn pitch(&self, voice: usize) -> Option<f64> {
        self.chains.get(voice).map(|c| c.pitch())
    }

    pub fn play(&mut self, voice: usize, start_ms: f64, size_ms: f64) -> Result<(), EngineError> {
        self.checked(voice)?.play(start_ms, size_ms)
    }

    pub fn play_looped(
        &mut self,
        voice: usize,
        times: i32,
        start_ms: f64,
        size_ms: f64,
    ) -> Result<(), EngineError> {
        self.checked(voice)?.play_looped(times, start_ms, size_ms)
    }

    pub fn start(&mut self, voice: usize) -> Result<(), EngineError> {
        self.checked(voice)?.start();
        Ok(())
    }

    pub fn stop(&mut self, voice: usize) -> Result<(), EngineError> {
        self.checked(voice)?.stop();
        Ok(())
    }

    pub fn pause(&mut self, voice: usize) -> Result<(), EngineError> {
        self.checked(voice)?.pause();
        Ok(())
    }

    pub fn resume(&mut self, voice: usize) -> Result<(), EngineError> {
        self.checked(voice)?.resume();
        Ok(())
    }

    pub fn set_muted(&mut self, voice: usize, muted: bool) -> Result<(), EngineError> {
        self.checked(voice)?.set_muted(muted);
        Ok(())
    }

    pub fn is_playing(&self, voice: usize) -> Option<bool> {
        self.chains.get(voice).map(|c| c.is_playing())
    }

    pub fn is_paused(&self, voice: usize) -> Option<bool> {
        self.chains.get(voice).map(|c| c.is_paused())
    }

    pub fn stop_all(&mut self) {
        for chain in &mut self.chains {
            chain.stop();
        }
    }

    /// Stop a voice and restore its defaults (pan centered, volume at max)
    /// through the ramped setters. The chain itself is kept.
    pub fn reset_voice(&mut self, voice: usize) -> Result<(), EngineError> {
        let chain = self.checked(voice)?;
        chain.stop();
        chain.set_panning(PAN_CENTER)?;
        chain.set_volume(VOLUME_MAX, DEFAULT_RAMP_SECS)?;
        Ok(())
    }

    pub fn reset_all(&mut self) {
        for voice in 0..self.chains.len() {
            // Index is always valid here.
            let _ = self.reset_voice(voice);
        }
    }

    pub(crate) fn chains_mut(&mut self) -> impl Iterator<Item = &mut VoiceChain> + '_ {
        self.chains.iter_mut()
    }

    /// Mix every voice additively into an interleaved stereo buffer.
    pub fn render(&mut self, out: &mut [f32]) {
        for chain in &mut self.chains {
            chain.render(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::Waveform;
    use crate::source::{Oscillator, VoiceSource};

    fn pool_of(n: usize) -> VoicePool {
        let chains = (0..n)
            .map(|_| {
                let source = VoiceSource::Oscillator(Oscillator::new(Waveform::Sine, 440.0));
                VoiceChain::new(source, 44_100.0, VOLUME_MAX).unwrap()
            })
            .collect();
        VoicePool::new(chains).unwrap()
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(matches!(
            VoicePool::new(Vec::new()),
            Err(EngineError::InvalidPoolSize(0))
        ));
    }

    #[test]
    fn out_of_range_voice_is_reported_not_fatal() {
        let mut pool = pool_of(4);
        assert!(matches!(
            pool.set_volume(4, 100, 0.0),
            Err(EngineError::VoiceOutOfRange { voice: 4, max: 4 })
        ));
        assert!(pool.volume(4).is_none());
        // The pool keeps working afterwards.
        assert!(pool.set_volume(0, 100, 0.0).is_ok());
    }

    #[test]
    fn reset_voice_restores_defaults() {
        let mut pool = pool_of(2);
        pool.set_panning(1, 0).unwrap();
        pool.set_volume(1, 10, 0.0).unwrap();
        pool.start(1).unwrap();
        pool.pause(1).unwrap();

        pool.reset_voice(1).unwrap();
        assert_eq!(pool.panning(1), Some(PAN_CENTER));
        assert_eq!(pool.volume(1), Some(VOLUME_MAX));
        assert_eq!(pool.is_playing(1), Some(false));
        assert_eq!(pool.is_paused(1), Some(false));
    }

    #[test]
    fn render_mixes_started_voices() {
        let mut pool = pool_of(2);
        pool.start(0).unwrap();
        let mut buf = vec![0.0f32; 256];
        pool.render(&mut buf);
        assert!(buf.iter().any(|s| s.abs() > 0.0));
    }
}
