//! Conversions between MIDI pitch, frequency in Hertz and semitone deltas.
//!
//! All functions are pure. Fractional pitches are accepted everywhere, so
//! 60.5 is the quarter tone between C4 and C#4.

use std::f64::consts::LN_2;

/// Concert A (A4) reference frequency.
pub const CONCERT_A_HZ: f64 = 440.0;

/// MIDI pitch number of concert A.
pub const CONCERT_A_PITCH: f64 = 69.0;

/// Convert a (possibly fractional) MIDI pitch to a frequency in Hertz.
pub fn pitch_to_frequency(pitch: f64) -> f64 {
    CONCERT_A_HZ * 2.0_f64.powf((pitch - CONCERT_A_PITCH) / 12.0)
}

/// Convert a frequency in Hertz to a (possibly fractional) MIDI pitch.
pub fn frequency_to_pitch(freq: f64) -> f64 {
    (freq / CONCERT_A_HZ).log2() * 12.0 + CONCERT_A_PITCH
}

/// Number of whole semitones between two frequencies, truncated toward zero.
pub fn semitones_between(freq1: f64, freq2: f64) -> i32 {
    ((12.0 / LN_2) * (freq2 / freq1).ln()) as i32
}

/// Frequency delta that transposes `freq` by the given number of semitones.
pub fn frequency_change_for_semitones(freq: f64, semitones: i32) -> f64 {
    ((semitones as f64 * LN_2 / 12.0).exp() - 1.0) * freq
}
