//! Keystroke delay model
//!
//! Maps a character and a target speed to a human-looking delay. The base
//! delay comes from the target WPM (one word = 5 characters); each character
//! class then applies a random multiplier drawn from its own range, so
//! sentence ends linger, spaces are quick and capitals need a shift press.
//!
//! Randomness is injected by the caller. A seeded `StdRng` gives a
//! reproducible delay sequence.

use std::ops::Range;

use rand::Rng;

use crate::error::TypingError;
use crate::types::Wpm;

/// Average word length used to convert WPM to characters
pub const CHARS_PER_WORD: f64 = 5.0;

/// Character classes with distinct timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharClass {
    /// `.` `!` `?`
    SentenceEnd,
    /// `,` `;` `:`
    ClauseSeparator,
    Space,
    Uppercase,
    Other,
}

impl CharClass {
    pub fn of(c: char) -> Self {
        match c {
            '.' | '!' | '?' => CharClass::SentenceEnd,
            ',' | ';' | ':' => CharClass::ClauseSeparator,
            ' ' => CharClass::Space,
            c if c.is_uppercase() => CharClass::Uppercase,
            _ => CharClass::Other,
        }
    }

    /// Half-open multiplier range applied to the base delay
    pub fn multiplier_range(self) -> Range<f64> {
        match self {
            CharClass::SentenceEnd => 2.0..3.0,
            CharClass::ClauseSeparator => 1.5..2.0,
            CharClass::Space => 0.8..1.2,
            CharClass::Uppercase => 1.1..1.4,
            CharClass::Other => 0.7..1.3,
        }
    }
}

/// Base per-character delay in milliseconds: `60000 / (wpm * 5)`
pub fn base_ms(wpm: Wpm) -> f64 {
    60_000.0 / (wpm.get() * CHARS_PER_WORD)
}

/// Delay in whole milliseconds before emitting `c` at `wpm`
///
/// Deterministic for a given RNG state.
pub fn delay<R: Rng>(c: char, wpm: Wpm, rng: &mut R) -> u64 {
    let multiplier = rng.gen_range(CharClass::of(c).multiplier_range());
    (base_ms(wpm) * multiplier) as u64
}

/// Speed presets selectable by name from the start command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingProfile {
    Slow,
    Normal,
    Fast,
    Expert,
    Custom,
}

impl TypingProfile {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "slow" => Some(TypingProfile::Slow),
            "normal" => Some(TypingProfile::Normal),
            "fast" => Some(TypingProfile::Fast),
            "expert" => Some(TypingProfile::Expert),
            "custom" => Some(TypingProfile::Custom),
            _ => None,
        }
    }

    /// Preset speed, `None` for `Custom`
    pub fn preset_wpm(self) -> Option<f64> {
        match self {
            TypingProfile::Slow => Some(40.0),
            TypingProfile::Normal => Some(60.0),
            TypingProfile::Fast => Some(100.0),
            TypingProfile::Expert => Some(200.0),
            TypingProfile::Custom => None,
        }
    }
}

/// Resolve the effective speed of a start request
///
/// An explicit `custom_wpm` always wins over the profile preset.
pub fn resolve_wpm(profile: Option<&str>, custom_wpm: Option<f64>) -> Result<Wpm, TypingError> {
    if let Some(value) = custom_wpm {
        return Wpm::new(value);
    }
    profile
        .and_then(TypingProfile::from_name)
        .and_then(TypingProfile::preset_wpm)
        .ok_or(TypingError::InvalidWpm)
        .and_then(Wpm::new)
}
