//! Player configuration.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes. The crate does not read files itself; deserialize a
//! [`PlayerConfig`] with any serde format and hand it to
//! [`Player::with_config`](crate::Player::with_config).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::loop_buffer::{DEFAULT_RAMP_FRAMES, MIN_LOOP_SECONDS};
use crate::meter::{DEFAULT_DECAY, DEFAULT_MIN_DB, DEFAULT_SILENCE_THRESHOLD};
use crate::nodes::effect::DEFAULT_WINDOW_FRAMES;
use crate::scheduler::DEFAULT_DECISION_WINDOW;

/// Tempo the rate is measured against in BPM mode
pub const DEFAULT_BASE_BPM: f64 = 125.0;

/// Lowest playback rate a tempo setting resolves to
pub const MIN_TEMPO_RATE: f64 = 0.01;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub scheduling: SchedulingConfig,
    pub looping: LoopConfig,
    pub meter: MeterConfig,
    pub engine: EngineConfig,
    /// BPM that corresponds to a playback rate of 1.0
    pub base_bpm: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            scheduling: SchedulingConfig::default(),
            looping: LoopConfig::default(),
            meter: MeterConfig::default(),
            engine: EngineConfig::default(),
            base_bpm: DEFAULT_BASE_BPM,
        }
    }
}

/// Boundary and display timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Lead time for queueing the next loop segment, in seconds
    pub decision_window_secs: f64,
    /// Loop boundary check period
    pub boundary_tick_ms: u64,
    /// Position refresh period
    pub display_tick_ms: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            decision_window_secs: DEFAULT_DECISION_WINDOW,
            boundary_tick_ms: 20,
            display_tick_ms: 100,
        }
    }
}

impl SchedulingConfig {
    pub fn boundary_tick(&self) -> Duration {
        Duration::from_millis(self.boundary_tick_ms)
    }

    pub fn display_tick(&self) -> Duration {
        Duration::from_millis(self.display_tick_ms)
    }
}

/// Loop buffer construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Fade length at both ends of a loop pass, in frames
    pub ramp_frames: usize,
    /// Loops shorter than this are not built, in seconds
    pub min_loop_secs: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            ramp_frames: DEFAULT_RAMP_FRAMES,
            min_loop_secs: MIN_LOOP_SECONDS,
        }
    }
}

/// Level meter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Peak multiplier per tick
    pub decay: f32,
    /// Peak below which the meter reads zero
    pub silence_threshold: f32,
    /// Bottom of the display range in dB
    pub min_db: f32,
    /// Meter refresh period
    pub level_tick_ms: u64,
    /// Frames per RMS reading
    pub window_frames: usize,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            decay: DEFAULT_DECAY,
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            min_db: DEFAULT_MIN_DB,
            level_tick_ms: 100,
            window_frames: DEFAULT_WINDOW_FRAMES,
        }
    }
}

impl MeterConfig {
    pub fn level_tick(&self) -> Duration {
        Duration::from_millis(self.level_tick_ms)
    }
}

/// Queue sizes between the control side and the render path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Control messages per node
    pub message_queue: usize,
    /// Segments the player may hold queued
    pub segment_queue: usize,
    /// Render events awaiting the control side
    pub event_queue: usize,
    /// RMS readings awaiting the control side
    pub level_queue: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            message_queue: 64,
            segment_queue: 64,
            event_queue: 256,
            level_queue: 64,
        }
    }
}

/// A tempo setting, resolved to a playback rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tempo {
    /// Absolute tempo, relative to the base BPM
    Bpm(f64),
    /// Percentage of the original speed
    Percent(f64),
}

impl Default for Tempo {
    fn default() -> Self {
        Tempo::Percent(100.0)
    }
}

impl Tempo {
    /// Playback rate, 1.0 = original speed, never below [`MIN_TEMPO_RATE`].
    pub fn rate(&self, base_bpm: f64) -> f64 {
        let rate = match *self {
            Tempo::Bpm(bpm) => bpm / base_bpm,
            Tempo::Percent(percent) => percent / 100.0,
        };
        if rate.is_nan() {
            return 1.0;
        }
        rate.max(MIN_TEMPO_RATE)
    }
}

/// Per-track settings applied on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackDefaults {
    pub pitch_semitones: f32,
    pub tempo: Tempo,
    pub loop_enabled: bool,
    /// Loop start as a fraction of the track length
    pub intro_position: f64,
    /// Loop end as a fraction of the track length
    pub outro_position: f64,
}

impl Default for TrackDefaults {
    fn default() -> Self {
        Self {
            pitch_semitones: 0.0,
            tempo: Tempo::default(),
            loop_enabled: false,
            intro_position: 0.0,
            outro_position: 1.0,
        }
    }
}
