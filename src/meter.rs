//! VU-style level meter.

/// Default per-tick decay of the held peak
pub const DEFAULT_DECAY: f32 = 0.855;
/// Peak below which the meter reads zero and stops ticking
pub const DEFAULT_SILENCE_THRESHOLD: f32 = 0.001;
/// Level mapped to the bottom of the display range
pub const DEFAULT_MIN_DB: f32 = -40.0;

/// What the meter is fed with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeterMode {
    /// Playing: RMS readings raise the peak
    Live,
    /// Paused or stopped: readings are ignored, the peak falls off
    Decaying,
    /// Silent; nothing to do until playback resumes
    Idle,
}

/// Holds a decaying peak and maps it to a `[0, 1]` display level.
#[derive(Clone, Debug)]
pub struct LevelMeter {
    peak: f32,
    display: f32,
    mode: MeterMode,
    decay: f32,
    silence_threshold: f32,
    min_db: f32,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(DEFAULT_DECAY, DEFAULT_SILENCE_THRESHOLD, DEFAULT_MIN_DB)
    }
}

impl LevelMeter {
    pub fn new(decay: f32, silence_threshold: f32, min_db: f32) -> Self {
        Self {
            peak: 0.0,
            display: 0.0,
            mode: MeterMode::Idle,
            decay,
            silence_threshold,
            min_db,
        }
    }

    #[inline]
    pub fn mode(&self) -> MeterMode {
        self.mode
    }

    #[inline]
    pub fn peak(&self) -> f32 {
        self.peak
    }

    /// Display level in `[0, 1]`
    #[inline]
    pub fn level(&self) -> f32 {
        self.display
    }

    /// Whether the meter still needs periodic ticks
    pub fn needs_tick(&self) -> bool {
        self.mode != MeterMode::Idle
    }

    pub fn set_live(&mut self) {
        self.mode = MeterMode::Live;
    }

    /// Let the peak fall off without taking new readings.
    pub fn set_decaying(&mut self) {
        if self.mode == MeterMode::Live {
            self.mode = MeterMode::Decaying;
        }
    }

    /// A new RMS reading from the level tap. Ignored unless live.
    pub fn push_rms(&mut self, rms: f32) {
        if self.mode != MeterMode::Live {
            return;
        }
        self.peak = rms.max(self.peak * self.decay);
    }

    /// Advance one display period.
    pub fn tick(&mut self) -> f32 {
        match self.mode {
            MeterMode::Idle => {}
            MeterMode::Live => self.display = self.to_display(self.peak),
            MeterMode::Decaying => {
                self.peak *= self.decay;
                if self.peak < self.silence_threshold {
                    self.peak = 0.0;
                    self.display = 0.0;
                    self.mode = MeterMode::Idle;
                } else {
                    self.display = self.to_display(self.peak);
                }
            }
        }
        self.display
    }

    fn to_display(&self, peak: f32) -> f32 {
        if peak <= 0.0 {
            return 0.0;
        }
        let db = 20.0 * peak.log10();
        ((db - self.min_db) / -self.min_db).clamp(0.0, 1.0)
    }
}
