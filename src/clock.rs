//! Render clock and playback position.
//!
//! The segment player publishes how many source frames it has played since
//! the last flush ([`RenderClock`]). [`PlaybackClock`] turns that into an
//! absolute position in the source file.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Sample-accurate clock published by the render path.
///
/// Written only by the segment player, read from the control side. The
/// generation counter is read on both sides of the sample time (seqlock
/// style) so a reader never pairs a sample time with the wrong generation.
#[derive(Debug, Default)]
pub struct RenderClock {
    generation: AtomicU64,
    sample_time: AtomicU64,
    running: AtomicBool,
}

/// One consistent reading of the [`RenderClock`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockSnapshot {
    /// Generation of the schedule the render path is playing
    pub generation: u64,
    /// Source frames played since the generation began
    pub sample_time: u64,
}

impl RenderClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render side: a flush started a new generation.
    pub(crate) fn reset(&self, generation: u64) {
        self.sample_time.store(0, Ordering::Relaxed);
        self.generation.store(generation, Ordering::Release);
    }

    /// Render side: publish the number of source frames played so far.
    pub(crate) fn publish(&self, sample_time: u64) {
        self.sample_time.store(sample_time, Ordering::Release);
    }

    /// Render side: playback started or paused.
    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Whether the player is currently rendering
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Read the clock. `None` while the player is not rendering.
    pub fn snapshot(&self) -> Option<ClockSnapshot> {
        if !self.is_running() {
            return None;
        }
        loop {
            let before = self.generation.load(Ordering::Acquire);
            let sample_time = self.sample_time.load(Ordering::Acquire);
            let after = self.generation.load(Ordering::Acquire);
            if before == after {
                return Some(ClockSnapshot {
                    generation: before,
                    sample_time,
                });
            }
        }
    }
}

/// Reconciles the render clock with the logical seek position.
///
/// Position = `anchor_frame + (sample_time - anchor_sample_time)`. The anchor
/// is set on every seek or fresh play and re-based whenever a segment starts,
/// which keeps the position right across loop passes.
#[derive(Clone, Debug)]
pub struct PlaybackClock {
    seek_offset_seconds: f64,
    anchor_frame: u64,
    anchor_sample_time: u64,
    generation: u64,
    just_seeked: bool,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            seek_offset_seconds: 0.0,
            anchor_frame: 0,
            anchor_sample_time: 0,
            generation: 0,
            just_seeked: false,
        }
    }

    /// Logical position set by the last seek or fresh play
    pub fn seek_offset_seconds(&self) -> f64 {
        self.seek_offset_seconds
    }

    /// True until the render path acknowledges the latest seek
    pub fn just_seeked(&self) -> bool {
        self.just_seeked
    }

    /// A new schedule of `generation` starts at `frame`.
    pub fn seek(&mut self, seconds: f64, frame: u64, generation: u64) {
        self.seek_offset_seconds = seconds;
        self.anchor_frame = frame;
        self.anchor_sample_time = 0;
        self.generation = generation;
        self.just_seeked = true;
    }

    /// A segment of the current generation began playing `frame` at `sample_time`.
    pub fn rebase(&mut self, frame: u64, sample_time: u64) {
        self.anchor_frame = frame;
        self.anchor_sample_time = sample_time;
        self.just_seeked = false;
    }

    /// Forget everything (stop / unload).
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Render timing if it belongs to the current generation.
    pub fn timing(&self, render: Option<ClockSnapshot>) -> Option<ClockSnapshot> {
        render.filter(|snap| snap.generation == self.generation)
    }

    /// Absolute source frame being played, clamped to `[0, total_frames]`.
    ///
    /// Falls back to the seek position while the render path has not yet
    /// picked up the latest seek, or when it reports no timing at all.
    pub fn current_source_frame(&self, render: Option<ClockSnapshot>, total_frames: u64) -> u64 {
        let frame = match self.timing(render) {
            Some(snap) if !self.just_seeked => {
                let elapsed = snap.sample_time.saturating_sub(self.anchor_sample_time);
                self.anchor_frame + elapsed
            }
            _ => self.anchor_frame,
        };
        frame.min(total_frames)
    }
}
