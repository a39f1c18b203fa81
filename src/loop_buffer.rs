//! Loop region and its pre-decoded buffer.

use alloc::sync::Arc;
use alloc::vec::Vec;

use tracing::{debug, warn};

use crate::source::AudioSource;

/// Shortest loop that will be built, in seconds.
pub const MIN_LOOP_SECONDS: f64 = 0.005;

/// Default length of the edge fades applied to a loop buffer, in frames.
pub const DEFAULT_RAMP_FRAMES: usize = 128;

/// One decoded loop pass covering `[start_frame, end_frame)` of the source.
///
/// The first and last few frames of every channel are faded so the splice
/// back to the start of the loop does not click.
#[derive(Debug)]
pub struct LoopBuffer {
    samples: Vec<f32>,
    channels: usize,
    start_frame: u64,
    end_frame: u64,
}

impl LoopBuffer {
    #[inline]
    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    #[inline]
    pub fn end_frame(&self) -> u64 {
        self.end_frame
    }

    /// Length of one pass in frames
    #[inline]
    pub fn frames(&self) -> u64 {
        self.end_frame - self.start_frame
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Interleaved samples of the pass
    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

/// Linear fade-in over the first `ramp` frames and fade-out over the last
/// `ramp` frames, where `ramp = min(ramp_frames, frames / 2)`.
pub fn apply_edge_ramps(samples: &mut [f32], channels: usize, ramp_frames: usize) {
    if channels == 0 {
        return;
    }
    let total = samples.len() / channels;
    let n = ramp_frames.min(total / 2);
    if n == 0 {
        return;
    }

    for i in 0..n {
        let fade_in = i as f32 / n as f32;
        let fade_out = 1.0 - i as f32 / n as f32;
        let head = i * channels;
        let tail = (total - n + i) * channels;
        for ch in 0..channels {
            samples[head + ch] *= fade_in;
            samples[tail + ch] *= fade_out;
        }
    }
}

/// The user-selected loop: bounds, enable flag, and the buffer built from them.
///
/// The buffer is `None` whenever the bounds are unusable; looping is then
/// inert no matter what `enabled` says.
#[derive(Debug, Default)]
pub struct LoopRegion {
    enabled: bool,
    start_seconds: f64,
    end_seconds: f64,
    buffer: Option<Arc<LoopBuffer>>,
}

impl LoopRegion {
    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn start_seconds(&self) -> f64 {
        self.start_seconds
    }

    #[inline]
    pub fn end_seconds(&self) -> f64 {
        self.end_seconds
    }

    /// The current buffer, if the region is valid
    #[inline]
    pub fn buffer(&self) -> Option<&Arc<LoopBuffer>> {
        self.buffer.as_ref()
    }

    /// Whether a pass can actually be scheduled right now
    pub fn is_active(&self) -> bool {
        self.enabled && self.buffer.is_some()
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn set_bounds(&mut self, start_seconds: f64, end_seconds: f64) {
        self.start_seconds = start_seconds;
        self.end_seconds = end_seconds;
    }

    pub(crate) fn set_buffer(&mut self, buffer: Option<Arc<LoopBuffer>>) {
        self.buffer = buffer;
    }
}

/// Builds loop buffers from a source.
#[derive(Clone, Copy, Debug)]
pub struct LoopBufferCache {
    ramp_frames: usize,
    min_loop_seconds: f64,
}

impl Default for LoopBufferCache {
    fn default() -> Self {
        Self::new(DEFAULT_RAMP_FRAMES, MIN_LOOP_SECONDS)
    }
}

impl LoopBufferCache {
    pub fn new(ramp_frames: usize, min_loop_seconds: f64) -> Self {
        Self {
            ramp_frames,
            min_loop_seconds,
        }
    }

    /// Decode and ramp `[start_seconds, end_seconds)`.
    ///
    /// Returns `None` for regions shorter than the minimum, regions that clamp
    /// to nothing, and read failures.
    pub fn rebuild(&self, source: &AudioSource, start_seconds: f64, end_seconds: f64) -> Option<Arc<LoopBuffer>> {
        if !(end_seconds > start_seconds) || end_seconds - start_seconds < self.min_loop_seconds {
            debug!(start_seconds, end_seconds, "loop region too short, loop is inert");
            return None;
        }

        let format = source.format();
        let start_frame = format.frame_at(start_seconds);
        let end_frame = format.frame_at(end_seconds);
        if end_frame <= start_frame {
            debug!(start_frame, end_frame, "loop region clamps to nothing, loop is inert");
            return None;
        }

        let mut samples = match source.read_range(start_frame, end_frame) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("failed reading loop buffer: {}", e);
                return None;
            }
        };
        apply_edge_ramps(&mut samples, format.channels, self.ramp_frames);

        debug!(start_frame, end_frame, "loop buffer rebuilt");
        Some(Arc::new(LoopBuffer {
            samples,
            channels: format.channels,
            start_frame,
            end_frame,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn ones(seconds: f64, rate: u32, channels: usize) -> AudioSource {
        let frames = (seconds * rate as f64) as usize;
        AudioSource::new(MemorySource::new(vec![1.0; frames * channels], channels, rate).unwrap()).unwrap()
    }

    #[test]
    fn ramps_are_symmetric_per_channel() {
        let mut samples = vec![1.0; 2 * 10];
        apply_edge_ramps(&mut samples, 2, 4);
        let left: Vec<f32> = samples.iter().step_by(2).copied().collect();
        let right: Vec<f32> = samples.iter().skip(1).step_by(2).copied().collect();
        assert_eq!(left, right);
        assert_eq!(&left[..4], &[0.0, 0.25, 0.5, 0.75]);
        assert_eq!(&left[4..6], &[1.0, 1.0]);
        assert_eq!(&left[6..], &[1.0, 0.75, 0.5, 0.25]);
    }

    #[test]
    fn ramp_is_capped_at_half_the_buffer() {
        let mut samples = vec![1.0; 4];
        apply_edge_ramps(&mut samples, 1, 128);
        assert_eq!(samples, vec![0.0, 0.5, 1.0, 0.5]);
    }

    #[test]
    fn short_regions_are_rejected() {
        let source = ones(1.0, 44100, 2);
        let cache = LoopBufferCache::default();
        assert!(cache.rebuild(&source, 0.5, 0.5049).is_none());
        assert!(cache.rebuild(&source, 0.5, 0.5).is_none());
        assert!(cache.rebuild(&source, 0.6, 0.5).is_none());
        assert!(cache.rebuild(&source, 0.5, 0.505).is_some());
    }

    #[test]
    fn bounds_are_clamped_to_the_source() {
        let source = ones(1.0, 1000, 1);
        let buffer = LoopBufferCache::default().rebuild(&source, 0.5, 3.0).unwrap();
        assert_eq!(buffer.start_frame(), 500);
        assert_eq!(buffer.end_frame(), 1000);
        assert_eq!(buffer.samples().len(), 500);
    }

    #[test]
    fn region_past_the_end_is_inert() {
        let source = ones(1.0, 1000, 1);
        assert!(LoopBufferCache::default().rebuild(&source, 2.0, 3.0).is_none());
    }

    #[test]
    fn region_activity_needs_a_buffer() {
        let mut region = LoopRegion::default();
        region.set_enabled(true);
        assert!(!region.is_active());
        let source = ones(1.0, 1000, 1);
        region.set_buffer(LoopBufferCache::default().rebuild(&source, 0.1, 0.2));
        assert!(region.is_active());
    }
}
