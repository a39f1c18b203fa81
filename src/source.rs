//! Audio sources.
//!
//! Decoding is not this crate's business: a source is anything that can hand
//! out interleaved `f32` frames by absolute frame index. [`MemorySource`]
//! covers pre-decoded audio, and with the `vorbis_src` feature an Ogg Vorbis
//! file can be decoded into one.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::{SourceError, SourceResult};

/// Fixed properties of a decodable stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceFormat {
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: usize,
    /// Total length in frames
    pub total_frames: u64,
}

impl SourceFormat {
    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.total_frames as f64 / self.sample_rate as f64
    }

    /// Convert seconds to a frame index, rounding, clamped to the stream
    pub fn frame_at(&self, seconds: f64) -> u64 {
        let frame = (seconds.max(0.0) * self.sample_rate as f64).round() as u64;
        frame.min(self.total_frames)
    }

    /// Convert a frame index to seconds
    pub fn seconds_at(&self, frame: u64) -> f64 {
        frame as f64 / self.sample_rate as f64
    }
}

/// Frame-indexed read access to decoded audio.
///
/// Readers are shared between the control side (loop buffer decoding) and the
/// render path (file segments), so reads take `&self`. A reader used while
/// playing is called from the render context and must not block.
pub trait FrameReader: Send + Sync + 'static {
    /// Format of the stream
    fn format(&self) -> SourceFormat;

    /// Fill `out` with interleaved frames starting at `start_frame`.
    ///
    /// `out.len()` is a multiple of the channel count. Returns the number of
    /// frames written; fewer than requested means the end of the stream.
    fn read_frames(&self, start_frame: u64, out: &mut [f32]) -> SourceResult<usize>;
}

/// An opened audio source: a shared reader plus its format.
#[derive(Clone)]
pub struct AudioSource {
    reader: Arc<dyn FrameReader>,
    format: SourceFormat,
}

impl AudioSource {
    /// Wrap a reader, validating its format
    pub fn new<R: FrameReader>(reader: R) -> SourceResult<Self> {
        Self::from_arc(Arc::new(reader))
    }

    /// Wrap an already shared reader
    pub fn from_arc(reader: Arc<dyn FrameReader>) -> SourceResult<Self> {
        let format = reader.format();
        if format.sample_rate == 0 {
            return Err(SourceError::InvalidFormat("sample rate is zero".into()));
        }
        if format.channels == 0 {
            return Err(SourceError::InvalidFormat("channel count is zero".into()));
        }
        Ok(Self { reader, format })
    }

    #[inline]
    pub fn format(&self) -> SourceFormat {
        self.format
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.format.channels
    }

    #[inline]
    pub fn total_frames(&self) -> u64 {
        self.format.total_frames
    }

    #[inline]
    pub fn duration_secs(&self) -> f64 {
        self.format.duration_secs()
    }

    /// Shared handle to the reader, for the render path
    pub fn reader(&self) -> Arc<dyn FrameReader> {
        Arc::clone(&self.reader)
    }

    /// Decode `[start_frame, end_frame)` into a fresh interleaved buffer.
    ///
    /// Bounds are clamped to the stream.
    pub fn read_range(&self, start_frame: u64, end_frame: u64) -> SourceResult<Vec<f32>> {
        let total = self.format.total_frames;
        let start = start_frame.min(total);
        let end = end_frame.min(total);
        let frames = end.saturating_sub(start) as usize;

        let mut out = alloc::vec![0.0; frames * self.format.channels];
        let read = self.reader.read_frames(start, &mut out)?;
        if read < frames {
            return Err(SourceError::Decode(alloc::format!(
                "short read: wanted {} frames at {}, got {}",
                frames, start, read
            )));
        }
        Ok(out)
    }
}

impl core::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AudioSource").field("format", &self.format).finish()
    }
}

/// Pre-decoded interleaved audio held in memory.
///
/// Reads are plain copies, so this reader is safe to use from the render
/// context.
pub struct MemorySource {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
}

impl MemorySource {
    /// Create a source from interleaved samples.
    ///
    /// # Arguments
    ///
    /// - `samples` - Interleaved audio data (L, R, L, R, ... for stereo)
    /// - `channels` - Number of channels in the audio data
    /// - `sample_rate` - Sample rate of the audio data in Hz
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> SourceResult<Self> {
        if channels == 0 {
            return Err(SourceError::InvalidFormat("channel count is zero".into()));
        }
        if sample_rate == 0 {
            return Err(SourceError::InvalidFormat("sample rate is zero".into()));
        }
        if samples.len() % channels != 0 {
            return Err(SourceError::InvalidFormat(alloc::format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                channels
            )));
        }
        Ok(Self {
            samples,
            channels,
            sample_rate,
        })
    }

    /// Number of frames held
    pub fn frames(&self) -> u64 {
        (self.samples.len() / self.channels) as u64
    }
}

impl FrameReader for MemorySource {
    fn format(&self) -> SourceFormat {
        SourceFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            total_frames: self.frames(),
        }
    }

    fn read_frames(&self, start_frame: u64, out: &mut [f32]) -> SourceResult<usize> {
        let total = self.frames();
        if start_frame >= total {
            return Ok(0);
        }
        let wanted = out.len() / self.channels;
        let available = (total - start_frame) as usize;
        let frames = wanted.min(available);

        let from = start_frame as usize * self.channels;
        let len = frames * self.channels;
        out[..len].copy_from_slice(&self.samples[from..from + len]);
        Ok(frames)
    }
}

/// Decode an Ogg Vorbis file into memory.
#[cfg(all(feature = "vorbis_src", feature = "std"))]
pub fn load_vorbis<P: AsRef<std::path::Path>>(path: P) -> SourceResult<AudioSource> {
    use lewton::inside_ogg::OggStreamReader;

    let f = std::fs::File::open(path.as_ref())?;
    let mut srr = OggStreamReader::new(f).map_err(|e| SourceError::Decode(e.to_string()))?;

    let channels = srr.ident_hdr.audio_channels as usize;
    let sample_rate = srr.ident_hdr.audio_sample_rate;
    let mut samples = Vec::new();

    while let Some(packet) = srr
        .read_dec_packet_itl()
        .map_err(|e| SourceError::Decode(e.to_string()))?
    {
        samples.extend(packet.iter().map(|&s| s as f32 / i16::MAX as f32));
    }

    tracing::debug!(
        path = %path.as_ref().display(),
        channels,
        sample_rate,
        frames = samples.len() / channels.max(1),
        "decoded vorbis source"
    );

    AudioSource::new(MemorySource::new(samples, channels, sample_rate)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize, channels: usize) -> MemorySource {
        let samples = (0..frames * channels).map(|i| (i / channels) as f32).collect();
        MemorySource::new(samples, channels, 1000).unwrap()
    }

    #[test]
    fn rejects_ragged_samples() {
        let err = MemorySource::new(vec![0.0; 5], 2, 44100);
        assert!(matches!(err, Err(SourceError::InvalidFormat(_))));
    }

    #[test]
    fn rejects_zero_channels_and_rate() {
        assert!(MemorySource::new(vec![], 0, 44100).is_err());
        assert!(MemorySource::new(vec![], 2, 0).is_err());
    }

    #[test]
    fn read_past_end_is_short() {
        let src = ramp(10, 2);
        let mut out = [0.0; 8];
        assert_eq!(src.read_frames(8, &mut out).unwrap(), 2);
        assert_eq!(&out[..4], &[8.0, 8.0, 9.0, 9.0]);
        assert_eq!(src.read_frames(10, &mut out).unwrap(), 0);
    }

    #[test]
    fn read_range_clamps_to_stream() {
        let source = AudioSource::new(ramp(10, 1)).unwrap();
        let data = source.read_range(7, 50).unwrap();
        assert_eq!(data, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn frame_at_rounds_and_clamps() {
        let format = SourceFormat { sample_rate: 44100, channels: 2, total_frames: 44100 * 3 };
        assert_eq!(format.frame_at(1.5), 66150);
        assert_eq!(format.frame_at(-2.0), 0);
        assert_eq!(format.frame_at(10.0), 44100 * 3);
        // 0.00001s * 44100 = 0.441 -> 0, 0.00002s -> 0.882 -> 1
        assert_eq!(format.frame_at(0.00001), 0);
        assert_eq!(format.frame_at(0.00002), 1);
    }
}
