//! Ring buffer sink - hands rendered audio to another thread

use dasp_graph::{Buffer, Input};
use rtrb::Producer;

use crate::node::{AudioNode, ProcessContext};

/// Writes interleaved samples into an rtrb ring buffer.
///
/// Used for offline rendering and tests, or to feed an output stream that
/// lives elsewhere. A block that does not fit is dropped whole and counted,
/// never written partially.
pub struct RtrbSink {
    producer: Producer<f32>,
    channels: usize,
    dropped_blocks: u64,
}

impl RtrbSink {
    pub fn new(producer: Producer<f32>, channels: usize) -> Self {
        Self {
            producer,
            channels: channels.max(1),
            dropped_blocks: 0,
        }
    }

    pub fn stereo(producer: Producer<f32>) -> Self {
        Self::new(producer, 2)
    }

    /// Free sample slots in the ring
    #[inline]
    pub fn available(&self) -> usize {
        self.producer.slots()
    }

    /// Blocks lost because the reader fell behind
    #[inline]
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks
    }
}

impl AudioNode for RtrbSink {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        _outputs: &mut [Buffer],
    ) {
        let Some(buffers) = inputs.first().map(Input::buffers) else { return };
        if buffers.is_empty() {
            return;
        }

        let frames = buffers[0].len();
        let channels = self.channels;
        let Ok(chunk) = self.producer.write_chunk_uninit(frames * channels) else {
            self.dropped_blocks += 1;
            return;
        };

        let interleaved = (0..frames).flat_map(|i| {
            (0..channels).map(move |ch| buffers[ch.min(buffers.len() - 1)][i])
        });
        chunk.fill_from_iter(interleaved);
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize { 0 }
}
