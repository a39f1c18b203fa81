//! Level tap - measures RMS on the way through

use dasp_graph::{Buffer, Input};
use rtrb::Producer;

use crate::node::{AudioNode, ProcessContext};

/// Frames per RMS measurement
pub const DEFAULT_WINDOW_FRAMES: usize = 1024;

/// Passes audio through unchanged and reports its level.
///
/// Every `window` frames the RMS of each channel is computed, averaged
/// across channels and pushed to the control side. Readings are dropped
/// when nobody drains the queue.
pub struct LevelTap {
    levels: Producer<f32>,
    window: usize,
    sum_squares: [f64; 2],
    frames: usize,
}

impl LevelTap {
    pub fn new(levels: Producer<f32>, window: usize) -> Self {
        Self {
            levels,
            window: window.max(1),
            sum_squares: [0.0; 2],
            frames: 0,
        }
    }
}

impl AudioNode for LevelTap {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        let Some(buffers) = inputs.first().map(Input::buffers).filter(|b| !b.is_empty()) else {
            outputs.iter_mut().for_each(|b| b.silence());
            return;
        };
        for (ch, out) in outputs.iter_mut().enumerate() {
            out.copy_from_slice(&buffers[ch.min(buffers.len() - 1)]);
        }

        let channels = outputs.len().min(2);
        let len = outputs.first().map(|b| b.len()).unwrap_or(0);
        for i in 0..len {
            for ch in 0..channels {
                let s = outputs[ch][i] as f64;
                self.sum_squares[ch] += s * s;
            }
            self.frames += 1;

            if self.frames == self.window {
                let n = self.frames as f64;
                let rms = self.sum_squares[..channels]
                    .iter()
                    .map(|sq| (sq / n).sqrt())
                    .sum::<f64>()
                    / channels as f64;
                let _ = self.levels.push(rms as f32);
                self.sum_squares = [0.0; 2];
                self.frames = 0;
            }
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize { 2 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testing::Harness;
    use rtrb::RingBuffer;

    #[test]
    fn reports_channel_average_per_window() {
        let (tx, mut rx) = RingBuffer::new(16);
        let mut h = Harness::new(44100, || [0.5, -0.25], LevelTap::new(tx, 128));
        let (left, right) = h.render(4);
        assert!(left.iter().all(|&s| s == 0.5));
        assert!(right.iter().all(|&s| s == -0.25));

        let readings: Vec<f32> = core::iter::from_fn(|| rx.pop().ok()).collect();
        assert_eq!(readings.len(), 2);
        for r in readings {
            assert!((r - 0.375).abs() < 1e-6);
        }
    }

    #[test]
    fn partial_window_is_held_back() {
        let (tx, mut rx) = RingBuffer::new(16);
        let mut h = Harness::new(44100, || [1.0, 1.0], LevelTap::new(tx, DEFAULT_WINDOW_FRAMES));
        h.render(DEFAULT_WINDOW_FRAMES / Buffer::LEN - 1);
        assert!(rx.pop().is_err());
        h.render(1);
        assert!((rx.pop().unwrap() - 1.0).abs() < 1e-6);
    }
}
