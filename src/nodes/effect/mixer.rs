//! Output mixer - sums its inputs and applies the master volume

use dasp_graph::{Buffer, Input};
use crate::node::{AudioNode, ProcessContext};

/// Messages to control a [`Mixer`]
#[derive(Clone, Copy, Debug)]
pub enum MixerMessage {
    /// Linear output gain, clamped to `[0.0, 2.0]`
    SetVolume(f32),
}

/// Sums every input into `channels` output channels, then scales by volume.
///
/// A mono input is copied to every output channel. Extra input channels
/// are ignored.
pub struct Mixer {
    channels: usize,
    volume: f32,
}

impl Mixer {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            volume: 1.0,
        }
    }

    pub fn stereo() -> Self {
        Self::new(2)
    }

    #[inline]
    pub fn volume(&self) -> f32 {
        self.volume
    }
}

impl AudioNode for Mixer {
    type Message = MixerMessage;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = MixerMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                MixerMessage::SetVolume(v) => self.volume = v.clamp(0.0, 2.0),
            }
        }

        for buf in outputs.iter_mut() {
            buf.silence();
        }

        for input in inputs {
            let buffers = input.buffers();
            if buffers.is_empty() {
                continue;
            }
            for (out_ch, out_buf) in outputs.iter_mut().enumerate() {
                let in_buf = &buffers[out_ch.min(buffers.len() - 1)];
                for (o, i) in out_buf.iter_mut().zip(in_buf.iter()) {
                    *o += *i;
                }
            }
        }

        if self.volume != 1.0 {
            for buf in outputs.iter_mut() {
                buf.iter_mut().for_each(|s| *s *= self.volume);
            }
        }
    }

    fn num_inputs(&self) -> usize {
        usize::MAX
    }

    fn num_outputs(&self) -> usize {
        self.channels
    }
}
