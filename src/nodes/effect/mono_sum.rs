//! Mono downmix stage

use dasp_graph::{Buffer, Input};
use crate::node::{AudioNode, ProcessContext};

/// Messages to control a [`MonoSum`]
#[derive(Clone, Copy, Debug)]
pub enum MonoSumMessage {
    /// Whether a source format is known. Without one the stage passes through.
    SetActive(bool),
}

/// Sums all input channels to one at half gain.
///
/// Halving keeps a full-scale stereo signal from clipping when both sides
/// are summed. The sum is written to both output channels.
#[derive(Default)]
pub struct MonoSum {
    active: bool,
}

impl MonoSum {
    pub const GAIN: f32 = 0.5;

    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioNode for MonoSum {
    type Message = MonoSumMessage;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = MonoSumMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                MonoSumMessage::SetActive(active) => self.active = active,
            }
        }

        let Some(buffers) = inputs.first().map(Input::buffers).filter(|b| !b.is_empty()) else {
            outputs.iter_mut().for_each(|b| b.silence());
            return;
        };

        if !self.active {
            for (ch, out) in outputs.iter_mut().enumerate() {
                out.copy_from_slice(&buffers[ch.min(buffers.len() - 1)]);
            }
            return;
        }

        let Some((first, rest)) = outputs.split_first_mut() else { return };
        first.silence();
        for buf in buffers {
            for (o, i) in first.iter_mut().zip(buf.iter()) {
                *o += *i;
            }
        }
        first.iter_mut().for_each(|s| *s *= Self::GAIN);
        for out in rest {
            out.copy_from_slice(first);
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize { 2 }
}
