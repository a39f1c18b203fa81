//! The processing stages of the playback chain.
//!
//! ## Sources ([`source`])
//! - [`SegmentPlayer`] - plays scheduled file ranges and loop passes gaplessly
//!
//! ## Effects ([`effect`])
//! - [`PitchShift`] - transposition without a change in duration
//! - [`Equalizer`] - bass, mid and treble peaking bands
//! - [`MonoSum`] - optional downmix to mono
//! - [`Mixer`] - output sum with master volume
//! - [`LevelTap`] - pass-through RMS measurement for the level meter
//!
//! ## Sinks ([`sink`])
//! - [`RtrbSink`] - write to a ring buffer (offline rendering, tests)
//! - [`CpalSink`] - output to a system audio device (requires `cpal_sink` feature)

pub mod source;
pub mod effect;
pub mod sink;

pub use source::{PlayerEvent, PlayerMessage, Segment, SegmentFrames, SegmentPlayer, SegmentToken};
pub use effect::{
    EqBand, Equalizer, EqualizerMessage, LevelTap, Mixer, MixerMessage, MonoSum, MonoSumMessage, PitchShift,
    PitchShiftMessage,
};
pub use sink::RtrbSink;

#[cfg(all(feature = "cpal_sink", feature = "std"))]
pub use sink::CpalSink;

#[cfg(test)]
pub(crate) mod testing {
    use alloc::vec::Vec;

    use dasp_graph::{Buffer, Input};
    use rtrb::{Consumer, RingBuffer};

    use super::RtrbSink;
    use crate::graph::{Handle, NodeGraph};
    use crate::node::{AudioNode, ProcessContext};

    /// Stereo source computing one frame per call
    struct FnSource<F>(F);

    impl<F: FnMut() -> [f32; 2] + Send + 'static> AudioNode for FnSource<F> {
        type Message = ();

        fn process(
            &mut self,
            _ctx: &ProcessContext,
            _messages: impl Iterator<Item = ()>,
            _inputs: &[Input],
            outputs: &mut [Buffer],
        ) {
            for i in 0..Buffer::LEN {
                let frame = (self.0)();
                outputs[0][i] = frame[0];
                outputs[1][i] = frame[1];
            }
        }

        fn num_outputs(&self) -> usize { 2 }
    }

    /// A single stage fed by a generated signal, captured into a ring buffer.
    pub(crate) struct Harness<M: Send + 'static> {
        graph: NodeGraph,
        handle: Handle<M>,
        captured: Consumer<f32>,
    }

    impl<M: Send + 'static> Harness<M> {
        pub(crate) fn new<F, N>(sample_rate: u32, signal: F, stage: N) -> Self
        where
            F: FnMut() -> [f32; 2] + Send + 'static,
            N: AudioNode<Message = M>,
        {
            let mut graph = NodeGraph::new(sample_rate);
            let (tx, captured) = RingBuffer::new(Buffer::LEN * 2 * 512);
            let source = graph.add(FnSource(signal));
            let handle = graph.add(stage);
            let sink = graph.add(RtrbSink::stereo(tx));
            graph.connect(source.id(), handle.id());
            graph.connect(handle.id(), sink.id());
            graph.set_terminal(sink.id());
            Self { graph, handle, captured }
        }

        pub(crate) fn send(&mut self, msg: M) {
            assert!(self.handle.send(msg).is_ok(), "stage queue full");
        }

        /// Render `blocks` blocks and return the (left, right) output.
        pub(crate) fn render(&mut self, blocks: usize) -> (Vec<f32>, Vec<f32>) {
            let mut left = Vec::new();
            let mut right = Vec::new();
            for _ in 0..blocks {
                self.graph.process();
                while let (Ok(l), Ok(r)) = (self.captured.pop(), self.captured.pop()) {
                    left.push(l);
                    right.push(r);
                }
            }
            (left, right)
        }
    }
}
