//! CPAL audio output sink

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample, SupportedStreamConfig};
use dasp_graph::{Buffer, Input};
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{error, warn};

use crate::error::EngineError;
use crate::node::{AudioNode, ProcessContext};

/// Feeds a CPAL output stream.
///
/// The stream lives on its own parked thread (streams are not `Send` on
/// every platform) and pulls from a ring buffer this node fills. Samples
/// the device asks for before the graph delivers them come out as silence.
pub struct CpalSink {
    buffer: Producer<f32>,
    channels: usize,
    samples_consumed: Arc<AtomicUsize>,
    had_underrun: Arc<AtomicBool>,
}

impl CpalSink {
    /// Open an output stream on `device`.
    ///
    /// Fails if the stream cannot be built or started, or uses a sample
    /// format this sink cannot write.
    pub fn new(device: &cpal::Device, config: &SupportedStreamConfig) -> Result<Self, EngineError> {
        let channels = config.channels() as usize;
        let sample_format = config.sample_format();
        let stream_config = config.config();

        // ~100ms of headroom against scheduling jitter
        let buffer_samples = (stream_config.sample_rate.0 as usize / 10) * channels;
        let (producer, consumer) = RingBuffer::<f32>::new(buffer_samples.next_power_of_two().max(8192));

        let samples_consumed = Arc::new(AtomicUsize::new(0));
        let had_underrun = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = mpsc::channel();
        let device = device.clone();
        let consumed = samples_consumed.clone();
        let underrun = had_underrun.clone();
        std::thread::Builder::new()
            .name("schleife-cpal".into())
            .spawn(move || {
                let stream = match build_stream(&device, sample_format, &stream_config, consumer, consumed, underrun) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(EngineError::Start(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // The stream stops when dropped
                loop {
                    std::thread::park();
                }
            })
            .map_err(|e| EngineError::Spawn(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| EngineError::Start("output thread exited".into()))??;

        Ok(Self {
            buffer: producer,
            channels,
            samples_consumed,
            had_underrun,
        })
    }

    /// Samples the device has played so far
    #[inline]
    pub fn samples_consumed(&self) -> usize {
        self.samples_consumed.load(Ordering::Relaxed)
    }

    /// Free space in the ring, in samples
    #[inline]
    pub fn buffer_available(&self) -> usize {
        self.buffer.slots()
    }

    /// Check and clear the underrun flag
    pub fn check_underrun(&self) -> bool {
        self.had_underrun.swap(false, Ordering::Relaxed)
    }
}

fn write_output<T: SizedSample>(
    data: &mut [T],
    consumer: &mut Consumer<f32>,
    samples_consumed: &AtomicUsize,
    had_underrun: &AtomicBool,
    convert: impl Fn(f32) -> T,
) {
    let mut underrun = false;
    for sample in data.iter_mut() {
        let s = consumer.pop().unwrap_or_else(|_| {
            underrun = true;
            0.0
        });
        *sample = convert(s.clamp(-1.0, 1.0));
    }
    if underrun {
        had_underrun.store(true, Ordering::Relaxed);
    }
    samples_consumed.fetch_add(data.len(), Ordering::Relaxed);
}

fn build_stream(
    device: &cpal::Device,
    sample_format: SampleFormat,
    stream_config: &cpal::StreamConfig,
    mut consumer: Consumer<f32>,
    samples_consumed: Arc<AtomicUsize>,
    had_underrun: Arc<AtomicBool>,
) -> Result<cpal::Stream, EngineError> {
    let on_error = |err: cpal::StreamError| error!("output stream error: {}", err);
    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            stream_config,
            move |data: &mut [f32], _| {
                write_output(data, &mut consumer, &samples_consumed, &had_underrun, |s| s)
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            stream_config,
            move |data: &mut [i16], _| {
                write_output(data, &mut consumer, &samples_consumed, &had_underrun, |s| {
                    (s * i16::MAX as f32) as i16
                })
            },
            on_error,
            None,
        ),
        SampleFormat::U16 => device.build_output_stream(
            stream_config,
            move |data: &mut [u16], _| {
                write_output(data, &mut consumer, &samples_consumed, &had_underrun, |s| {
                    ((s + 1.0) * 0.5 * u16::MAX as f32) as u16
                })
            },
            on_error,
            None,
        ),
        other => {
            warn!(?other, "unsupported output sample format");
            return Err(EngineError::Start(format!("unsupported sample format {:?}", other)));
        }
    };
    stream.map_err(|e| EngineError::Start(e.to_string()))
}

impl AudioNode for CpalSink {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        _outputs: &mut [Buffer],
    ) {
        let Some(buffers) = inputs.first().map(Input::buffers).filter(|b| !b.is_empty()) else {
            return;
        };

        let frames = buffers[0].len();
        let channels = self.channels;
        // Skip the block rather than write part of it
        let Ok(chunk) = self.buffer.write_chunk_uninit(frames * channels) else {
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
