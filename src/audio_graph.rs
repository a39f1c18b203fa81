//! The playback signal chain.
//!
//! ```text
//! segment player -> pitch -> eq -> [mono sum] -> mixer -> level tap -> sink
//! ```
//!
//! The nodes are created once. Switching mono on or off rewires the edges,
//! which needs the render path stopped; every other knob is a message to a
//! running node.

use alloc::sync::Arc;

use rtrb::{Consumer, RingBuffer};
use tracing::{debug, error, warn};

use crate::clock::{ClockSnapshot, RenderClock};
use crate::config::{EngineConfig, MeterConfig};
use crate::driver::RenderDriver;
use crate::error::EngineError;
use crate::graph::{Handle, NodeGraph};
use crate::node::{AudioNode, NodeId};
use crate::nodes::{
    EqBand, Equalizer, EqualizerMessage, LevelTap, Mixer, MixerMessage, MonoSum, MonoSumMessage, PitchShift,
    PitchShiftMessage, PlayerEvent, PlayerMessage, Segment, SegmentPlayer,
};
use crate::scheduler::RenderPath;
use crate::source::SourceFormat;

/// User pitch range in semitones
pub const MAX_PITCH_SEMITONES: f32 = 12.0;
/// Playback rate range
pub const MIN_RATE: f64 = 0.01;
pub const MAX_RATE: f64 = 4.0;
/// Equalizer gain range in dB
pub const MAX_EQ_GAIN_DB: f32 = crate::nodes::effect::MAX_GAIN_DB;

/// Current knob settings of the chain.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphConfig {
    pub force_mono: bool,
    pub pitch_semitones: f32,
    pub tempo_rate: f64,
    pub eq_gains: [f32; 3],
    pub volume: f32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            force_mono: false,
            pitch_semitones: 0.0,
            tempo_rate: 1.0,
            eq_gains: [0.0; 3],
            volume: 1.0,
        }
    }
}

impl GraphConfig {
    /// Transposition the pitch stage must apply.
    ///
    /// The player changes tempo by varispeed, which also moves the pitch by
    /// `12 * log2(rate)` semitones; the pitch stage takes that back out.
    pub fn transpose_semitones(&self) -> f32 {
        let varispeed = 12.0 * self.tempo_rate.log2();
        (self.pitch_semitones as f64 - varispeed) as f32
    }
}

#[derive(Clone, Copy, Debug)]
struct ChainIds {
    player: NodeId,
    pitch: NodeId,
    eq: NodeId,
    mono: NodeId,
    mixer: NodeId,
    tap: NodeId,
    sink: NodeId,
}

impl ChainIds {
    fn wire(&self, graph: &mut NodeGraph, force_mono: bool) {
        graph.disconnect_all();
        graph.connect(self.player, self.pitch);
        graph.connect(self.pitch, self.eq);
        if force_mono {
            graph.connect(self.eq, self.mono);
            graph.connect(self.mono, self.mixer);
        } else {
            graph.connect(self.eq, self.mixer);
        }
        graph.connect(self.mixer, self.tap);
        graph.connect(self.tap, self.sink);
        graph.set_terminal(self.sink);
    }
}

/// Owns the node graph, its render driver and the handles to every stage.
pub struct AudioGraph<D: RenderDriver> {
    driver: D,
    // Held here while the driver is stopped
    graph: Option<NodeGraph>,
    ids: ChainIds,

    player: Handle<PlayerMessage>,
    pitch: Handle<PitchShiftMessage>,
    eq: Handle<EqualizerMessage>,
    mono: Handle<MonoSumMessage>,
    mixer: Handle<MixerMessage>,

    events: Consumer<PlayerEvent>,
    levels: Consumer<f32>,
    clock: Arc<RenderClock>,

    config: GraphConfig,
    source_format: Option<SourceFormat>,
}

impl<D: RenderDriver> AudioGraph<D> {
    /// Build the chain at `sample_rate`, ending in `sink`. Starts stopped.
    pub fn new<S>(driver: D, sample_rate: u32, sink: S, engine: &EngineConfig, meter: &MeterConfig) -> Self
    where
        S: AudioNode<Message = ()>,
    {
        let mut graph = NodeGraph::new(sample_rate);
        let clock = Arc::new(RenderClock::new());
        let (event_tx, events) = RingBuffer::new(engine.event_queue);
        let (level_tx, levels) = RingBuffer::new(engine.level_queue);

        let player = graph.add_with_queue_size(
            SegmentPlayer::new(clock.clone(), event_tx, engine.segment_queue),
            engine.message_queue,
        );
        let pitch = graph.add(PitchShift::new());
        let eq = graph.add(Equalizer::new());
        let mono = graph.add(MonoSum::new());
        let mixer = graph.add(Mixer::stereo());
        let tap = graph.add(LevelTap::new(level_tx, meter.window_frames));
        let sink = graph.add(sink);

        let ids = ChainIds {
            player: player.id(),
            pitch: pitch.id(),
            eq: eq.id(),
            mono: mono.id(),
            mixer: mixer.id(),
            tap: tap.id(),
            sink: sink.id(),
        };
        ids.wire(&mut graph, false);

        Self {
            driver,
            graph: Some(graph),
            ids,
            player,
            pitch,
            eq,
            mono,
            mixer,
            events,
            levels,
            clock,
            config: GraphConfig::default(),
            source_format: None,
        }
    }

    #[inline]
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    #[inline]
    pub fn source_format(&self) -> Option<SourceFormat> {
        self.source_format
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// The node graph, only reachable while the render path is stopped
    pub fn graph(&self) -> Option<&NodeGraph> {
        self.graph.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.driver.is_running()
    }

    /// Current render clock reading, `None` unless the player is rendering
    pub fn render_timing(&self) -> Option<ClockSnapshot> {
        self.clock.snapshot()
    }

    /// Start the render path if it is not running.
    ///
    /// On failure the graph is taken back and the chain stays stopped.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.driver.is_running() {
            return Ok(());
        }
        let graph = self.graph.take().ok_or(EngineError::NoGraph)?;
        match self.driver.start(graph) {
            Ok(()) => {
                debug!("render path started");
                Ok(())
            }
            Err(e) => {
                error!("failed to start render path: {}", e);
                self.graph = self.driver.stop();
                Err(e)
            }
        }
    }

    /// Stop the render path and take the graph back.
    pub fn stop(&mut self) {
        if let Some(graph) = self.driver.stop() {
            self.graph = Some(graph);
        }
    }

    /// Wire the chain for stereo or mono output. Only possible while stopped.
    ///
    /// Returns false, changing nothing, while the render path is running.
    pub fn configure(&mut self, force_mono: bool) -> bool {
        let Some(graph) = self.graph.as_mut() else {
            warn!("cannot rewire a running graph");
            return false;
        };
        self.ids.wire(graph, force_mono);
        self.config.force_mono = force_mono;
        debug!(force_mono, edges = graph.edge_count(), "graph configured");
        true
    }

    /// Stop, rewire and restart. Blocks while the render thread is joined.
    pub fn rebuild(&mut self, force_mono: bool) -> Result<(), EngineError> {
        self.stop();
        self.configure(force_mono);
        self.start()
    }

    fn send_player(&mut self, msg: PlayerMessage) {
        if let Err(msg) = self.player.send(msg) {
            warn!(?msg, "player message queue full, dropping");
        }
    }

    /// Start rendering queued segments
    pub fn play(&mut self) {
        self.send_player(PlayerMessage::Play);
    }

    /// Pause rendering, keeping queued segments
    pub fn pause(&mut self) {
        self.send_player(PlayerMessage::Pause);
    }

    /// Tell the chain about the loaded source, or that there is none.
    pub fn set_source_format(&mut self, format: Option<SourceFormat>) {
        self.source_format = format;
        if let Some(format) = format {
            self.send_player(PlayerMessage::SetFormat {
                sample_rate: format.sample_rate,
                channels: format.channels,
            });
        }
        if self.mono.send(MonoSumMessage::SetActive(format.is_some())).is_err() {
            warn!("mono stage queue full");
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.config.volume = volume.clamp(0.0, 2.0);
        if self.mixer.send(MixerMessage::SetVolume(self.config.volume)).is_err() {
            warn!("mixer queue full");
        }
    }

    pub fn set_pitch_semitones(&mut self, semitones: f32) {
        self.config.pitch_semitones = semitones.clamp(-MAX_PITCH_SEMITONES, MAX_PITCH_SEMITONES);
        self.apply_pitch();
    }

    pub fn set_tempo_rate(&mut self, rate: f64) {
        let rate = if rate.is_nan() { 1.0 } else { rate.clamp(MIN_RATE, MAX_RATE) };
        self.config.tempo_rate = rate;
        self.send_player(PlayerMessage::SetRate(rate));
        self.apply_pitch();
    }

    pub fn set_eq_gain(&mut self, band: EqBand, db: f32) {
        let db = db.clamp(-MAX_EQ_GAIN_DB, MAX_EQ_GAIN_DB);
        self.config.eq_gains[band as usize] = db;
        if self.eq.send(EqualizerMessage::SetGain(band, db)).is_err() {
            warn!("equalizer queue full");
        }
    }

    fn apply_pitch(&mut self) {
        let transpose = self.config.transpose_semitones();
        // Rounding noise must not take the stage out of bypass
        let transpose = if transpose.abs() < 1e-4 { 0.0 } else { transpose };
        if self.pitch.send(PitchShiftMessage::SetSemitones(transpose)).is_err() {
            warn!("pitch queue full");
        }
    }

    /// Next render event, if any
    pub fn pop_event(&mut self) -> Option<PlayerEvent> {
        self.events.pop().ok()
    }

    /// Next RMS reading from the level tap, if any
    pub fn pop_level(&mut self) -> Option<f32> {
        self.levels.pop().ok()
    }
}

impl<D: RenderDriver> RenderPath for AudioGraph<D> {
    fn flush(&mut self, generation: u64) {
        self.send_player(PlayerMessage::Flush { generation });
    }

    fn enqueue(&mut self, segment: Segment) {
        self.send_player(PlayerMessage::Schedule(segment));
    }
}
