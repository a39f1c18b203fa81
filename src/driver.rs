//! Render drivers - what actually calls [`NodeGraph::process`].
//!
//! A driver takes ownership of the graph while running and gives it back on
//! stop, so the topology can only be changed while nothing is rendering.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::error::EngineError;
use crate::graph::NodeGraph;
use crate::node::BLOCK_FRAMES;

/// Runs a [`NodeGraph`] on behalf of the player.
pub trait RenderDriver {
    /// Start rendering `graph`.
    ///
    /// On failure the driver keeps the graph; [`stop`](Self::stop) returns it.
    fn start(&mut self, graph: NodeGraph) -> Result<(), EngineError>;

    /// Stop rendering and hand the graph back.
    fn stop(&mut self) -> Option<NodeGraph>;

    fn is_running(&self) -> bool;
}

/// Renders only when asked to.
///
/// For offline rendering and deterministic tests: nothing happens between
/// calls to [`render_blocks`](Self::render_blocks).
#[derive(Default)]
pub struct ManualDriver {
    graph: Option<NodeGraph>,
    running: bool,
    fail_next_start: bool,
    blocks_rendered: u64,
}

impl ManualDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next [`start`](RenderDriver::start) fail, as an unavailable
    /// output device would.
    pub fn fail_next_start(&mut self) {
        self.fail_next_start = true;
    }

    /// Total blocks rendered since creation
    pub fn blocks_rendered(&self) -> u64 {
        self.blocks_rendered
    }

    /// Render `blocks` blocks. Returns how many were rendered (0 while stopped).
    pub fn render_blocks(&mut self, blocks: usize) -> usize {
        let Some(graph) = self.graph.as_mut().filter(|_| self.running) else {
            return 0;
        };
        for _ in 0..blocks {
            graph.process();
        }
        self.blocks_rendered += blocks as u64;
        blocks
    }

    /// Render at least `frames` frames, rounded up to whole blocks.
    pub fn render_frames(&mut self, frames: usize) -> usize {
        self.render_blocks(frames.div_ceil(BLOCK_FRAMES))
    }
}

impl RenderDriver for ManualDriver {
    fn start(&mut self, graph: NodeGraph) -> Result<(), EngineError> {
        if self.running {
            return Err(EngineError::AlreadyRunning);
        }
        self.graph = Some(graph);
        if self.fail_next_start {
            self.fail_next_start = false;
            return Err(EngineError::Start("simulated start failure".into()));
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Option<NodeGraph> {
        self.running = false;
        self.graph.take()
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

/// Renders on a dedicated thread, paced against wall time.
///
/// The thread keeps `lead_blocks` blocks ahead of real time; the sink at the
/// end of the graph absorbs the lead. Between bursts it sleeps briefly.
pub struct ThreadDriver {
    slot: Arc<Mutex<Option<NodeGraph>>>,
    stop: Arc<AtomicBool>,
    blocks_rendered: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
    lead_blocks: u64,
    idle_sleep: Duration,
}

impl Default for ThreadDriver {
    fn default() -> Self {
        Self::new(6)
    }
}

impl ThreadDriver {
    pub fn new(lead_blocks: u64) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            stop: Arc::new(AtomicBool::new(false)),
            blocks_rendered: Arc::new(AtomicU64::new(0)),
            thread: None,
            lead_blocks,
            idle_sleep: Duration::from_micros(500),
        }
    }

    /// Blocks rendered by the current or last run
    pub fn blocks_rendered(&self) -> u64 {
        self.blocks_rendered.load(Ordering::Relaxed)
    }

    fn render_loop(
        slot: Arc<Mutex<Option<NodeGraph>>>,
        stop: Arc<AtomicBool>,
        blocks_rendered: Arc<AtomicU64>,
        lead_blocks: u64,
        idle_sleep: Duration,
    ) {
        let start = Instant::now();
        let mut rendered = 0u64;

        while !stop.load(Ordering::Acquire) {
            {
                let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
                let Some(graph) = guard.as_mut() else { break };
                let rate = graph.sample_rate() as f64;
                let target = (start.elapsed().as_secs_f64() * rate / BLOCK_FRAMES as f64) as u64 + lead_blocks;
                while rendered < target {
                    graph.process();
                    rendered += 1;
                }
            }
            blocks_rendered.store(rendered, Ordering::Relaxed);
            std::thread::sleep(idle_sleep);
        }
        debug!(rendered, "render thread exiting");
    }
}

impl RenderDriver for ThreadDriver {
    fn start(&mut self, graph: NodeGraph) -> Result<(), EngineError> {
        if self.thread.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(graph);
        self.stop.store(false, Ordering::Release);
        self.blocks_rendered.store(0, Ordering::Relaxed);

        let slot = self.slot.clone();
        let stop = self.stop.clone();
        let blocks = self.blocks_rendered.clone();
        let (lead, idle) = (self.lead_blocks, self.idle_sleep);
        let handle = std::thread::Builder::new()
            .name("schleife-render".into())
            .spawn(move || Self::render_loop(slot, stop, blocks, lead, idle))
            .map_err(|e| {
                error!("failed to spawn render thread: {}", e);
                EngineError::Spawn(e.to_string())
            })?;

        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Option<NodeGraph> {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("render thread panicked");
            }
        }
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn is_running(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for ThreadDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{Mixer, RtrbSink};
    use rtrb::RingBuffer;

    fn graph() -> (NodeGraph, rtrb::Consumer<f32>) {
        let mut graph = NodeGraph::new(48000);
        let (tx, rx) = RingBuffer::new(BLOCK_FRAMES * 2 * 64);
        let mixer = graph.add(Mixer::stereo());
        let sink = graph.add(RtrbSink::stereo(tx));
        graph.connect(mixer.id(), sink.id());
        graph.set_terminal(sink.id());
        (graph, rx)
    }

    #[test]
    fn manual_driver_renders_only_while_running() {
        let (g, rx) = graph();
        let mut driver = ManualDriver::new();
        assert_eq!(driver.render_blocks(3), 0);

        driver.start(g).unwrap();
        assert_eq!(driver.render_frames(100), 2);
        assert_eq!(rx.slots(), BLOCK_FRAMES * 2 * 2);

        let g = driver.stop().unwrap();
        assert_eq!(driver.render_blocks(3), 0);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn failed_start_keeps_the_graph() {
        let (g, _rx) = graph();
        let mut driver = ManualDriver::new();
        driver.fail_next_start();
        assert!(matches!(driver.start(g), Err(EngineError::Start(_))));
        assert!(!driver.is_running());
        let g = driver.stop().expect("graph handed back");

        driver.start(g).unwrap();
        assert!(driver.is_running());
    }

    #[test]
    fn thread_driver_renders_and_returns_graph() {
        let (g, rx) = graph();
        let mut driver = ThreadDriver::new(4);
        driver.start(g).unwrap();
        assert!(matches!(driver.start(NodeGraph::new(48000)), Err(EngineError::AlreadyRunning)));

        let deadline = Instant::now() + Duration::from_secs(2);
        while driver.blocks_rendered() < 4 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        let g = driver.stop().expect("graph handed back");
        assert!(!driver.is_running());
        assert!(driver.blocks_rendered() >= 4);
        assert!(rx.slots() > 0);
        assert_eq!(g.sample_rate(), 48000);
    }
}
