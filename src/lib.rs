//! Schleife - gapless loop playback on a message-driven audio graph
//!
//! Design principles:
//! - The render path never blocks: control reaches nodes through rtrb
//!   message queues, and events come back the same way
//! - Loop passes are pre-rendered and queued ahead of the boundary, so a
//!   loop repeats without a gap or a click
//! - Every schedule carries a generation; anything reported for an older
//!   one is ignored
//! - The graph has a fixed sample rate; sources are resampled on the fly

extern crate alloc;

mod node;
mod graph;
mod clock;
mod driver;
mod audio_graph;
mod player;
mod ticker;
pub mod config;
pub mod error;
pub mod loop_buffer;
pub mod meter;
pub mod nodes;
pub mod scheduler;
pub mod source;

#[cfg(all(feature = "cpal_sink", feature = "std"))]
mod device;

pub use node::{AudioNode, NodeId, ProcessContext, BLOCK_FRAMES};
pub use graph::{Handle, NodeGraph};
pub use clock::{ClockSnapshot, PlaybackClock, RenderClock};
pub use driver::{ManualDriver, RenderDriver, ThreadDriver};
pub use audio_graph::{AudioGraph, GraphConfig};
pub use player::{Player, PlayerStatus};
pub use ticker::PeriodicTask;

pub use config::{PlayerConfig, Tempo, TrackDefaults};
pub use error::{EngineError, PlayerError, SourceError};
pub use loop_buffer::{LoopBuffer, LoopRegion};
pub use nodes::{EqBand, RtrbSink};
pub use scheduler::PlaybackPhase;
pub use source::{AudioSource, FrameReader, MemorySource, SourceFormat};

#[cfg(all(feature = "vorbis_src", feature = "std"))]
pub use source::load_vorbis;

#[cfg(all(feature = "cpal_sink", feature = "std"))]
pub use device::CpalDevice;
