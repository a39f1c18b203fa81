//! Error types.
//!
//! Most failures in the player are recovered locally (clamped, ignored, or
//! logged), so only a handful of conditions surface as values.

use thiserror::Error;

/// The render path could not be started or restarted.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The render thread could not be spawned
    #[error("Failed to spawn render thread: {0}")]
    Spawn(String),

    /// The driver refused to start (e.g. device unavailable)
    #[error("Failed to start render path: {0}")]
    Start(String),

    /// The driver is already running a graph
    #[error("Render path is already running")]
    AlreadyRunning,

    /// No graph was available to hand to the driver
    #[error("No graph available to render")]
    NoGraph,
}

/// An audio source could not be opened or read.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The decoder rejected the stream
    #[error("Decode error: {0}")]
    Decode(String),

    /// Format parameters are unusable (zero channels, zero rate, ragged data)
    #[error("Invalid source format: {0}")]
    InvalidFormat(String),
}

/// Errors reported by [`Player`](crate::Player) operations.
#[derive(Error, Debug)]
pub enum PlayerError {
    /// Loading a source failed; the player state is unchanged
    #[error("Failed to load audio source: {0}")]
    Load(#[from] SourceError),

    /// The operation needs a loaded source
    #[error("No audio source loaded")]
    NoSource,
}

/// Result type for source operations
pub type SourceResult<T> = Result<T, SourceError>;
