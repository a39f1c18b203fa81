mod segment_player;

pub use segment_player::*;
