mod equalizer;
mod level_tap;
mod mixer;
mod mono_sum;
mod pitch_shift;

pub use equalizer::*;
pub use level_tap::*;
pub use mixer::*;
pub use mono_sum::*;
pub use pitch_shift::*;
