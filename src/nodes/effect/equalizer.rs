//! Three-band peaking equalizer

use dasp_graph::{Buffer, Input};
use crate::node::{AudioNode, ProcessContext};

/// The equalizer's bands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EqBand {
    Bass = 0,
    Mid = 1,
    Treble = 2,
}

impl EqBand {
    pub const ALL: [EqBand; 3] = [EqBand::Bass, EqBand::Mid, EqBand::Treble];

    /// Centre frequency in Hz
    pub fn frequency(self) -> f64 {
        match self {
            EqBand::Bass => 125.0,
            EqBand::Mid => 1000.0,
            EqBand::Treble => 8000.0,
        }
    }

    pub fn q(self) -> f64 {
        match self {
            EqBand::Bass => 4.0,
            EqBand::Mid | EqBand::Treble => 0.9,
        }
    }
}

/// Messages to control an [`Equalizer`]
#[derive(Clone, Copy, Debug)]
pub enum EqualizerMessage {
    /// Band gain in dB, clamped to ±12
    SetGain(EqBand, f32),
}

pub const MAX_GAIN_DB: f32 = 12.0;

#[derive(Clone, Copy, Debug, Default)]
struct Coefficients {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Coefficients {
    // RBJ cookbook peaking filter
    fn peaking(freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let a = 10f64.powf(gain_db / 40.0);
        let w0 = 2.0 * core::f64::consts::PI * (freq / sample_rate).min(0.49);
        let alpha = w0.sin() / (2.0 * q);
        let cos = w0.cos();

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: -2.0 * cos / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    #[inline]
    fn tick(&mut self, c: &Coefficients, x: f64) -> f64 {
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

/// Bass, mid and treble peaking filters in series.
///
/// A band at 0 dB is skipped entirely, so a flat equalizer is transparent.
pub struct Equalizer {
    gains: [f32; 3],
    coefficients: [Coefficients; 3],
    state: [[BiquadState; 3]; 2],
    // Sample rate the coefficients were computed for, 0 = stale
    designed_for: u32,
}

impl Default for Equalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Equalizer {
    pub fn new() -> Self {
        Self {
            gains: [0.0; 3],
            coefficients: [Coefficients::default(); 3],
            state: [[BiquadState::default(); 3]; 2],
            designed_for: 0,
        }
    }

    pub fn gain(&self, band: EqBand) -> f32 {
        self.gains[band as usize]
    }

    fn is_flat(&self) -> bool {
        self.gains.iter().all(|&g| g == 0.0)
    }

    fn design(&mut self, sample_rate: u32) {
        for band in EqBand::ALL {
            self.coefficients[band as usize] =
                Coefficients::peaking(band.frequency(), band.q(), self.gains[band as usize] as f64, sample_rate as f64);
        }
        self.designed_for = sample_rate;
    }
}

impl AudioNode for Equalizer {
    type Message = EqualizerMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = EqualizerMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                EqualizerMessage::SetGain(band, db) => {
                    self.gains[band as usize] = db.clamp(-MAX_GAIN_DB, MAX_GAIN_DB);
                    self.designed_for = 0;
                }
            }
        }

        let Some(buffers) = inputs.first().map(Input::buffers).filter(|b| !b.is_empty()) else {
            outputs.iter_mut().for_each(|b| b.silence());
            return;
        };

        for (ch, out) in outputs.iter_mut().enumerate() {
            out.copy_from_slice(&buffers[ch.min(buffers.len() - 1)]);
        }
        if self.is_flat() {
            return;
        }
        if self.designed_for != ctx.sample_rate {
            self.design(ctx.sample_rate);
        }

        for (ch, out) in outputs.iter_mut().enumerate().take(2) {
            for band in EqBand::ALL {
                if self.gains[band as usize] == 0.0 {
                    continue;
                }
                let c = self.coefficients[band as usize];
                let state = &mut self.state[ch][band as usize];
                for s in out.iter_mut() {
                    *s = state.tick(&c, *s as f64) as f32;
                }
            }
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize { 2 }
}
