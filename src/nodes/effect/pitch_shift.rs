//! Pitch shifter - transposes without changing duration

use alloc::vec::Vec;
use core::f32::consts::PI;

use dasp_graph::{Buffer, Input};
use crate::node::{AudioNode, ProcessContext};

/// Messages to control a [`PitchShift`]
#[derive(Clone, Copy, Debug)]
pub enum PitchShiftMessage {
    /// Transposition in semitones, 0.0 = bypass
    SetSemitones(f32),
}

/// Delay window length in frames
const WINDOW: usize = 2048;
const DELAY_LEN: usize = WINDOW * 2;

/// Two-tap delay-line pitch shifter.
///
/// Two read taps sweep through a delay line half a window apart, each faded
/// with a raised-cosine window so their gains always sum to one. At zero
/// semitones the input is copied through untouched.
pub struct PitchShift {
    semitones: f32,
    ratio: f32,
    phase: f32,
    delay: [Vec<f32>; 2],
    write_pos: usize,
}

impl Default for PitchShift {
    fn default() -> Self {
        Self::new()
    }
}

impl PitchShift {
    pub fn new() -> Self {
        Self {
            semitones: 0.0,
            ratio: 1.0,
            phase: 0.0,
            delay: [alloc::vec![0.0; DELAY_LEN], alloc::vec![0.0; DELAY_LEN]],
            write_pos: 0,
        }
    }

    #[inline]
    pub fn semitones(&self) -> f32 {
        self.semitones
    }

    #[inline]
    pub fn is_bypassed(&self) -> bool {
        self.semitones == 0.0
    }

    fn set_semitones(&mut self, semitones: f32) {
        self.semitones = semitones;
        self.ratio = (semitones / 12.0).exp2();
        if self.is_bypassed() {
            self.phase = 0.0;
            self.delay.iter_mut().for_each(|d| d.fill(0.0));
        }
    }

    fn read_tap(line: &[f32], write_pos: usize, delay: f32) -> f32 {
        let pos = write_pos as f32 - delay;
        let pos = if pos < 0.0 { pos + DELAY_LEN as f32 } else { pos };
        let i = pos as usize % DELAY_LEN;
        let frac = pos - pos.floor();
        let a = line[i];
        let b = line[(i + 1) % DELAY_LEN];
        a + (b - a) * frac
    }
}

impl AudioNode for PitchShift {
    type Message = PitchShiftMessage;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = PitchShiftMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                PitchShiftMessage::SetSemitones(st) => self.set_semitones(st),
            }
        }

        let Some(buffers) = inputs.first().map(Input::buffers).filter(|b| !b.is_empty()) else {
            outputs.iter_mut().for_each(|b| b.silence());
            return;
        };

        if self.is_bypassed() {
            for (ch, out) in outputs.iter_mut().enumerate() {
                out.copy_from_slice(&buffers[ch.min(buffers.len() - 1)]);
            }
            return;
        }

        let step = (1.0 - self.ratio) / WINDOW as f32;
        let frames = outputs.first().map(|b| b.len()).unwrap_or(0);
        for i in 0..frames {
            for ch in 0..outputs.len().min(2) {
                self.delay[ch][self.write_pos] = buffers[ch.min(buffers.len() - 1)][i];
            }

            let p1 = self.phase;
            let p2 = (self.phase + 0.5) % 1.0;
            let g1 = {
                let s = (PI * p1).sin();
                s * s
            };
            let g2 = 1.0 - g1;

            for (ch, out) in outputs.iter_mut().enumerate().take(2) {
                let line = &self.delay[ch];
                let a = Self::read_tap(line, self.write_pos, p1 * WINDOW as f32);
                let b = Self::read_tap(line, self.write_pos, p2 * WINDOW as f32);
                out[i] = a * g1 + b * g2;
            }

            self.phase += step;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            } else if self.phase < 0.0 {
                self.phase += 1.0;
            }
            self.write_pos = (self.write_pos + 1) % DELAY_LEN;
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize { 2 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testing::Harness;

    #[test]
    fn zero_semitones_is_bit_exact() {
        let mut n = 0u32;
        let mut h = Harness::new(44100, move || {
            n += 1;
            [n as f32 * 0.001, -(n as f32) * 0.002]
        }, PitchShift::new());
        let (left, right) = h.render(4);
        for (i, (l, r)) in left.iter().zip(right.iter()).enumerate() {
            let n = (i + 1) as f32;
            assert_eq!(*l, n * 0.001);
            assert_eq!(*r, -n * 0.002);
        }
    }

    #[test]
    fn shifted_dc_stays_at_unity_gain() {
        let mut h = Harness::new(44100, || [0.5, 0.5], PitchShift::new());
        h.send(PitchShiftMessage::SetSemitones(7.0));
        // Let the delay line fill before measuring
        h.render(WINDOW * 2 / Buffer::LEN);
        let (left, _) = h.render(8);
        for s in left {
            assert!((s - 0.5).abs() < 1e-3, "{}", s);
        }
    }

    #[test]
    fn back_to_zero_restores_bypass() {
        let mut h = Harness::new(44100, || [0.25, 0.25], PitchShift::new());
        h.send(PitchShiftMessage::SetSemitones(-3.0));
        h.render(4);
        h.send(PitchShiftMessage::SetSemitones(0.0));
        let (left, _) = h.render(1);
        assert!(left.iter().all(|&s| s == 0.25));
    }
}
