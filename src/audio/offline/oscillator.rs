//! Anti-aliased oscillators using PolyBLEP.

use std::f64::consts::PI;

use crate::sequence::Waveform;

/// Phase accumulator for one oscillator node. The frequency is supplied
/// per sample since it is an automatable parameter.
#[derive(Debug, Clone)]
pub struct Oscillator {
    pub waveform: Waveform,
    phase: f64,
    sample_rate: f64,
}

impl Oscillator {
    pub fn new(waveform: Waveform, sample_rate: f64) -> Self {
        Oscillator {
            waveform,
            phase: 0.0,
            sample_rate,
        }
    }

    /// Generate the next sample at `frequency` Hz.
    pub fn next_sample(&mut self, frequency: f64) -> f64 {
        let inc = (frequency / self.sample_rate).clamp(0.0, 0.5);
        let sample = match self.waveform {
            Waveform::Sine => (2.0 * PI * self.phase).sin(),
            Waveform::Sawtooth => {
                let naive = 2.0 * self.phase - 1.0;
                naive - poly_blep(self.phase, inc)
            }
            Waveform::Square => self.square(inc),
            Waveform::Triangle => {
                if self.phase < 0.5 {
                    4.0 * self.phase - 1.0
                } else {
                    3.0 - 4.0 * self.phase
                }
            }
        };

        self.phase += inc;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        sample
    }

    fn square(&self, inc: f64) -> f64 {
        let mut value = if self.phase < 0.5 { 1.0 } else { -1.0 };
        value += poly_blep(self.phase, inc);
        value -= poly_blep((self.phase + 0.5) % 1.0, inc);
        value
    }
}

/// PolyBLEP correction around a discontinuity.
///
/// `t` is the phase in [0, 1), `dt` the phase increment per sample.
fn poly_blep(t: f64, dt: f64) -> f64 {
    if dt <= 0.0 {
        0.0
    } else if t < dt {
        let t = t / dt;
        2.0 * t - t * t - 1.0
    } else if t > 1.0 - dt {
        let t = (t - 1.0) / dt;
        t * t + 2.0 * t + 1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_zero_at_start() {
        let mut osc = Oscillator::new(Waveform::Sine, 44100.0);
        let sample = osc.next_sample(440.0);
        assert!(sample.abs() < 1e-10, "Sine should start near 0, got {sample}");
    }

    #[test]
    fn every_shape_stays_in_range() {
        for waveform in Waveform::ALL {
            let mut osc = Oscillator::new(waveform, 44100.0);
            for _ in 0..44100 {
                let s = osc.next_sample(440.0);
                assert!((-1.5..=1.5).contains(&s), "{waveform:?} out of range: {s}");
            }
        }
    }

    #[test]
    fn square_is_bipolar() {
        let mut osc = Oscillator::new(Waveform::Square, 1000.0);
        let samples: Vec<f64> = (0..1000).map(|_| osc.next_sample(4.0)).collect();
        assert!(samples.iter().any(|s| *s > 0.9));
        assert!(samples.iter().any(|s| *s < -0.9));
    }

    #[test]
    fn zero_frequency_holds_phase() {
        let mut osc = Oscillator::new(Waveform::Sawtooth, 8000.0);
        let first = osc.next_sample(0.0);
        let second = osc.next_sample(0.0);
        assert_eq!(first, second);
    }
}
