//! Windowed-sinc FIR design (Hamming) and a direct-form real FIR.

use std::f64::consts::PI;

use num_complex::Complex;

/// Tap count for a Hamming window with the given transition width, forced odd.
fn num_taps(rate: f64, transition_width: f64) -> usize {
    let tw = transition_width.max(rate * 1e-4);
    let n = (3.3 * rate / tw).ceil() as usize;
    (n | 1).clamp(11, 4097)
}

fn hamming(n: usize, ntaps: usize) -> f64 {
    0.54 - 0.46 * (2.0 * PI * n as f64 / (ntaps - 1) as f64).cos()
}

/// Low-pass prototype with unit DC gain.
pub fn low_pass(rate: f64, cutoff: f64, transition_width: f64) -> Vec<f32> {
    let ntaps = num_taps(rate, transition_width);
    let fc = (cutoff / rate).clamp(1e-6, 0.5);
    let m = (ntaps - 1) as f64 / 2.0;
    let mut taps: Vec<f64> = (0..ntaps)
        .map(|n| {
            let x = n as f64 - m;
            let sinc = if x == 0.0 {
                2.0 * fc
            } else {
                (2.0 * PI * fc * x).sin() / (PI * x)
            };
            sinc * hamming(n, ntaps)
        })
        .collect();
    let sum: f64 = taps.iter().sum();
    for t in &mut taps {
        *t /= sum;
    }
    taps.into_iter().map(|t| t as f32).collect()
}

/// Real band-pass: low-pass prototype of half the passband width, shifted to
/// the band center. Unit gain at the center frequency.
pub fn band_pass(rate: f64, low: f64, high: f64, transition_width: f64) -> Vec<f32> {
    let center = (low + high) / 2.0;
    let half = ((high - low) / 2.0).max(1.0);
    let proto = low_pass(rate, half, transition_width);
    let m = (proto.len() - 1) as f64 / 2.0;
    proto
        .iter()
        .enumerate()
        .map(|(n, &t)| {
            let phase = 2.0 * PI * center / rate * (n as f64 - m);
            2.0 * t * phase.cos() as f32
        })
        .collect()
}

/// Complex band-pass: low-pass prototype rotated to the (possibly
/// asymmetric) passband center. This is the channel filter's tap set.
pub fn complex_band_pass(rate: f64, low: f64, high: f64, transition_width: f64) -> Vec<Complex<f32>> {
    let center = (low + high) / 2.0;
    let half = ((high - low) / 2.0).max(1.0);
    let proto = low_pass(rate, half, transition_width);
    let m = (proto.len() - 1) as f64 / 2.0;
    proto
        .iter()
        .enumerate()
        .map(|(n, &t)| {
            let phase = 2.0 * PI * center / rate * (n as f64 - m);
            Complex::new(t * phase.cos() as f32, t * phase.sin() as f32)
        })
        .collect()
}

/// Direct-form real FIR with an internal delay line. Fine for the short
/// audio-rate filters; the wideband channel filter uses the FFT path instead.
#[derive(Debug, Clone)]
pub struct Fir {
    taps: Vec<f32>,
    delay: Vec<f32>,
    idx: usize,
}

impl Fir {
    pub fn new(taps: Vec<f32>) -> Self {
        let n = taps.len().max(1);
        Self { taps, delay: vec![0.0; n], idx: 0 }
    }

    /// Filter `input`, appending to `output`.
    pub fn process(&mut self, input: &[f32], output: &mut Vec<f32>) {
        let n = self.delay.len();
        output.reserve(input.len());
        for &x in input {
            self.delay[self.idx] = x;
            let mut acc = 0.0f32;
            for (k, &t) in self.taps.iter().enumerate() {
                acc += t * self.delay[(self.idx + n - k) % n];
            }
            self.idx = (self.idx + 1) % n;
            output.push(acc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_pass_has_unit_dc_gain() {
        let taps = low_pass(48_000.0, 5_000.0, 2_000.0);
        let sum: f32 = taps.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert_eq!(taps.len() % 2, 1);
    }

    #[test]
    fn low_pass_attenuates_stopband_tone() {
        let rate = 48_000.0;
        let mut fir = Fir::new(low_pass(rate, 3_000.0, 1_500.0));
        let tone: Vec<f32> =
            (0..4096).map(|n| (2.0 * std::f32::consts::PI * 15_000.0 * n as f32 / rate as f32).sin()).collect();
        let mut out = Vec::new();
        fir.process(&tone, &mut out);
        let rms = (out[500..].iter().map(|x| x * x).sum::<f32>() / (out.len() - 500) as f32).sqrt();
        assert!(rms < 0.02, "stopband rms {rms}");
    }

    #[test]
    fn complex_band_pass_passes_center_tone() {
        let rate = 240_000.0;
        let taps = complex_band_pass(rate, -80_000.0, 80_000.0, 20_000.0);
        // DC sits at the band center here, so the tap sum is the center gain.
        let gain: Complex<f32> = taps.iter().sum();
        assert!((gain.norm() - 1.0).abs() < 0.05, "center gain {}", gain.norm());
    }
}
