//! Arbitrary-ratio resampler (complex and real variants).
//!
//! Cubic Catmull-Rom interpolation over a four-sample history, so any
//! conversion ratio works without deriving a rational approximation. Good
//! enough for the receiver chain, where the signal has already been band
//! limited by the stage in front of the resampler.

use std::ops::{Add, Mul, Sub};

use anyhow::Result;
use num_complex::Complex;

use crate::flowgraph::{Block, PortType, StreamData};
use crate::stages::{AudioResamplerStage, IqResamplerStage};

/// Shared interpolation core, generic over the sample type. Also serves as
/// the stereo decoder's per-channel audio-rate converter.
#[derive(Debug, Clone)]
pub(crate) struct ArbResampler<T> {
    /// Output rate / input rate.
    ratio: f64,
    /// Fractional position between history[1] and history[2].
    mu: f64,
    history: [T; 4],
    consumed: u64,
}

impl<T> ArbResampler<T>
where
    T: Copy + Default + Add<Output = T> + Sub<Output = T> + Mul<f32, Output = T>,
{
    pub(crate) fn new(ratio: f64) -> Self {
        Self { ratio: ratio.clamp(0.001, 1000.0), mu: 0.0, history: [T::default(); 4], consumed: 0 }
    }

    /// Change the ratio. Interpolation history is preserved so a live rate
    /// change does not glitch the stream.
    fn set_ratio(&mut self, ratio: f64) {
        self.ratio = ratio.clamp(0.001, 1000.0);
    }

    fn ratio(&self) -> f64 {
        self.ratio
    }

    pub(crate) fn process(&mut self, input: &[T], output: &mut Vec<T>) {
        output.reserve((input.len() as f64 * self.ratio) as usize + 2);
        let step = 1.0 / self.ratio;
        for &sample in input {
            self.history[0] = self.history[1];
            self.history[1] = self.history[2];
            self.history[2] = self.history[3];
            self.history[3] = sample;
            self.consumed += 1;

            while self.mu < 1.0 {
                if self.consumed >= 4 {
                    output.push(interpolate(&self.history, self.mu as f32));
                }
                self.mu += step;
            }
            self.mu -= 1.0;
        }
    }
}

/// Catmull-Rom cubic between `h[1]` and `h[2]`.
fn interpolate<T>(h: &[T; 4], mu: f32) -> T
where
    T: Copy + Add<Output = T> + Sub<Output = T> + Mul<f32, Output = T>,
{
    let a = (h[1] - h[2]) * 1.5 + (h[3] - h[0]) * 0.5;
    let b = h[0] - h[1] * 2.5 + h[2] * 2.0 - h[3] * 0.5;
    let c = (h[2] - h[0]) * 0.5;
    ((a * mu + b) * mu + c) * mu + h[1]
}

/// Complex (IQ) resampler stage.
#[derive(Debug, Clone)]
pub struct ResamplerCc {
    core: ArbResampler<Complex<f32>>,
}

impl ResamplerCc {
    /// `ratio` is output rate / input rate.
    pub fn new(ratio: f64) -> Self {
        Self { core: ArbResampler::new(ratio) }
    }
}

impl Block for ResamplerCc {
    fn name(&self) -> &'static str {
        "resampler_cc"
    }

    fn input_ports(&self) -> &'static [PortType] {
        &[PortType::Complex]
    }

    fn output_ports(&self) -> &'static [PortType] {
        &[PortType::Complex]
    }

    fn work(&mut self, inputs: &mut [StreamData], outputs: &mut [StreamData]) -> Result<()> {
        self.core.process(inputs[0].as_complex(), outputs[0].as_complex_mut());
        Ok(())
    }
}

impl IqResamplerStage for ResamplerCc {
    fn set_rate(&mut self, ratio: f64) {
        self.core.set_ratio(ratio);
    }

    fn rate(&self) -> f64 {
        self.core.ratio()
    }
}

/// Real-valued resampler stage (demodulated composite, audio).
#[derive(Debug, Clone)]
pub struct ResamplerFf {
    core: ArbResampler<f32>,
}

impl ResamplerFf {
    /// `ratio` is output rate / input rate.
    pub fn new(ratio: f64) -> Self {
        Self { core: ArbResampler::new(ratio) }
    }
}

impl Block for ResamplerFf {
    fn name(&self) -> &'static str {
        "resampler_ff"
    }

    fn input_ports(&self) -> &'static [PortType] {
        &[PortType::Float]
    }

    fn output_ports(&self) -> &'static [PortType] {
        &[PortType::Float]
    }

    fn work(&mut self, inputs: &mut [StreamData], outputs: &mut [StreamData]) -> Result<()> {
        self.core.process(inputs[0].as_float(), outputs[0].as_float_mut());
        Ok(())
    }
}

impl AudioResamplerStage for ResamplerFf {
    fn set_rate(&mut self, ratio: f64) {
        self.core.set_ratio(ratio);
    }

    fn rate(&self) -> f64 {
        self.core.ratio()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsample_halves_output_length() {
        let mut rr = ArbResampler::<f32>::new(0.5);
        let input: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let mut out = Vec::new();
        rr.process(&input, &mut out);
        assert!((out.len() as i64 - 500).abs() <= 4, "got {} samples", out.len());
    }

    #[test]
    fn upsample_doubles_output_length() {
        let mut rr = ArbResampler::<f32>::new(2.0);
        let input: Vec<f32> = (0..500).map(|i| (i as f32 * 0.01).sin()).collect();
        let mut out = Vec::new();
        rr.process(&input, &mut out);
        // History priming suppresses the first three input positions, so up
        // to ratio * 4 outputs go missing at startup.
        let missing = 1000 - out.len() as i64;
        assert!((0..=8).contains(&missing), "got {} samples", out.len());
    }

    #[test]
    fn ramp_stays_monotonic_through_resampling() {
        let mut rr = ArbResampler::<f32>::new(0.24);
        let input: Vec<f32> = (0..2000).map(|i| i as f32).collect();
        let mut out = Vec::new();
        rr.process(&input, &mut out);
        assert!(out.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn set_ratio_applies_to_subsequent_input() {
        let mut rr = ResamplerCc::new(1.0);
        assert!((IqResamplerStage::rate(&rr) - 1.0).abs() < 1e-12);
        rr.set_rate(0.24);
        assert!((IqResamplerStage::rate(&rr) - 0.24).abs() < 1e-12);

        let input = vec![Complex::new(1.0f32, 0.0); 1000];
        let mut inputs = [StreamData::Complex(input)];
        let mut outputs = [StreamData::empty(PortType::Complex)];
        rr.work(&mut inputs, &mut outputs).unwrap();
        assert!((outputs[0].len() as i64 - 240).abs() <= 4);
    }
}
