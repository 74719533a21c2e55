//! Complex channel filter.
//!
//! Band-pass with independently adjustable low/high cutoff and transition
//! width, applied as overlap-save fast convolution. The tap set is a
//! windowed-sinc low-pass prototype rotated to the passband center, so an
//! asymmetric passband (SSB-style) costs nothing extra.

use std::sync::Arc;

use anyhow::Result;
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::blocks::firdes;
use crate::flowgraph::{Block, PortType, StreamData};
use crate::stages::ChannelFilterStage;

pub struct ChannelFilter {
    sample_rate: f64,
    low: f64,
    high: f64,
    transition_width: f64,

    planner: FftPlanner<f32>,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    ntaps: usize,
    /// Frequency response of the taps, zero-padded to `fft_size`.
    taps_freq: Vec<Complex<f32>>,
    /// Input accumulator, primed with `ntaps - 1` zeros of overlap.
    inbuf: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl std::fmt::Debug for ChannelFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelFilter")
            .field("sample_rate", &self.sample_rate)
            .field("low", &self.low)
            .field("high", &self.high)
            .field("transition_width", &self.transition_width)
            .field("ntaps", &self.ntaps)
            .field("fft_size", &self.fft_size)
            .finish_non_exhaustive()
    }
}

impl ChannelFilter {
    pub fn new(sample_rate: f64, low: f64, high: f64, transition_width: f64) -> Self {
        let mut planner = FftPlanner::new();
        // Placeholder plans; `redesign` replaces them right away.
        let fft = planner.plan_fft_forward(16);
        let ifft = planner.plan_fft_inverse(16);
        let mut filter = Self {
            sample_rate,
            low,
            high,
            transition_width,
            planner,
            fft,
            ifft,
            fft_size: 16,
            ntaps: 1,
            taps_freq: Vec::new(),
            inbuf: Vec::new(),
            scratch: Vec::new(),
        };
        filter.redesign();
        filter
    }

    /// Rebuild taps and FFT plans from the current passband parameters.
    fn redesign(&mut self) {
        let taps = firdes::complex_band_pass(self.sample_rate, self.low, self.high, self.transition_width);
        self.ntaps = taps.len();
        self.fft_size = (4 * self.ntaps).next_power_of_two().max(256);

        self.fft = self.planner.plan_fft_forward(self.fft_size);
        self.ifft = self.planner.plan_fft_inverse(self.fft_size);

        let mut padded = vec![Complex::new(0.0, 0.0); self.fft_size];
        padded[..self.ntaps].copy_from_slice(&taps);
        self.fft.process(&mut padded);
        self.taps_freq = padded;

        // Restart the overlap; one transient frame on a parameter change.
        self.inbuf.clear();
        self.inbuf.resize(self.ntaps - 1, Complex::new(0.0, 0.0));
        self.scratch = vec![Complex::new(0.0, 0.0); self.fft_size];
    }

    fn filter_into(&mut self, input: &[Complex<f32>], output: &mut Vec<Complex<f32>>) {
        self.inbuf.extend_from_slice(input);
        let step = self.fft_size - (self.ntaps - 1);
        let scale = 1.0 / self.fft_size as f32;
        while self.inbuf.len() >= self.fft_size {
            self.scratch.copy_from_slice(&self.inbuf[..self.fft_size]);
            self.fft.process(&mut self.scratch);
            for (x, h) in self.scratch.iter_mut().zip(&self.taps_freq) {
                *x *= h;
            }
            self.ifft.process(&mut self.scratch);
            output.extend(self.scratch[self.ntaps - 1..].iter().map(|x| *x * scale));
            self.inbuf.drain(..step);
        }
    }
}

impl Block for ChannelFilter {
    fn name(&self) -> &'static str {
        "channel_filter"
    }

    fn input_ports(&self) -> &'static [PortType] {
        &[PortType::Complex]
    }

    fn output_ports(&self) -> &'static [PortType] {
        &[PortType::Complex]
    }

    fn work(&mut self, inputs: &mut [StreamData], outputs: &mut [StreamData]) -> Result<()> {
        let input = std::mem::take(inputs[0].as_complex_mut());
        self.filter_into(&input, outputs[0].as_complex_mut());
        Ok(())
    }
}

impl ChannelFilterStage for ChannelFilter {
    fn set_param(&mut self, low: f64, high: f64, transition_width: f64) {
        if low >= high {
            log::warn!("rejecting channel filter update: low {low} >= high {high}");
            return;
        }
        let nyquist = self.sample_rate / 2.0;
        self.low = low.max(-nyquist);
        self.high = high.min(nyquist);
        self.transition_width = transition_width.max(1.0);
        self.redesign();
        log::debug!(
            "channel filter redesigned: {:.0}..{:.0} Hz, tw {:.0} Hz, {} taps",
            self.low,
            self.high,
            self.transition_width,
            self.ntaps
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn tone(rate: f64, freq: f64, n: usize) -> Vec<Complex<f32>> {
        (0..n)
            .map(|i| {
                let phase = TAU * freq * i as f64 / rate;
                Complex::new(phase.cos() as f32, phase.sin() as f32)
            })
            .collect()
    }

    fn rms(x: &[Complex<f32>]) -> f32 {
        (x.iter().map(|v| v.norm_sqr()).sum::<f32>() / x.len() as f32).sqrt()
    }

    #[test]
    fn passband_tone_survives() {
        let rate = 240_000.0;
        let mut f = ChannelFilter::new(rate, -80_000.0, 80_000.0, 20_000.0);
        let mut out = Vec::new();
        f.filter_into(&tone(rate, 10_000.0, 16_384), &mut out);
        assert!(!out.is_empty());
        let settled = &out[1024..];
        let level = rms(settled);
        assert!((level - 1.0).abs() < 0.1, "passband rms {level}");
    }

    #[test]
    fn stopband_tone_is_rejected() {
        let rate = 240_000.0;
        let mut f = ChannelFilter::new(rate, -80_000.0, 80_000.0, 20_000.0);
        let mut out = Vec::new();
        f.filter_into(&tone(rate, 110_000.0, 16_384), &mut out);
        let settled = &out[1024..];
        let level = rms(settled);
        assert!(level < 0.05, "stopband rms {level}");
    }

    #[test]
    fn narrowed_passband_rejects_former_passband_tone() {
        let rate = 240_000.0;
        let mut f = ChannelFilter::new(rate, -80_000.0, 80_000.0, 20_000.0);
        f.set_param(-10_000.0, 10_000.0, 5_000.0);
        let mut out = Vec::new();
        f.filter_into(&tone(rate, 50_000.0, 32_768), &mut out);
        let settled = &out[4096..];
        assert!(rms(settled) < 0.05);
    }

    #[test]
    fn invalid_passband_is_ignored() {
        let rate = 240_000.0;
        let mut f = ChannelFilter::new(rate, -80_000.0, 80_000.0, 20_000.0);
        let ntaps = f.ntaps;
        f.set_param(10_000.0, -10_000.0, 5_000.0);
        assert_eq!(f.ntaps, ntaps);
        assert!((f.low - -80_000.0).abs() < 1e-9);
    }
}
