//! Stereo / mono decoder.
//!
//! Terminal stage consuming the demodulated composite at the intermediate
//! rate and producing two audio channels at the output rate. One type serves
//! both roles: with the `stereo` flag off only the L+R path runs and the two
//! channels are identical; with it on, a 19 kHz pilot PLL drives coherent
//! demodulation of the 38 kHz DSB-SC difference subcarrier and the channels
//! are rebuilt with the L/R matrix.
//!
//! PLL and filter state survive while the stage is disconnected from the
//! graph, so switching stereo off and back on does not wait for pilot
//! re-acquisition.

use std::f64::consts::TAU;

use anyhow::Result;

use crate::blocks::firdes::{self, Fir};
use crate::blocks::resampler::ArbResampler;
use crate::flowgraph::{Block, PortType, StreamData};
use crate::stages::DecoderStage;

const PILOT_FREQ: f64 = 19_000.0;
const AUDIO_CUTOFF: f64 = 15_000.0;

/// Second-order loop tracking the 19 kHz pilot phase.
#[derive(Debug, Clone)]
struct PilotPll {
    phase: f64,
    freq: f64,
    min_freq: f64,
    max_freq: f64,
    alpha: f64,
    beta: f64,
}

impl PilotPll {
    fn new(sample_rate: f64, loop_bw: f64) -> Self {
        let freq = TAU * PILOT_FREQ / sample_rate;
        // Standard critically-damped loop gains.
        let bw = TAU * loop_bw / sample_rate;
        let damping = 0.707;
        let denom = 1.0 + 2.0 * damping * bw + bw * bw;
        Self {
            phase: 0.0,
            freq,
            min_freq: freq * 0.98,
            max_freq: freq * 1.02,
            alpha: 4.0 * damping * bw / denom,
            beta: 4.0 * bw * bw / denom,
        }
    }

    /// Advance by one sample of the band-passed pilot; returns the tracked
    /// pilot phase for that sample.
    fn step(&mut self, pilot: f32) -> f64 {
        let phase = self.phase;
        // Phase detector for a real sinusoidal reference; the double-frequency
        // ripple is absorbed by the loop inertia.
        let err = f64::from(pilot) * phase.cos();
        self.freq = (self.freq + self.beta * err).clamp(self.min_freq, self.max_freq);
        self.phase += self.freq + self.alpha * err;
        if self.phase > TAU {
            self.phase -= TAU;
        }
        phase
    }
}

pub struct StereoDecoder {
    stereo: bool,
    mono_lp: Fir,
    pilot_bp: Fir,
    diff_lp: Fir,
    pll: PilotPll,
    /// Audio-rate converters, one per channel.
    left_rate: ArbResampler<f32>,
    right_rate: ArbResampler<f32>,
}

impl std::fmt::Debug for StereoDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StereoDecoder").field("stereo", &self.stereo).finish_non_exhaustive()
    }
}

impl StereoDecoder {
    /// `input_rate` is the intermediate composite rate, `audio_rate` the
    /// output rate of both channels.
    pub fn new(input_rate: f64, audio_rate: f64, stereo: bool) -> Self {
        let ratio = audio_rate / input_rate;
        Self {
            stereo,
            mono_lp: Fir::new(firdes::low_pass(input_rate, AUDIO_CUTOFF, 4_000.0)),
            pilot_bp: Fir::new(firdes::band_pass(
                input_rate,
                PILOT_FREQ - 400.0,
                PILOT_FREQ + 400.0,
                2_000.0,
            )),
            diff_lp: Fir::new(firdes::low_pass(input_rate, AUDIO_CUTOFF, 4_000.0)),
            pll: PilotPll::new(input_rate, 10.0),
            left_rate: ArbResampler::new(ratio),
            right_rate: ArbResampler::new(ratio),
        }
    }
}

impl Block for StereoDecoder {
    fn name(&self) -> &'static str {
        if self.stereo {
            "stereo_decoder"
        } else {
            "mono_decoder"
        }
    }

    fn input_ports(&self) -> &'static [PortType] {
        &[PortType::Float]
    }

    fn output_ports(&self) -> &'static [PortType] {
        &[PortType::Float, PortType::Float]
    }

    fn work(&mut self, inputs: &mut [StreamData], outputs: &mut [StreamData]) -> Result<()> {
        let composite = inputs[0].as_float();
        if composite.is_empty() {
            return Ok(());
        }

        let mut mono = Vec::new();
        self.mono_lp.process(composite, &mut mono);

        if self.stereo {
            let mut pilot = Vec::new();
            self.pilot_bp.process(composite, &mut pilot);

            // Coherent product demodulation of the 38 kHz subcarrier.
            let mut diff_raw = Vec::with_capacity(composite.len());
            for (&x, &p) in composite.iter().zip(&pilot) {
                let phase = self.pll.step(p);
                diff_raw.push(x * (2.0 * phase).cos() as f32 * 2.0);
            }
            let mut diff = Vec::new();
            self.diff_lp.process(&diff_raw, &mut diff);

            let mut left = Vec::with_capacity(mono.len());
            let mut right = Vec::with_capacity(mono.len());
            for (&m, &s) in mono.iter().zip(&diff) {
                left.push(0.5 * (m + s));
                right.push(0.5 * (m - s));
            }
            self.left_rate.process(&left, outputs[0].as_float_mut());
            self.right_rate.process(&right, outputs[1].as_float_mut());
        } else {
            self.left_rate.process(&mono, outputs[0].as_float_mut());
            self.right_rate.process(&mono, outputs[1].as_float_mut());
        }
        Ok(())
    }
}

impl DecoderStage for StereoDecoder {
    fn is_stereo(&self) -> bool {
        self.stereo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(dec: &mut StereoDecoder, composite: Vec<f32>) -> (Vec<f32>, Vec<f32>) {
        let mut inputs = [StreamData::Float(composite)];
        let mut outputs = [StreamData::empty(PortType::Float), StreamData::empty(PortType::Float)];
        dec.work(&mut inputs, &mut outputs).unwrap();
        let mut it = outputs.into_iter();
        let (Some(StreamData::Float(l)), Some(StreamData::Float(r))) = (it.next(), it.next()) else {
            unreachable!()
        };
        (l, r)
    }

    #[test]
    fn mono_duplicates_channels() {
        let rate = 120_000.0;
        let mut dec = StereoDecoder::new(rate, 48_000.0, false);
        let tone: Vec<f32> =
            (0..24_000).map(|n| (TAU * 1_000.0 * n as f64 / rate).sin() as f32).collect();
        let (l, r) = run(&mut dec, tone);
        assert!(!l.is_empty());
        assert_eq!(l.len(), r.len());
        assert!(l.iter().zip(&r).all(|(a, b)| (a - b).abs() < 1e-6));
    }

    #[test]
    fn output_rate_matches_ratio() {
        let mut dec = StereoDecoder::new(120_000.0, 48_000.0, false);
        let (l, _) = run(&mut dec, vec![0.0; 120_000]);
        let expected = 48_000.0;
        assert!((l.len() as f64 - expected).abs() < expected * 0.01, "got {}", l.len());
    }

    #[test]
    fn stereo_stays_finite_and_balanced_on_mono_composite() {
        // A composite with no pilot and no subcarrier: the stereo decoder
        // should still produce a sane, roughly mono output.
        let rate = 120_000.0;
        let mut dec = StereoDecoder::new(rate, 48_000.0, true);
        let tone: Vec<f32> =
            (0..48_000).map(|n| (0.5 * (TAU * 1_000.0 * n as f64 / rate).sin()) as f32).collect();
        let (l, r) = run(&mut dec, tone);
        assert!(!l.is_empty());
        assert_eq!(l.len(), r.len());
        assert!(l.iter().chain(&r).all(|x| x.is_finite()));
    }

    #[test]
    fn pll_tracks_pilot_frequency() {
        let rate = 120_000.0;
        let mut pll = PilotPll::new(rate, 10.0);
        let mut err_sum = 0.0f64;
        let mut count = 0usize;
        for n in 0..240_000 {
            let truth = TAU * PILOT_FREQ * n as f64 / rate;
            let pilot = (truth).sin() as f32 * 0.1;
            let phase = pll.step(pilot);
            if n > 200_000 {
                // Compare phases modulo 2π.
                let mut d = (phase - truth) % TAU;
                if d > std::f64::consts::PI {
                    d -= TAU;
                }
                if d < -std::f64::consts::PI {
                    d += TAU;
                }
                err_sum += d.abs();
                count += 1;
            }
        }
        let mean_err = err_sum / count as f64;
        assert!(mean_err < 0.5, "mean phase error {mean_err}");
    }
}
