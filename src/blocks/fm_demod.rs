//! FM quadrature demodulator with de-emphasis.
//!
//! Recovers the baseband composite from the filtered IQ stream. Gain is
//! chosen so a carrier at exactly `max_dev` deviation demodulates to ±1.0;
//! de-emphasis is the usual single-pole IIR with configurable time constant
//! (τ = 0 bypasses it).

use std::f64::consts::TAU;

use anyhow::Result;
use num_complex::Complex;

use crate::flowgraph::{Block, PortType, StreamData};
use crate::stages::FmDemodStage;

#[derive(Debug, Clone)]
pub struct FmDemod {
    sample_rate: f64,
    max_dev: f64,
    tau: f64,
    gain: f32,
    prev: Complex<f32>,
    /// De-emphasis pole; 0.0 means bypass.
    deemph_pole: f32,
    deemph_state: f32,
}

impl FmDemod {
    pub fn new(sample_rate: f64, max_dev: f64, tau: f64) -> Self {
        let mut demod = Self {
            sample_rate,
            max_dev: 1.0,
            tau: 0.0,
            gain: 1.0,
            prev: Complex::new(1.0, 0.0),
            deemph_pole: 0.0,
            deemph_state: 0.0,
        };
        FmDemodStage::set_max_dev(&mut demod, max_dev);
        FmDemodStage::set_tau(&mut demod, tau);
        demod
    }
}

impl Block for FmDemod {
    fn name(&self) -> &'static str {
        "fm_demod"
    }

    fn input_ports(&self) -> &'static [PortType] {
        &[PortType::Complex]
    }

    fn output_ports(&self) -> &'static [PortType] {
        &[PortType::Float]
    }

    fn work(&mut self, inputs: &mut [StreamData], outputs: &mut [StreamData]) -> Result<()> {
        let input = inputs[0].as_complex();
        let out = outputs[0].as_float_mut();
        out.reserve(input.len());
        for &z in input {
            // Phase increment via z * conj(prev).
            let p = z * self.prev.conj();
            self.prev = z;
            let mut y = p.im.atan2(p.re) * self.gain;
            if self.deemph_pole > 0.0 {
                self.deemph_state =
                    (1.0 - self.deemph_pole) * y + self.deemph_pole * self.deemph_state;
                y = self.deemph_state;
            }
            out.push(y);
        }
        Ok(())
    }
}

impl FmDemodStage for FmDemod {
    fn set_max_dev(&mut self, max_dev_hz: f64) {
        // No range validation here; degenerate deviations are the caller's
        // problem, the guard only keeps the arithmetic finite.
        self.max_dev = max_dev_hz.max(1.0);
        self.gain = (self.sample_rate / (TAU * self.max_dev)) as f32;
    }

    fn set_tau(&mut self, tau: f64) {
        self.tau = tau.max(0.0);
        self.deemph_pole = if self.tau > 0.0 {
            (-1.0 / (self.sample_rate * self.tau)).exp() as f32
        } else {
            0.0
        };
    }
}
