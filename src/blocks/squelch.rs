//! Power squelch.
//!
//! Gates the IQ stream on a smoothed power estimate: below the threshold the
//! output is muted to exact zeros so downstream stages see silence instead of
//! channel noise.

use anyhow::Result;

use crate::flowgraph::{Block, PortType, StreamData};
use crate::stages::SquelchStage;

#[derive(Debug, Clone)]
pub struct Squelch {
    threshold_db: f64,
    /// Linear power threshold derived from `threshold_db`.
    threshold: f64,
    /// Single-pole smoothing coefficient for the power estimate.
    alpha: f64,
    avg_power: f64,
}

impl Squelch {
    pub fn new(threshold_db: f64, alpha: f64) -> Self {
        let mut s = Self { threshold_db, threshold: 0.0, alpha: 0.0, avg_power: 0.0 };
        SquelchStage::set_threshold(&mut s, threshold_db);
        SquelchStage::set_alpha(&mut s, alpha);
        s
    }

    pub fn threshold_db(&self) -> f64 {
        self.threshold_db
    }
}

impl Block for Squelch {
    fn name(&self) -> &'static str {
        "squelch"
    }

    fn input_ports(&self) -> &'static [PortType] {
        &[PortType::Complex]
    }

    fn output_ports(&self) -> &'static [PortType] {
        &[PortType::Complex]
    }

    fn work(&mut self, inputs: &mut [StreamData], outputs: &mut [StreamData]) -> Result<()> {
        let input = inputs[0].as_complex();
        let out = outputs[0].as_complex_mut();
        out.reserve(input.len());
        for &x in input {
            self.avg_power =
                self.alpha * f64::from(x.norm_sqr()) + (1.0 - self.alpha) * self.avg_power;
            out.push(if self.avg_power >= self.threshold { x } else { num_complex::Complex::new(0.0, 0.0) });
        }
        Ok(())
    }
}

impl SquelchStage for Squelch {
    fn set_threshold(&mut self, level_db: f64) {
        self.threshold_db = level_db;
        self.threshold = 10.0f64.powf(level_db / 10.0);
    }

    fn set_alpha(&mut self, alpha: f64) {
        self.alpha = alpha.clamp(1e-6, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex;

    fn run(sq: &mut Squelch, samples: Vec<Complex<f32>>) -> Vec<Complex<f32>> {
        let mut inputs = [StreamData::Complex(samples)];
        let mut outputs = [StreamData::empty(PortType::Complex)];
        sq.work(&mut inputs, &mut outputs).unwrap();
        match outputs.into_iter().next() {
            Some(StreamData::Complex(v)) => v,
            _ => unreachable!(),
        }
    }

    #[test]
    fn loud_signal_passes() {
        let mut sq = Squelch::new(-40.0, 0.1);
        let out = run(&mut sq, vec![Complex::new(0.5, 0.0); 200]);
        // After the power estimate converges the gate is open.
        assert!(out[100..].iter().all(|x| x.re > 0.0));
    }

    #[test]
    fn quiet_signal_is_muted() {
        let mut sq = Squelch::new(-40.0, 0.1);
        let out = run(&mut sq, vec![Complex::new(1e-4, 0.0); 200]);
        assert!(out.iter().all(|x| x.norm() == 0.0));
    }

    #[test]
    fn threshold_update_reopens_gate() {
        let mut sq = Squelch::new(-20.0, 0.5);
        let quietish = vec![Complex::new(0.01, 0.0); 100]; // -40 dBFS
        assert!(run(&mut sq, quietish.clone()).iter().all(|x| x.norm() == 0.0));
        sq.set_threshold(-60.0);
        assert!(run(&mut sq, quietish)[10..].iter().any(|x| x.norm() > 0.0));
    }
}
