//! Signal level meter.
//!
//! Terminal stage on a tap off the channel filter: keeps an IIR-smoothed RMS
//! estimate that the control plane can read at any time, linear or in dBFS.

use anyhow::Result;

use crate::flowgraph::{Block, PortType, StreamData};
use crate::stages::MeterStage;

const DB_FLOOR: f32 = -200.0;

#[derive(Debug, Clone)]
pub struct SignalMeter {
    alpha: f32,
    avg_power: f32,
}

impl SignalMeter {
    pub fn new(alpha: f32) -> Self {
        Self { alpha: alpha.clamp(1e-6, 1.0), avg_power: 0.0 }
    }
}

impl Default for SignalMeter {
    fn default() -> Self {
        Self::new(0.001)
    }
}

impl Block for SignalMeter {
    fn name(&self) -> &'static str {
        "signal_meter"
    }

    fn input_ports(&self) -> &'static [PortType] {
        &[PortType::Complex]
    }

    fn output_ports(&self) -> &'static [PortType] {
        &[]
    }

    fn work(&mut self, inputs: &mut [StreamData], _outputs: &mut [StreamData]) -> Result<()> {
        for x in inputs[0].as_complex() {
            self.avg_power = self.alpha * x.norm_sqr() + (1.0 - self.alpha) * self.avg_power;
        }
        Ok(())
    }
}

impl MeterStage for SignalMeter {
    /// Linear RMS amplitude, full scale = 1.0.
    fn level(&self) -> f32 {
        self.avg_power.max(0.0).sqrt()
    }

    /// Mean power in dB relative to full scale.
    fn level_db(&self) -> f32 {
        if self.avg_power <= 0.0 {
            DB_FLOOR
        } else {
            (10.0 * self.avg_power.log10()).max(DB_FLOOR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex;

    fn feed(meter: &mut SignalMeter, amplitude: f32, n: usize) {
        let mut inputs = [StreamData::Complex(vec![Complex::new(amplitude, 0.0); n])];
        meter.work(&mut inputs, &mut []).unwrap();
    }

    #[test]
    fn converges_to_signal_amplitude() {
        let mut meter = SignalMeter::new(0.01);
        feed(&mut meter, 0.5, 2000);
        assert!((meter.level() - 0.5).abs() < 0.01);
        // 0.5 amplitude = 0.25 power = about -6 dBFS
        assert!((meter.level_db() - -6.02).abs() < 0.3);
    }

    #[test]
    fn silence_reads_floor() {
        let meter = SignalMeter::default();
        assert_eq!(meter.level(), 0.0);
        assert_eq!(meter.level_db(), DB_FLOOR);
    }

    #[test]
    fn db_and_linear_readings_are_monotonic() {
        let mut quiet = SignalMeter::new(0.05);
        let mut loud = SignalMeter::new(0.05);
        feed(&mut quiet, 0.1, 500);
        feed(&mut loud, 0.8, 500);
        assert!(loud.level() > quiet.level());
        assert!(loud.level_db() > quiet.level_db());
    }
}
