//! Stage capability traits and the factory seam.
//!
//! The receiver controller talks to its stages through these traits rather
//! than concrete DSP types, and builds them through a [`StageFactory`] passed
//! in at construction. Production code uses [`DspStageFactory`]; tests swap
//! in fakes to observe the controller's wiring and parameter propagation.

use std::sync::{Arc, Mutex};

use crate::blocks::{ChannelFilter, FmDemod, ResamplerCc, ResamplerFf, SignalMeter, Squelch, StereoDecoder};
use crate::flowgraph::Block;

/// The input resampler converting the hardware quadrature rate to the fixed
/// reference rate.
pub trait IqResamplerStage: Block {
    /// Set the conversion ratio (output rate / input rate).
    fn set_rate(&mut self, ratio: f64);
    fn rate(&self) -> f64;
}

/// The complex channel filter.
pub trait ChannelFilterStage: Block {
    fn set_param(&mut self, low: f64, high: f64, transition_width: f64);
}

/// The power squelch gate.
pub trait SquelchStage: Block {
    fn set_threshold(&mut self, level_db: f64);
    fn set_alpha(&mut self, alpha: f64);
}

/// The signal level meter.
pub trait MeterStage: Block {
    fn level(&self) -> f32;
    fn level_db(&self) -> f32;
}

/// The FM demodulator.
pub trait FmDemodStage: Block {
    fn set_max_dev(&mut self, max_dev_hz: f64);
    fn set_tau(&mut self, tau: f64);
}

/// The mid-rate resampler feeding the decoders.
pub trait AudioResamplerStage: Block {
    fn set_rate(&mut self, ratio: f64);
    fn rate(&self) -> f64;
}

/// A terminal decoder producing two audio channels.
pub trait DecoderStage: Block {
    fn is_stereo(&self) -> bool;
}

/// Builds the receiver's DSP stages.
pub trait StageFactory {
    fn iq_resampler(&self, ratio: f64) -> Arc<Mutex<dyn IqResamplerStage>>;
    fn channel_filter(&self, rate: f64, low: f64, high: f64, tw: f64) -> Arc<Mutex<dyn ChannelFilterStage>>;
    fn squelch(&self, level_db: f64, alpha: f64) -> Arc<Mutex<dyn SquelchStage>>;
    fn meter(&self) -> Arc<Mutex<dyn MeterStage>>;
    fn fm_demod(&self, rate: f64, max_dev_hz: f64, tau: f64) -> Arc<Mutex<dyn FmDemodStage>>;
    fn mid_resampler(&self, ratio: f64) -> Arc<Mutex<dyn AudioResamplerStage>>;
    fn decoder(&self, input_rate: f64, audio_rate: f64, stereo: bool) -> Arc<Mutex<dyn DecoderStage>>;
}

/// Factory producing the real DSP stages from [`crate::blocks`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DspStageFactory;

impl StageFactory for DspStageFactory {
    fn iq_resampler(&self, ratio: f64) -> Arc<Mutex<dyn IqResamplerStage>> {
        Arc::new(Mutex::new(ResamplerCc::new(ratio)))
    }

    fn channel_filter(&self, rate: f64, low: f64, high: f64, tw: f64) -> Arc<Mutex<dyn ChannelFilterStage>> {
        Arc::new(Mutex::new(ChannelFilter::new(rate, low, high, tw)))
    }

    fn squelch(&self, level_db: f64, alpha: f64) -> Arc<Mutex<dyn SquelchStage>> {
        Arc::new(Mutex::new(Squelch::new(level_db, alpha)))
    }

    fn meter(&self) -> Arc<Mutex<dyn MeterStage>> {
        Arc::new(Mutex::new(SignalMeter::default()))
    }

    fn fm_demod(&self, rate: f64, max_dev_hz: f64, tau: f64) -> Arc<Mutex<dyn FmDemodStage>> {
        Arc::new(Mutex::new(FmDemod::new(rate, max_dev_hz, tau)))
    }

    fn mid_resampler(&self, ratio: f64) -> Arc<Mutex<dyn AudioResamplerStage>> {
        Arc::new(Mutex::new(ResamplerFf::new(ratio)))
    }

    fn decoder(&self, input_rate: f64, audio_rate: f64, stereo: bool) -> Arc<Mutex<dyn DecoderStage>> {
        Arc::new(Mutex::new(StereoDecoder::new(input_rate, audio_rate, stereo)))
    }
}
