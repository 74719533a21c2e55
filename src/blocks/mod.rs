//! Concrete DSP stages of the receiver chain.

pub mod channel_filter;
pub mod firdes;
pub mod fm_demod;
pub mod meter;
pub mod resampler;
pub mod squelch;
pub mod stereo;

pub use channel_filter::ChannelFilter;
pub use fm_demod::FmDemod;
pub use meter::SignalMeter;
pub use resampler::{ResamplerCc, ResamplerFf};
pub use squelch::Squelch;
pub use stereo::StereoDecoder;
