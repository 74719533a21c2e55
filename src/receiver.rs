//! Wideband FM receiver controller.
//!
//! Owns every stage of the demodulation chain, wires them into a fixed
//! topology with one reconfigurable junction (the mono/stereo decoder), and
//! exposes the live parameter-setting contract. The chain:
//!
//! ```text
//! iq_source -> iq_resamp -> channel_filter -+-> signal_meter
//!                                           `-> squelch -> fm_demod
//!                  -> mid_resamp -> (mono_decoder | stereo_decoder) -> audio_sink
//! ```
//!
//! The controller is the control plane. Sample processing runs elsewhere
//! (see [`crate::flowgraph::StreamRunner`]) and is synchronized against only
//! where topology actually changes: decoder rewiring and resampling-ratio
//! updates take the graph lock, everything else is a plain stage-level
//! parameter store.

use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::flowgraph::{AudioSink, ChannelPort, Flowgraph, IqSource, NodeId};
use crate::stages::{
    ChannelFilterStage, DspStageFactory, FmDemodStage, IqResamplerStage, MeterStage, SquelchStage,
    StageFactory,
};

/// Fixed internal rate of the channel filter and FM demodulator.
/// Nominal WFM channel spacing is 200 kHz.
pub const PREF_QUAD_RATE: f64 = 240_000.0;

/// Fixed intermediate rate consumed by the stereo/mono decoders.
pub const PREF_MID_RATE: f64 = 120_000.0;

/// Quad-rate changes smaller than this are floating-point noise and ignored.
const RATE_EPSILON_HZ: f64 = 0.5;

/// Demodulation mode: which terminal decoder is wired into the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WfmDemod {
    Mono = 0,
    Stereo = 1,
    /// Regional stereo pilot variant; currently wired identically to
    /// [`WfmDemod::Stereo`].
    StereoUkw = 2,
}

impl WfmDemod {
    /// Number of known modes.
    pub const NUM: i32 = 3;

    fn from_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(Self::Mono),
            1 => Some(Self::Stereo),
            2 => Some(Self::StereoUkw),
            _ => None,
        }
    }
}

/// The WFM receiver: controller and owner of the signal chain.
pub struct WfmReceiver {
    quad_rate: f64,
    audio_rate: f64,
    running: bool,
    demod: WfmDemod,

    graph: Arc<Flowgraph>,
    source: Arc<Mutex<IqSource>>,
    sink: Arc<Mutex<AudioSink>>,

    iq_resamp: Arc<Mutex<dyn IqResamplerStage>>,
    filter: Arc<Mutex<dyn ChannelFilterStage>>,
    sql: Arc<Mutex<dyn SquelchStage>>,
    meter: Arc<Mutex<dyn MeterStage>>,
    demod_fm: Arc<Mutex<dyn FmDemodStage>>,

    n_mid: NodeId,
    n_mono: NodeId,
    n_stereo: NodeId,
    n_sink: NodeId,
}

impl fmt::Debug for WfmReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WfmReceiver")
            .field("quad_rate", &self.quad_rate)
            .field("audio_rate", &self.audio_rate)
            .field("running", &self.running)
            .field("demod", &self.demod)
            .finish_non_exhaustive()
    }
}

impl WfmReceiver {
    /// Build a receiver with the real DSP stages.
    pub fn new(quad_rate: f64, audio_rate: f64) -> Result<Self> {
        Self::with_factory(quad_rate, audio_rate, &DspStageFactory)
    }

    /// Build a receiver with injected stages. The chain starts in
    /// [`WfmDemod::Mono`]; both decoders exist for the controller's whole
    /// lifetime so a live mode switch never allocates.
    pub fn with_factory(quad_rate: f64, audio_rate: f64, factory: &dyn StageFactory) -> Result<Self> {
        let iq_resamp = factory.iq_resampler(PREF_QUAD_RATE / quad_rate);
        let filter = factory.channel_filter(PREF_QUAD_RATE, -80_000.0, 80_000.0, 20_000.0);
        let sql = factory.squelch(-150.0, 0.001);
        let meter = factory.meter();
        let demod_fm = factory.fm_demod(PREF_QUAD_RATE, 75_000.0, 50e-6);
        let mid_resamp = factory.mid_resampler(PREF_MID_RATE / PREF_QUAD_RATE);
        let stereo = factory.decoder(PREF_MID_RATE, audio_rate, true);
        let mono = factory.decoder(PREF_MID_RATE, audio_rate, false);

        let source = Arc::new(Mutex::new(IqSource::new()));
        let sink = Arc::new(Mutex::new(AudioSink::new()));

        let mut graph = Flowgraph::new();
        let n_source = graph.add_block(Arc::clone(&source));
        let n_iq = graph.add_block(Arc::clone(&iq_resamp));
        let n_filter = graph.add_block(Arc::clone(&filter));
        let n_meter = graph.add_block(Arc::clone(&meter));
        let n_sql = graph.add_block(Arc::clone(&sql));
        let n_demod = graph.add_block(Arc::clone(&demod_fm));
        let n_mid = graph.add_block(mid_resamp);
        let n_stereo = graph.add_block(stereo);
        let n_mono = graph.add_block(mono);
        let n_sink = graph.add_block(Arc::clone(&sink));

        graph.connect(n_source, 0, n_iq, 0)?;
        graph.connect(n_iq, 0, n_filter, 0)?;
        graph.connect(n_filter, 0, n_meter, 0)?;
        graph.connect(n_filter, 0, n_sql, 0)?;
        graph.connect(n_sql, 0, n_demod, 0)?;
        graph.connect(n_demod, 0, n_mid, 0)?;
        graph.connect(n_mid, 0, n_mono, 0)?;
        graph.connect(n_mono, 0, n_sink, 0)?; // left channel
        graph.connect(n_mono, 1, n_sink, 1)?; // right channel

        Ok(Self {
            quad_rate,
            audio_rate,
            running: false,
            demod: WfmDemod::Mono,
            graph: Arc::new(graph),
            source,
            sink,
            iq_resamp,
            filter,
            sql,
            meter,
            demod_fm,
            n_mid,
            n_mono,
            n_stereo,
            n_sink,
        })
    }

    /// Mark the receiver running. Idempotent; the streaming engine itself is
    /// started and stopped by the environment that owns it.
    pub fn start(&mut self) -> bool {
        self.running = true;
        true
    }

    /// Mark the receiver stopped. Idempotent.
    pub fn stop(&mut self) -> bool {
        self.running = false;
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn demod(&self) -> WfmDemod {
        self.demod
    }

    pub fn quad_rate(&self) -> f64 {
        self.quad_rate
    }

    pub fn audio_rate(&self) -> f64 {
        self.audio_rate
    }

    /// Current input resampling ratio (reference rate / quad rate).
    pub fn iq_resampler_ratio(&self) -> f64 {
        self.iq_resamp.lock().unwrap().rate()
    }

    /// Data-plane handle for the streaming engine.
    pub fn port(&self) -> ChannelPort {
        ChannelPort::new(Arc::clone(&self.graph), Arc::clone(&self.source), Arc::clone(&self.sink))
    }

    /// Adjust for a changed hardware sample rate. Ignores sub-epsilon changes
    /// so floating-point noise from the device layer never perturbs the
    /// resampler; a real change updates the ratio under the graph lock.
    pub fn set_quad_rate(&mut self, quad_rate: f64) {
        if (self.quad_rate - quad_rate).abs() > RATE_EPSILON_HZ {
            log::info!("changing WFM quad rate: {} -> {}", self.quad_rate, quad_rate);
            self.quad_rate = quad_rate;
            let _guard = self.graph.lock();
            self.iq_resamp.lock().unwrap().set_rate(PREF_QUAD_RATE / self.quad_rate);
        }
    }

    /// The audio output rate is fixed at construction time.
    pub fn set_audio_rate(&mut self, _audio_rate: f64) {}

    /// Update the channel filter passband.
    pub fn set_filter(&mut self, low: f64, high: f64, transition_width: f64) {
        self.filter.lock().unwrap().set_param(low, high, transition_width);
    }

    /// Update the squelch threshold in dB.
    pub fn set_sql_level(&mut self, level_db: f64) {
        self.sql.lock().unwrap().set_threshold(level_db);
    }

    /// Update the squelch smoothing coefficient.
    pub fn set_sql_alpha(&mut self, alpha: f64) {
        self.sql.lock().unwrap().set_alpha(alpha);
    }

    /// Update the FM demodulator's maximum deviation.
    pub fn set_fm_maxdev(&mut self, max_dev_hz: f64) {
        self.demod_fm.lock().unwrap().set_max_dev(max_dev_hz);
    }

    /// Update the de-emphasis time constant (0 disables de-emphasis).
    pub fn set_fm_deemph(&mut self, tau: f64) {
        self.demod_fm.lock().unwrap().set_tau(tau);
    }

    /// Current signal level, linear amplitude or dBFS.
    pub fn get_signal_level(&self, dbfs: bool) -> f32 {
        let meter = self.meter.lock().unwrap();
        if dbfs {
            meter.level_db()
        } else {
            meter.level()
        }
    }

    /// Select the demodulation mode.
    ///
    /// Out-of-range selections are ignored without error, and reselecting
    /// the current mode is a no-op that never touches the graph lock.
    /// Otherwise the active decoder's three edges are moved to the new
    /// decoder in a single locked transaction; the disconnected decoder
    /// keeps its internal state (pilot lock included) for the switch back.
    pub fn set_demod(&mut self, demod: i32) {
        let Some(new_mode) = WfmDemod::from_index(demod) else {
            log::debug!("ignoring invalid demodulator selection {demod}");
            return;
        };
        if new_mode == self.demod {
            return;
        }
        log::info!("switching WFM demodulator: {:?} -> {:?}", self.demod, new_mode);
        if let Err(e) = self.rewire_decoder(new_mode) {
            log::error!("demodulator rewire failed: {e:#}");
            return;
        }
        self.demod = new_mode;
    }

    /// Whether the given mode's decoder is fully wired to the audio output.
    pub fn decoder_is_wired(&self, mode: WfmDemod) -> bool {
        let node = self.decoder_node(mode);
        self.graph.is_connected(self.n_mid, 0, node, 0)
            && self.graph.is_connected(node, 0, self.n_sink, 0)
            && self.graph.is_connected(node, 1, self.n_sink, 1)
    }

    fn decoder_node(&self, mode: WfmDemod) -> NodeId {
        match mode {
            WfmDemod::Mono => self.n_mono,
            WfmDemod::Stereo | WfmDemod::StereoUkw => self.n_stereo,
        }
    }

    fn rewire_decoder(&self, new_mode: WfmDemod) -> Result<()> {
        let old = self.decoder_node(self.demod);
        let new = self.decoder_node(new_mode);
        let mut graph = self.graph.lock();
        graph.disconnect(self.n_mid, 0, old, 0)?;
        graph.disconnect(old, 0, self.n_sink, 0)?; // left channel
        graph.disconnect(old, 1, self.n_sink, 1)?; // right channel
        graph.connect(self.n_mid, 0, new, 0)?;
        graph.connect(new, 0, self.n_sink, 0)?; // left channel
        graph.connect(new, 1, self.n_sink, 1)?; // right channel
        Ok(())
    }
}
