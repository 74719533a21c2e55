//! Wideband FM receiver signal chain.
//!
//! A software-defined-radio receiver front end: a reconfigurable flowgraph of
//! resampling, filtering, squelch, FM demodulation and stereo/mono decoding
//! stages, plus the protocol for safely rewiring that graph while samples are
//! flowing. The [`receiver::WfmReceiver`] controller owns the chain and
//! exposes the live controls; [`flowgraph::StreamRunner`] drives it from a
//! worker thread.

pub mod blocks;
pub mod flowgraph;
pub mod receiver;
pub mod stages;

pub use receiver::{WfmDemod, WfmReceiver, PREF_MID_RATE, PREF_QUAD_RATE};

#[cfg(test)]
mod pipeline_tests {
    use std::f64::consts::TAU;

    use num_complex::Complex;

    use crate::flowgraph::{IqPull, StreamRunner};
    use crate::{WfmDemod, WfmReceiver, PREF_QUAD_RATE};

    const QUAD_RATE: f64 = 1_000_000.0;
    const AUDIO_RATE: f64 = 48_000.0;

    /// Baseband FM signal: a tone frequency-modulated at the given deviation.
    fn fm_tone(rate: f64, tone_hz: f64, max_dev_hz: f64, n: usize) -> Vec<Complex<f32>> {
        let mut phase = 0.0f64;
        (0..n)
            .map(|i| {
                let t = i as f64 / rate;
                let freq = max_dev_hz * (TAU * tone_hz * t).sin();
                phase += TAU * freq / rate;
                Complex::new(phase.cos() as f32, phase.sin() as f32)
            })
            .collect()
    }

    fn chunked(iq: Vec<Complex<f32>>) -> IqPull {
        let mut pos = 0usize;
        Box::new(move |n| {
            if pos >= iq.len() {
                return None;
            }
            let end = (pos + n).min(iq.len());
            let chunk = iq[pos..end].to_vec();
            pos = end;
            Some(chunk)
        })
    }

    #[test]
    fn live_reconfiguration_with_real_stages() {
        let mut rx = WfmReceiver::new(QUAD_RATE, AUDIO_RATE).unwrap();
        assert_eq!(rx.demod(), WfmDemod::Mono);
        assert!(rx.decoder_is_wired(WfmDemod::Mono));
        assert!(!rx.decoder_is_wired(WfmDemod::Stereo));

        rx.set_demod(WfmDemod::Stereo as i32);
        assert_eq!(rx.demod(), WfmDemod::Stereo);
        assert!(rx.decoder_is_wired(WfmDemod::Stereo));
        assert!(!rx.decoder_is_wired(WfmDemod::Mono));

        // Reselecting the active mode must not disturb the wiring.
        rx.set_demod(WfmDemod::Stereo as i32);
        assert!(rx.decoder_is_wired(WfmDemod::Stereo));

        // Sub-epsilon rate jitter is ignored, a real change retunes the ratio.
        rx.set_quad_rate(QUAD_RATE + 0.2);
        assert!((rx.iq_resampler_ratio() - PREF_QUAD_RATE / QUAD_RATE).abs() < 1e-12);
        rx.set_quad_rate(1_100_000.0);
        assert!((rx.iq_resampler_ratio() - PREF_QUAD_RATE / 1_100_000.0).abs() < 1e-12);
    }

    #[test]
    fn demodulates_fm_tone_end_to_end() {
        let mut rx = WfmReceiver::new(QUAD_RATE, AUDIO_RATE).unwrap();
        rx.start();

        let iq = fm_tone(QUAD_RATE, 1_000.0, 75_000.0, 200_000);
        let expected = iq.len() as f64 * AUDIO_RATE / QUAD_RATE;

        let (mut runner, audio) = StreamRunner::spawn(rx.port(), chunked(iq), 8192);
        let mut left = Vec::new();
        for chunk in audio {
            assert_eq!(chunk.left.len(), chunk.right.len());
            left.extend_from_slice(&chunk.left);
        }
        runner.join();

        // Filter and resampler latency withholds a little output at the end.
        assert!(left.len() as f64 > expected * 0.9, "only {} audio samples", left.len());
        assert!((left.len() as f64) < expected * 1.05);
        assert!(left.iter().all(|x| x.is_finite()));

        // 75 kHz deviation demodulates near full scale; de-emphasis shaves a
        // few percent off a 1 kHz tone.
        let rms = (left.iter().skip(1000).map(|x| f64::from(*x).powi(2)).sum::<f64>()
            / (left.len() - 1000) as f64)
            .sqrt();
        assert!(rms > 0.3 && rms < 1.0, "audio rms {rms}");

        // A unit-amplitude carrier reads near 0 dBFS on the meter.
        assert!(rx.get_signal_level(true) > -10.0);
        assert!(rx.get_signal_level(false) > 0.3);
    }
}
