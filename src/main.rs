//! Demodulate a recorded IQ capture to a stereo audio WAV file.
//!
//! Accepts raw complex float32 captures (.cf32/.iq/.cfile) or 16-bit stereo
//! WAV captures where left = I and right = Q, feeds them through a
//! [`WfmReceiver`] on the background stream runner, and writes the decoded
//! audio as 16-bit stereo WAV.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use num_complex::Complex;

use wfmrx::flowgraph::StreamRunner;
use wfmrx::{WfmDemod, WfmReceiver};

const CHUNK_SIZE: usize = 8192;

#[derive(Parser, Debug)]
#[command(name = "wfmrx", about = "Wideband FM receiver: IQ capture in, stereo audio out")]
struct Args {
    /// IQ capture: 16-bit stereo WAV (L=I, R=Q) or raw complex float32
    #[arg(long)]
    input: PathBuf,

    /// Sample rate of the IQ capture in Hz
    #[arg(long, default_value_t = 1_000_000.0)]
    quad_rate: f64,

    /// Audio output rate in Hz
    #[arg(long, default_value_t = 48_000.0)]
    audio_rate: f64,

    /// Decode the stereo multiplex instead of mono
    #[arg(long)]
    stereo: bool,

    /// Squelch threshold in dB
    #[arg(long, default_value_t = -150.0, allow_hyphen_values = true)]
    squelch_db: f64,

    /// Output WAV path
    #[arg(long)]
    output: PathBuf,
}

/// IQ capture reader, format sniffed from the file extension.
enum IqReader {
    /// 16-bit stereo WAV; left channel = I, right channel = Q.
    Wav(WavReader<BufReader<File>>),
    /// Raw interleaved little-endian complex float32.
    Raw(BufReader<File>),
}

impl IqReader {
    fn open(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_lowercase();
        if ext == "wav" {
            let reader = WavReader::open(path).context("failed to open WAV IQ file")?;
            let spec = reader.spec();
            if spec.channels != 2 || spec.bits_per_sample != 16 {
                bail!(
                    "WAV IQ input must be 16-bit stereo, found {} channels / {} bits",
                    spec.channels,
                    spec.bits_per_sample
                );
            }
            log::info!(
                "opened WAV IQ capture: {} Hz, {:.2} s",
                spec.sample_rate,
                f64::from(reader.duration()) / f64::from(spec.sample_rate)
            );
            Ok(Self::Wav(reader))
        } else {
            if !matches!(ext.as_str(), "cf32" | "iq" | "cfile") {
                log::warn!("unknown extension '.{ext}', assuming raw complex float32");
            }
            let file = File::open(path).context("failed to open IQ file")?;
            Ok(Self::Raw(BufReader::new(file)))
        }
    }

    /// Read up to `n` IQ samples; `None` once the capture is exhausted.
    fn next_chunk(&mut self, n: usize) -> Option<Vec<Complex<f32>>> {
        match self {
            Self::Wav(reader) => {
                let mut out = Vec::with_capacity(n);
                let mut samples = reader.samples::<i16>();
                while out.len() < n {
                    let (Some(Ok(i)), Some(Ok(q))) = (samples.next(), samples.next()) else {
                        break;
                    };
                    out.push(Complex::new(f32::from(i) / 32768.0, f32::from(q) / 32768.0));
                }
                (!out.is_empty()).then_some(out)
            }
            Self::Raw(reader) => {
                let mut buf = vec![0u8; n * 8];
                let mut filled = 0;
                while filled < buf.len() {
                    match reader.read(&mut buf[filled..]) {
                        Ok(0) => break,
                        Ok(k) => filled += k,
                        Err(e) => {
                            log::error!("IQ read failed: {e}");
                            return None;
                        }
                    }
                }
                let out: Vec<Complex<f32>> = buf[..filled - filled % 8]
                    .chunks_exact(8)
                    .map(|c| {
                        Complex::new(
                            f32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                            f32::from_le_bytes([c[4], c[5], c[6], c[7]]),
                        )
                    })
                    .collect();
                (!out.is_empty()).then_some(out)
            }
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut rx = WfmReceiver::new(args.quad_rate, args.audio_rate)?;
    rx.set_sql_level(args.squelch_db);
    if args.stereo {
        rx.set_demod(WfmDemod::Stereo as i32);
    }
    rx.start();
    log::info!(
        "receiver up: quad rate {} Hz, audio rate {} Hz, {:?}",
        args.quad_rate,
        args.audio_rate,
        rx.demod()
    );

    let mut source = IqReader::open(&args.input)?;
    let (mut runner, audio) =
        StreamRunner::spawn(rx.port(), Box::new(move |n| source.next_chunk(n)), CHUNK_SIZE);

    let spec = WavSpec {
        channels: 2,
        sample_rate: args.audio_rate as u32,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&args.output, spec).context("failed to create output WAV")?;

    let mut total = 0usize;
    for chunk in audio {
        for (l, r) in chunk.left.iter().zip(&chunk.right) {
            writer.write_sample((l.clamp(-1.0, 1.0) * 32767.0) as i16)?;
            writer.write_sample((r.clamp(-1.0, 1.0) * 32767.0) as i16)?;
        }
        total += chunk.left.len();
    }
    runner.join();
    writer.finalize().context("failed to finalize output WAV")?;
    rx.stop();

    log::info!(
        "wrote {:.2} s of audio ({:.1} dBFS signal) to {}",
        total as f64 / args.audio_rate,
        rx.get_signal_level(true),
        args.output.display()
    );
    Ok(())
}
