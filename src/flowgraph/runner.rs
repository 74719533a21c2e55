//! Background streaming engine.
//!
//! Drives a [`ChannelPort`] from a worker thread: pull a chunk of IQ from the
//! source callback, push it through the graph, hand the decoded audio to the
//! consumer over a channel. Stop is signalled with an atomic flag and takes
//! effect at the next chunk boundary, which is also where the graph's
//! reconfiguration lock gets its chance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use num_complex::Complex;

use crate::flowgraph::endpoints::ChannelPort;

/// One chunk of decoded two-channel audio.
#[derive(Debug, Clone, Default)]
pub struct AudioChunk {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

/// Pull callback feeding the runner. Returns up to `n` IQ samples, or `None`
/// when the source is exhausted.
pub type IqPull = Box<dyn FnMut(usize) -> Option<Vec<Complex<f32>>> + Send>;

/// Worker thread pushing fixed-size IQ chunks through a receiver graph.
#[derive(Debug)]
pub struct StreamRunner {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl StreamRunner {
    /// Spawn the worker. Audio chunks arrive on the returned receiver; the
    /// channel closes when the source runs dry, the consumer goes away, or
    /// [`StreamRunner::stop`] is called.
    pub fn spawn(port: ChannelPort, mut source: IqPull, chunk_size: usize) -> (Self, mpsc::Receiver<AudioChunk>) {
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = std::thread::spawn(move || {
            log::debug!("stream runner started (chunk size {chunk_size})");
            while !flag.load(Ordering::Relaxed) {
                let Some(iq) = source(chunk_size) else {
                    log::info!("IQ source exhausted, stream runner finishing");
                    break;
                };
                match port.process(&iq) {
                    Ok((left, right)) => {
                        if left.is_empty() && right.is_empty() {
                            continue;
                        }
                        if tx.send(AudioChunk { left, right }).is_err() {
                            log::debug!("audio consumer gone, stream runner finishing");
                            break;
                        }
                    }
                    Err(e) => {
                        log::error!("flowgraph pass failed: {e:#}");
                        break;
                    }
                }
            }
            log::debug!("stream runner exiting");
        });

        (Self { handle: Some(handle), stop }, rx)
    }

    /// Signal the worker to stop at the next chunk boundary (non-blocking).
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Wait for the worker thread to finish.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(()) => log::debug!("stream runner thread stopped"),
                Err(_) => log::error!("stream runner thread panicked"),
            }
        }
    }
}

impl Drop for StreamRunner {
    fn drop(&mut self) {
        self.stop();
    }
}
