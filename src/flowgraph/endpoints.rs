//! Boundary blocks: the graph's designated IQ input and stereo audio output.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use num_complex::Complex;

use crate::flowgraph::block::{Block, PortType, StreamData};
use crate::flowgraph::graph::Flowgraph;

/// The graph's single complex input port.
///
/// The external streaming engine pushes IQ samples here; the next scheduler
/// pass hands them to the first stage.
#[derive(Debug, Default)]
pub struct IqSource {
    queue: Vec<Complex<f32>>,
}

impl IqSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue samples for the next scheduler pass.
    pub fn push(&mut self, samples: &[Complex<f32>]) {
        self.queue.extend_from_slice(samples);
    }
}

impl Block for IqSource {
    fn name(&self) -> &'static str {
        "iq_source"
    }

    fn input_ports(&self) -> &'static [PortType] {
        &[]
    }

    fn output_ports(&self) -> &'static [PortType] {
        &[PortType::Complex]
    }

    fn work(&mut self, _inputs: &mut [StreamData], outputs: &mut [StreamData]) -> Result<()> {
        outputs[0].as_complex_mut().append(&mut self.queue);
        Ok(())
    }
}

/// The graph's two-channel audio output port.
#[derive(Debug, Default)]
pub struct AudioSink {
    left: Vec<f32>,
    right: Vec<f32>,
}

impl AudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything decoded since the last call.
    pub fn take(&mut self) -> (Vec<f32>, Vec<f32>) {
        (std::mem::take(&mut self.left), std::mem::take(&mut self.right))
    }
}

impl Block for AudioSink {
    fn name(&self) -> &'static str {
        "audio_sink"
    }

    fn input_ports(&self) -> &'static [PortType] {
        &[PortType::Float, PortType::Float]
    }

    fn output_ports(&self) -> &'static [PortType] {
        &[]
    }

    fn work(&mut self, inputs: &mut [StreamData], _outputs: &mut [StreamData]) -> Result<()> {
        self.left.extend_from_slice(inputs[0].as_float());
        self.right.extend_from_slice(inputs[1].as_float());
        Ok(())
    }
}

/// Data-plane handle to a receiver's flowgraph.
///
/// This is the seam the external streaming engine drives: feed a block of IQ
/// samples in, get whatever audio fell out of the pass. Clonable so the
/// engine can run on its own thread while the controller keeps the graph.
#[derive(Debug, Clone)]
pub struct ChannelPort {
    graph: Arc<Flowgraph>,
    source: Arc<Mutex<IqSource>>,
    sink: Arc<Mutex<AudioSink>>,
}

impl ChannelPort {
    pub fn new(graph: Arc<Flowgraph>, source: Arc<Mutex<IqSource>>, sink: Arc<Mutex<AudioSink>>) -> Self {
        Self { graph, source, sink }
    }

    /// Run one scheduler pass over `iq`, returning the decoded left/right
    /// audio. Output length depends on the resampling ratios and on how much
    /// the stages have buffered; it may be empty while filters fill up.
    pub fn process(&self, iq: &[Complex<f32>]) -> Result<(Vec<f32>, Vec<f32>)> {
        self.source.lock().unwrap().push(iq);
        self.graph.run_pass()?;
        Ok(self.sink.lock().unwrap().take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_drains_queue_into_output() {
        let mut src = IqSource::new();
        src.push(&[Complex::new(1.0, 2.0)]);
        let mut outputs = [StreamData::empty(PortType::Complex)];
        src.work(&mut [], &mut outputs).unwrap();
        assert_eq!(outputs[0].len(), 1);
        // Queue is empty afterwards.
        let mut outputs = [StreamData::empty(PortType::Complex)];
        src.work(&mut [], &mut outputs).unwrap();
        assert!(outputs[0].is_empty());
    }

    #[test]
    fn sink_accumulates_until_taken() {
        let mut sink = AudioSink::new();
        let mut inputs = [StreamData::Float(vec![1.0]), StreamData::Float(vec![-1.0])];
        sink.work(&mut inputs, &mut []).unwrap();
        let mut inputs = [StreamData::Float(vec![2.0]), StreamData::Float(vec![-2.0])];
        sink.work(&mut inputs, &mut []).unwrap();
        let (l, r) = sink.take();
        assert_eq!(l, vec![1.0, 2.0]);
        assert_eq!(r, vec![-1.0, -2.0]);
        assert_eq!(sink.take().0.len(), 0);
    }
}
