//! Block abstraction for the receiver flowgraph.
//!
//! A block is a DSP stage with a fixed set of typed stream ports. Blocks are
//! driven by the flowgraph scheduler one buffer at a time: `work` receives
//! everything queued on its input edges and appends whatever it produces to
//! its output buffers. Rate-changing stages (resamplers, the channel filter)
//! are free to produce more or fewer samples than they consume.

use anyhow::Result;
use num_complex::Complex;

/// Sample kind carried by a stream port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    /// Complex baseband (IQ) samples.
    Complex,
    /// Real-valued samples (demodulated composite, audio).
    Float,
}

/// A buffer of samples travelling along one graph edge.
#[derive(Debug, Clone)]
pub enum StreamData {
    Complex(Vec<Complex<f32>>),
    Float(Vec<f32>),
}

impl StreamData {
    /// Empty buffer matching the given port type.
    pub fn empty(ty: PortType) -> Self {
        match ty {
            PortType::Complex => Self::Complex(Vec::new()),
            PortType::Float => Self::Float(Vec::new()),
        }
    }

    pub fn port_type(&self) -> PortType {
        match self {
            Self::Complex(_) => PortType::Complex,
            Self::Float(_) => PortType::Float,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Complex(v) => v.len(),
            Self::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move all samples out of `other` onto the end of this buffer.
    ///
    /// The flowgraph validates port types when edges are created, so the
    /// variants always match; a mismatch is a wiring bug and is ignored.
    pub fn append(&mut self, other: &mut StreamData) {
        match (self, other) {
            (Self::Complex(dst), Self::Complex(src)) => dst.append(src),
            (Self::Float(dst), Self::Float(src)) => dst.append(src),
            (dst, src) => {
                debug_assert!(false, "stream type mismatch: {:?} <- {:?}", dst.port_type(), src.port_type());
            }
        }
    }

    /// Copy all samples from `other` onto the end of this buffer (fan-out).
    pub fn extend_from(&mut self, other: &StreamData) {
        match (self, other) {
            (Self::Complex(dst), Self::Complex(src)) => dst.extend_from_slice(src),
            (Self::Float(dst), Self::Float(src)) => dst.extend_from_slice(src),
            (dst, src) => {
                debug_assert!(false, "stream type mismatch: {:?} <- {:?}", dst.port_type(), src.port_type());
            }
        }
    }

    /// View as complex samples; empty if this is a float buffer.
    pub fn as_complex(&self) -> &[Complex<f32>] {
        match self {
            Self::Complex(v) => v,
            Self::Float(_) => &[],
        }
    }

    /// View as real samples; empty if this is a complex buffer.
    pub fn as_float(&self) -> &[f32] {
        match self {
            Self::Float(v) => v,
            Self::Complex(_) => &[],
        }
    }

    /// Mutable complex buffer. Panics on a float buffer: output buffers are
    /// allocated by the scheduler from the block's own port declaration, so
    /// the variant is always right.
    pub fn as_complex_mut(&mut self) -> &mut Vec<Complex<f32>> {
        match self {
            Self::Complex(v) => v,
            Self::Float(_) => panic!("expected a complex stream buffer"),
        }
    }

    /// Mutable float buffer. See [`StreamData::as_complex_mut`].
    pub fn as_float_mut(&mut self) -> &mut Vec<f32> {
        match self {
            Self::Float(v) => v,
            Self::Complex(_) => panic!("expected a float stream buffer"),
        }
    }
}

/// A DSP stage in the flowgraph.
pub trait Block: Send {
    /// Short stable name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Input port types, in port order.
    fn input_ports(&self) -> &'static [PortType];

    /// Output port types, in port order.
    fn output_ports(&self) -> &'static [PortType];

    /// Process one scheduling step.
    ///
    /// `inputs` holds one drained buffer per input port (empty when the port
    /// is unconnected or starved); `outputs` holds one empty buffer per
    /// output port. A block must consume all of its input on every call and
    /// carry any unconsumable remainder in its own state.
    fn work(&mut self, inputs: &mut [StreamData], outputs: &mut [StreamData]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_moves_samples() {
        let mut a = StreamData::Float(vec![1.0, 2.0]);
        let mut b = StreamData::Float(vec![3.0]);
        a.append(&mut b);
        assert_eq!(a.as_float(), &[1.0, 2.0, 3.0]);
        assert!(b.is_empty());
    }

    #[test]
    fn extend_from_copies_samples() {
        let mut a = StreamData::empty(PortType::Complex);
        let b = StreamData::Complex(vec![Complex::new(1.0, -1.0)]);
        a.extend_from(&b);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn wrong_view_is_empty() {
        let a = StreamData::Float(vec![1.0]);
        assert!(a.as_complex().is_empty());
        assert_eq!(a.port_type(), PortType::Float);
    }
}
