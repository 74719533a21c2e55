//! Reconfigurable streaming flowgraph.
//!
//! The graph topology the streaming engine walks, and the mutation protocol
//! for changing it safely while samples are flowing: edge rewiring happens
//! under a stop-the-world lock taken between scheduler passes, numeric
//! parameter updates go straight to the stage without it.

pub mod block;
pub mod endpoints;
pub mod graph;
pub mod runner;

pub use block::{Block, PortType, StreamData};
pub use endpoints::{AudioSink, ChannelPort, IqSource};
pub use graph::{Flowgraph, NodeId, TopologyGuard};
pub use runner::{AudioChunk, IqPull, StreamRunner};
