//! The flowgraph: a directed acyclic graph of DSP blocks with a
//! reconfiguration lock.
//!
//! Topology (the edge set and the traversal order derived from it) lives
//! behind a single mutex. A scheduler pass holds that mutex for the whole
//! pass, so any edge mutation taken through [`Flowgraph::lock`] is a
//! stop-the-world critical section between sample blocks: reconfiguration
//! never observes a half-executed pass and the data plane never observes a
//! half-applied rewiring.
//!
//! Blocks themselves sit behind their own per-block mutexes. Numeric
//! parameter setters go straight to the block and deliberately bypass the
//! topology lock; the worst case is one scheduling step that still uses the
//! old value.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Result};

use crate::flowgraph::block::{Block, PortType, StreamData};

/// Handle to a block registered with a flowgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

/// Type-erased access to a shared block.
///
/// Generic over `B` so that callers can register `Arc<Mutex<dyn SomeStage>>`
/// trait-object handles and keep the typed handle for themselves; both sides
/// share one mutex.
trait RunBlock: Send + Sync {
    fn work(&self, inputs: &mut [StreamData], outputs: &mut [StreamData]) -> Result<()>;
}

struct SharedBlock<B: Block + ?Sized>(Arc<Mutex<B>>);

impl<B: Block + ?Sized> RunBlock for SharedBlock<B> {
    fn work(&self, inputs: &mut [StreamData], outputs: &mut [StreamData]) -> Result<()> {
        self.0.lock().unwrap().work(inputs, outputs)
    }
}

struct Node {
    name: &'static str,
    runner: Box<dyn RunBlock>,
    inputs: Vec<PortType>,
    outputs: Vec<PortType>,
}

struct Edge {
    src: NodeId,
    src_port: usize,
    dst: NodeId,
    dst_port: usize,
    /// Samples in flight on this edge, waiting for the destination block.
    buf: StreamData,
}

#[derive(Default)]
struct Topology {
    edges: Vec<Edge>,
    /// Cached traversal order (indices into the node table).
    order: Vec<usize>,
    dirty: bool,
}

impl Topology {
    /// Rebuild the topological traversal order (Kahn's algorithm).
    fn rebuild_order(&mut self, node_count: usize) -> Result<()> {
        let mut indegree = vec![0usize; node_count];
        for e in &self.edges {
            indegree[e.dst.0] += 1;
        }
        let mut ready: Vec<usize> = (0..node_count).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(node_count);
        while let Some(n) = ready.pop() {
            order.push(n);
            for e in self.edges.iter().filter(|e| e.src.0 == n) {
                indegree[e.dst.0] -= 1;
                if indegree[e.dst.0] == 0 {
                    ready.push(e.dst.0);
                }
            }
        }
        if order.len() != node_count {
            bail!("flowgraph contains a cycle");
        }
        self.order = order;
        self.dirty = false;
        Ok(())
    }
}

/// A graph of DSP blocks plus the mutation protocol for changing it while
/// samples are flowing.
pub struct Flowgraph {
    nodes: Vec<Node>,
    topology: Mutex<Topology>,
}

impl fmt::Debug for Flowgraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.nodes.iter().map(|n| n.name).collect();
        f.debug_struct("Flowgraph").field("nodes", &names).finish_non_exhaustive()
    }
}

impl Default for Flowgraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Flowgraph {
    pub fn new() -> Self {
        Self { nodes: Vec::new(), topology: Mutex::new(Topology::default()) }
    }

    /// Register a block. The caller keeps its own clone of the handle for
    /// parameter updates; the graph uses the same mutex when scheduling.
    ///
    /// Blocks are registered once, before the graph is shared with the data
    /// plane, and live as long as the graph.
    pub fn add_block<B: Block + ?Sized + 'static>(&mut self, block: Arc<Mutex<B>>) -> NodeId {
        let (name, inputs, outputs) = {
            let b = block.lock().unwrap();
            (b.name(), b.input_ports().to_vec(), b.output_ports().to_vec())
        };
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node { name, runner: Box::new(SharedBlock(block)), inputs, outputs });
        id
    }

    /// Enter the stop-the-world reconfiguration critical section.
    ///
    /// While the returned guard is held no scheduler pass can run; all edge
    /// mutations made through the guard become visible to the data plane as
    /// one transaction.
    pub fn lock(&self) -> TopologyGuard<'_> {
        TopologyGuard { nodes: &self.nodes, topo: self.topology.lock().unwrap() }
    }

    /// Connect a single edge. Shorthand for a one-edge transaction.
    pub fn connect(&self, src: NodeId, src_port: usize, dst: NodeId, dst_port: usize) -> Result<()> {
        self.lock().connect(src, src_port, dst, dst_port)
    }

    /// Disconnect a single edge. Shorthand for a one-edge transaction.
    pub fn disconnect(&self, src: NodeId, src_port: usize, dst: NodeId, dst_port: usize) -> Result<()> {
        self.lock().disconnect(src, src_port, dst, dst_port)
    }

    /// Whether the given edge currently exists.
    pub fn is_connected(&self, src: NodeId, src_port: usize, dst: NodeId, dst_port: usize) -> bool {
        self.topology
            .lock()
            .unwrap()
            .edges
            .iter()
            .any(|e| e.src == src && e.src_port == src_port && e.dst == dst && e.dst_port == dst_port)
    }

    /// Run one scheduler pass: every block is offered whatever is queued on
    /// its input edges, in topological order, and its output is distributed
    /// to the outgoing edges (copied on fan-out).
    ///
    /// Holds the topology lock for the duration of the pass; this is the
    /// "safe point" the reconfiguration protocol synchronizes against.
    pub fn run_pass(&self) -> Result<()> {
        let mut topo = self.topology.lock().unwrap();
        if topo.dirty {
            topo.rebuild_order(self.nodes.len())?;
        }
        for i in 0..topo.order.len() {
            let idx = topo.order[i];
            let node = &self.nodes[idx];

            let mut inputs: Vec<StreamData> =
                node.inputs.iter().map(|&t| StreamData::empty(t)).collect();
            for e in topo.edges.iter_mut().filter(|e| e.dst.0 == idx) {
                inputs[e.dst_port].append(&mut e.buf);
            }

            let mut outputs: Vec<StreamData> =
                node.outputs.iter().map(|&t| StreamData::empty(t)).collect();
            node.runner.work(&mut inputs, &mut outputs)?;

            for (port, data) in outputs.into_iter().enumerate() {
                if data.is_empty() {
                    continue;
                }
                let mut remaining = topo
                    .edges
                    .iter_mut()
                    .filter(|e| e.src.0 == idx && e.src_port == port)
                    .peekable();
                while let Some(edge) = remaining.next() {
                    if remaining.peek().is_some() {
                        edge.buf.extend_from(&data);
                    } else {
                        // Last consumer takes the buffer without a copy.
                        let mut owned = data;
                        edge.buf.append(&mut owned);
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Guard over the graph topology; see [`Flowgraph::lock`].
pub struct TopologyGuard<'a> {
    nodes: &'a [Node],
    topo: MutexGuard<'a, Topology>,
}

impl fmt::Debug for TopologyGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopologyGuard").field("edges", &self.topo.edges.len()).finish()
    }
}

impl TopologyGuard<'_> {
    /// Add an edge from `src:src_port` to `dst:dst_port`.
    ///
    /// Output ports may fan out to several edges; an input port accepts at
    /// most one. Port types must match and the result must stay acyclic.
    pub fn connect(&mut self, src: NodeId, src_port: usize, dst: NodeId, dst_port: usize) -> Result<()> {
        let (sn, dn) = (self.node(src)?, self.node(dst)?);
        let Some(&st) = sn.outputs.get(src_port) else {
            bail!("{} has no output port {}", sn.name, src_port);
        };
        let Some(&dt) = dn.inputs.get(dst_port) else {
            bail!("{} has no input port {}", dn.name, dst_port);
        };
        if st != dt {
            bail!(
                "port type mismatch: {}:{} is {:?} but {}:{} is {:?}",
                sn.name, src_port, st, dn.name, dst_port, dt
            );
        }
        if self.topo.edges.iter().any(|e| e.dst == dst && e.dst_port == dst_port) {
            bail!("input port {}:{} is already connected", dn.name, dst_port);
        }
        self.topo.edges.push(Edge { src, src_port, dst, dst_port, buf: StreamData::empty(st) });
        if let Err(e) = self.topo.rebuild_order(self.nodes.len()) {
            self.topo.edges.pop();
            self.topo.dirty = true;
            return Err(e);
        }
        Ok(())
    }

    /// Remove the edge from `src:src_port` to `dst:dst_port`.
    ///
    /// Any samples still queued on the edge are dropped; the blocks on
    /// either side keep their internal state.
    pub fn disconnect(&mut self, src: NodeId, src_port: usize, dst: NodeId, dst_port: usize) -> Result<()> {
        let before = self.topo.edges.len();
        self.topo
            .edges
            .retain(|e| !(e.src == src && e.src_port == src_port && e.dst == dst && e.dst_port == dst_port));
        if self.topo.edges.len() == before {
            let (sn, dn) = (self.node(src)?, self.node(dst)?);
            bail!("no edge {}:{} -> {}:{}", sn.name, src_port, dn.name, dst_port);
        }
        self.topo.dirty = true;
        Ok(())
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        match self.nodes.get(id.0) {
            Some(n) => Ok(n),
            None => bail!("unknown flowgraph node {:?}", id),
        }
    }
}
