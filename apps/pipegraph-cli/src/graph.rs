// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Demo graph loader and executor.
//!
//! Reads the minimal YAML shape SPEC_FULL.md §6 carves out for this binary
//! (`nodes: [{id, kind, params}]`, `edges: [{from, to}]`) and wires up real
//! `pipegraph-core`/`pipegraph-modules` pipes accordingly. This is scaffolding
//! for the demo, not a spec'd format: the runtime crates know nothing about
//! YAML or node kinds.
//!
//! A node's `output` closure is bound at construction time (no `SetOutput`
//! resolution — see DESIGN.md), so nodes are built in reverse topological
//! order: a node is only constructed once whatever it feeds has already been
//! built and has registered how to accept input from it. Fan-out (more than
//! one outgoing edge per node) is out of scope for this demo loader.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use pipegraph_core::error::PipeError;
use pipegraph_core::ubuf::{BlockBuf, SampleFormat, SoundBuf, Ubuf};
use pipegraph_core::upipe::{ControlCommand, PipeRef, Signature};
use pipegraph_core::uprobe::{PipeId, Probe, StdioLogProbe};
use pipegraph_core::uref::{Uref, UrefFlags};
use pipegraph_modules::cross_blend::{CrossBlend, CROSSBLEND_PERIOD};
use pipegraph_modules::pes_decaps::PesDecaps;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct GraphDef {
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
}

#[derive(Debug, Deserialize)]
pub struct NodeDef {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct EdgeDef {
    pub from: String,
    #[serde(default)]
    pub from_pin: String,
    pub to: String,
    #[serde(default)]
    pub to_pin: String,
}

/// Per-sink tally, printed once the graph has run to completion.
#[derive(Debug, Default)]
pub struct Summary {
    pub uref_count: u64,
    pub byte_count: u64,
    pub sample_count: u64,
}

impl Summary {
    fn record(&mut self, uref: &Uref) {
        self.uref_count += 1;
        match &uref.ubuf {
            Some(Ubuf::Block(b)) => self.byte_count += b.size() as u64,
            Some(Ubuf::Sound(s)) => self.sample_count += u64::from(s.samples),
            _ => {},
        }
    }
}

/// A source node's pre-built urefs plus the function that feeds them into
/// the rest of the graph. Driving these to exhaustion is what "runs the
/// graph to completion" means for this demo.
pub struct SourceDriver {
    pub id: String,
    queue: VecDeque<Uref>,
    downstream: Rc<dyn Fn(Uref)>,
}

impl SourceDriver {
    /// Feeds the next queued uref downstream. Returns `false` once
    /// exhausted.
    pub fn step(&mut self) -> bool {
        match self.queue.pop_front() {
            Some(uref) => {
                (self.downstream)(uref);
                true
            },
            None => false,
        }
    }
}

/// Built graph, ready to be driven: one [`SourceDriver`] per `source.*`
/// node, one [`Summary`] per `sink.*` node.
pub struct BuiltGraph {
    pub sources: Vec<SourceDriver>,
    pub summaries: Vec<(String, Rc<RefCell<Summary>>)>,
}

fn required_param<'a>(node: &'a NodeDef, key: &str) -> Result<&'a str, PipeError> {
    node.params.get(key).map(String::as_str).ok_or_else(|| {
        PipeError::Configuration(format!("node `{}` ({}) is missing required param `{key}`", node.id, node.kind))
    })
}

fn parse_param<T: std::str::FromStr>(node: &NodeDef, key: &str, default: T) -> Result<T, PipeError> {
    match node.params.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| PipeError::Configuration(format!("node `{}`: param `{key}` has an invalid value `{raw}`", node.id))),
    }
}

/// Walks `graph` and constructs every node's pipe, wiring edges as it goes.
pub fn build(graph: &GraphDef) -> Result<BuiltGraph, PipeError> {
    let mut node_by_id = HashMap::new();
    for node in &graph.nodes {
        if node_by_id.insert(node.id.as_str(), node).is_some() {
            return Err(PipeError::Configuration(format!("duplicate node id `{}`", node.id)));
        }
    }

    let mut successor_of: HashMap<String, String> = HashMap::new();
    let mut predecessors_of: HashMap<String, Vec<String>> = HashMap::new();
    for edge in &graph.edges {
        if !node_by_id.contains_key(edge.from.as_str()) {
            return Err(PipeError::Configuration(format!("edge references unknown node `{}`", edge.from)));
        }
        if !node_by_id.contains_key(edge.to.as_str()) {
            return Err(PipeError::Configuration(format!("edge references unknown node `{}`", edge.to)));
        }
        if successor_of.insert(edge.from.clone(), edge.to.clone()).is_some() {
            return Err(PipeError::Configuration(format!(
                "node `{}` has more than one outgoing edge, which this demo loader does not support",
                edge.from
            )));
        }
        predecessors_of.entry(edge.to.clone()).or_default().push(edge.from.clone());
    }

    let executor = Executor {
        node_by_id,
        successor_of,
        predecessors_of,
        built: RefCell::new(HashSet::new()),
        building: RefCell::new(HashSet::new()),
        registry: RefCell::new(HashMap::new()),
        sources: RefCell::new(Vec::new()),
        summaries: RefCell::new(Vec::new()),
        next_pipe_id: Cell::new(0),
        probe: Rc::new(StdioLogProbe { next: None }),
    };

    for node in &graph.nodes {
        executor.ensure_built(&node.id)?;
    }

    Ok(BuiltGraph { sources: executor.sources.into_inner(), summaries: executor.summaries.into_inner() })
}

struct Executor<'a> {
    node_by_id: HashMap<&'a str, &'a NodeDef>,
    successor_of: HashMap<String, String>,
    predecessors_of: HashMap<String, Vec<String>>,
    built: RefCell<HashSet<String>>,
    building: RefCell<HashSet<String>>,
    /// Keyed by *producer* node id: "how does the node that produced this
    /// uref hand it to whatever consumes it".
    registry: RefCell<HashMap<String, Rc<dyn Fn(Uref)>>>,
    sources: RefCell<Vec<SourceDriver>>,
    summaries: RefCell<Vec<(String, Rc<RefCell<Summary>>)>>,
    next_pipe_id: Cell<u32>,
    probe: Rc<dyn Probe>,
}

impl<'a> Executor<'a> {
    fn next_id(&self) -> PipeId {
        let id = self.next_pipe_id.get();
        self.next_pipe_id.set(id + 1);
        PipeId(id)
    }

    fn predecessors(&self, id: &str) -> Vec<String> {
        self.predecessors_of.get(id).cloned().unwrap_or_default()
    }

    fn ensure_built(&self, id: &str) -> Result<(), PipeError> {
        if self.built.borrow().contains(id) {
            return Ok(());
        }
        if !self.building.borrow_mut().insert(id.to_string()) {
            return Err(PipeError::Configuration(format!("cycle detected at node `{id}`")));
        }

        let node = *self
            .node_by_id
            .get(id)
            .ok_or_else(|| PipeError::Configuration(format!("edge references unknown node `{id}`")))?;

        // The successor (if any) must exist before this node, since this
        // node's `output` closure needs to call straight into it.
        let downstream: Rc<dyn Fn(Uref)> = match self.successor_of.get(id) {
            Some(succ_id) => {
                self.ensure_built(succ_id)?;
                self.registry.borrow_mut().remove(id).ok_or_else(|| {
                    PipeError::Configuration(format!("node `{succ_id}` never registered an input for `{id}`"))
                })?
            },
            None => Rc::new(|_uref: Uref| {}),
        };

        match node.kind.as_str() {
            "source.block" => self.build_source_block(node, downstream)?,
            "source.sound" => self.build_source_sound(node, downstream)?,
            "pes_decaps" => self.build_pes_decaps(node, downstream)?,
            "cross_blend" => self.build_cross_blend(node, downstream)?,
            "sink.count" => self.build_sink_count(node, downstream)?,
            other => return Err(PipeError::Configuration(format!("node `{id}`: unknown kind `{other}`"))),
        }

        self.building.borrow_mut().remove(id);
        self.built.borrow_mut().insert(id.to_string());
        Ok(())
    }

    fn build_source_block(&self, node: &NodeDef, downstream: Rc<dyn Fn(Uref)>) -> Result<(), PipeError> {
        if !self.predecessors(&node.id).is_empty() {
            return Err(PipeError::Configuration(format!("source node `{}` cannot have an incoming edge", node.id)));
        }
        let path = required_param(node, "path")?;
        let chunk_size: usize = parse_param(node, "chunk_size", 188)?;
        let bytes = std::fs::read(path)?;

        let mut queue = VecDeque::new();
        for (i, chunk) in bytes.chunks(chunk_size.max(1)).enumerate() {
            let mut uref = Uref::with_ubuf(Ubuf::Block(BlockBuf::from_bytes(chunk)));
            if i == 0 {
                uref.flags |= UrefFlags::BLOCK_START;
            }
            queue.push_back(uref);
        }
        self.sources.borrow_mut().push(SourceDriver { id: node.id.clone(), queue, downstream });
        Ok(())
    }

    /// Synthesizes a descending ramp on every channel, the same shape
    /// `pipegraph-modules::cross_blend`'s own tests drive a cross-fade with.
    fn build_source_sound(&self, node: &NodeDef, downstream: Rc<dyn Fn(Uref)>) -> Result<(), PipeError> {
        if !self.predecessors(&node.id).is_empty() {
            return Err(PipeError::Configuration(format!("source node `{}` cannot have an incoming edge", node.id)));
        }
        let channels: Vec<String> = required_param(node, "channels")?.split(',').map(str::to_string).collect();
        let rate: u32 = parse_param(node, "rate", 48_000)?;
        let frames: usize = parse_param(node, "frames", 10)?;
        let samples_per_frame: u32 = parse_param(node, "samples_per_frame", 4)?;
        let start: f32 = parse_param(node, "start", 1000.0)?;
        let step: f32 = parse_param(node, "step", 4.0)?;

        let mut queue = VecDeque::new();
        for frame in 0..frames {
            #[allow(clippy::cast_precision_loss)]
            let level = start - step * frame as f32;
            let mut sound = SoundBuf::alloc(channels.clone(), SampleFormat::F32, rate, samples_per_frame, 4);
            for ch in &channels {
                let (_guard, buf) = sound.map_channel_write(ch).expect("channel was just allocated");
                for sample in buf.chunks_exact_mut(4) {
                    sample.copy_from_slice(&level.to_le_bytes());
                }
            }
            let mut uref = Uref::with_ubuf(Ubuf::Sound(sound));
            uref.set_flow_def("sound.f32.");
            queue.push_back(uref);
        }
        self.sources.borrow_mut().push(SourceDriver { id: node.id.clone(), queue, downstream });
        Ok(())
    }

    fn build_pes_decaps(&self, node: &NodeDef, downstream: Rc<dyn Fn(Uref)>) -> Result<(), PipeError> {
        let preds = self.predecessors(&node.id);
        if preds.len() != 1 {
            return Err(PipeError::Configuration(format!(
                "node `{}` (pes_decaps) needs exactly one incoming edge, found {}",
                node.id,
                preds.len()
            )));
        }
        let behavior = PesDecaps::new(move |uref| downstream(uref));
        let pipe = PipeRef::new(self.next_id(), Signature(0), Some(Rc::clone(&self.probe)), Rc::new(RefCell::new(behavior)));
        let mut flow_def = Uref::new();
        flow_def.set_flow_def("block.");
        pipe.call_control(ControlCommand::SetFlowDef(flow_def)).map_err(PipeError::Control)?;

        let input_pipe = pipe;
        self.registry
            .borrow_mut()
            .insert(preds.into_iter().next().expect("length checked above"), Rc::new(move |uref| {
                let _ = input_pipe.call_input(uref);
            }));
        Ok(())
    }

    fn build_cross_blend(&self, node: &NodeDef, downstream: Rc<dyn Fn(Uref)>) -> Result<(), PipeError> {
        let preds = self.predecessors(&node.id);
        if preds.is_empty() {
            return Err(PipeError::Configuration(format!("node `{}` (cross_blend) needs at least one incoming edge", node.id)));
        }
        let channels: Vec<String> = required_param(node, "channels")?.split(',').map(str::to_string).collect();
        let rate: u32 = parse_param(node, "rate", 48_000)?;
        let period: u64 = parse_param(node, "period", CROSSBLEND_PERIOD)?;

        let mut blend = CrossBlend::new(channels, rate, period, move |uref| downstream(uref));
        for pred in preds {
            let input_pipe = blend.add_input(self.next_id(), Some(Rc::clone(&self.probe)));
            let mut flow_def = Uref::new();
            flow_def.set_flow_def("sound.f32.");
            input_pipe.call_control(ControlCommand::SetFlowDef(flow_def)).map_err(PipeError::Control)?;
            self.registry.borrow_mut().insert(pred, Rc::new(move |uref| {
                let _ = input_pipe.call_input(uref);
            }));
        }
        Ok(())
    }

    fn build_sink_count(&self, node: &NodeDef, downstream: Rc<dyn Fn(Uref)>) -> Result<(), PipeError> {
        let preds = self.predecessors(&node.id);
        if preds.is_empty() {
            return Err(PipeError::Configuration(format!("node `{}` (sink.count) needs at least one incoming edge", node.id)));
        }
        let summary = Rc::new(RefCell::new(Summary::default()));
        for pred in preds {
            let summary = Rc::clone(&summary);
            let downstream = Rc::clone(&downstream);
            self.registry.borrow_mut().insert(pred, Rc::new(move |uref: Uref| {
                summary.borrow_mut().record(&uref);
                downstream(uref);
            }));
        }
        self.summaries.borrow_mut().push((node.id.clone(), summary));
        Ok(())
    }
}
