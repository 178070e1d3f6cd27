//! In-process audio backend.
//!
//! `OfflineContext` renders the node graph frame by frame into stereo
//! samples. It stands in for the browser engine in tests and drives the
//! WAV exporter. The clock only moves when the caller renders, so every
//! run is deterministic.
//!
//! Nodes are processed in topological order. Edges into a delay node's
//! input are left out of the ordering: a delay reads its buffer during the
//! frame and stores its input once every other node has run, which makes
//! feedback loops through a delay well defined.

mod convolver;
mod delay_line;
mod oscillator;
mod param;

use std::collections::VecDeque;

use crate::audio::{
    AudioContext, ContextState, ImpulseResponse, NodeId, NodeKind, ParamName, Port,
};
use crate::error::AudioError;
use crate::sequence::Waveform;

use convolver::Convolver;
use delay_line::DelayLine;
use oscillator::Oscillator;
use param::ParamTimeline;

pub use convolver::BLOCK as CONVOLVER_LATENCY;

const DESTINATION: NodeId = NodeId(0);

#[derive(Debug, Clone)]
enum Processor {
    Destination,
    Gain,
    Oscillator(Oscillator),
    Delay(DelayLine),
    Convolver(Box<Convolver>),
    ConstantSource,
}

impl Processor {
    fn kind(&self) -> NodeKind {
        match self {
            Processor::Destination => NodeKind::Destination,
            Processor::Gain => NodeKind::Gain,
            Processor::Oscillator(_) => NodeKind::Oscillator,
            Processor::Delay(_) => NodeKind::Delay,
            Processor::Convolver(_) => NodeKind::Convolver,
            Processor::ConstantSource => NodeKind::ConstantSource,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    processor: Processor,
    /// The node's one automatable parameter, if it has one.
    param: Option<(ParamName, ParamTimeline)>,
    start: Option<f64>,
    stop: Option<f64>,
    released: bool,
}

impl Node {
    fn new(processor: Processor) -> Self {
        let param = match processor {
            Processor::Gain => Some((ParamName::Gain, ParamTimeline::new(1.0))),
            Processor::Oscillator(_) => Some((ParamName::Frequency, ParamTimeline::new(440.0))),
            Processor::Delay(_) => Some((ParamName::DelayTime, ParamTimeline::new(0.0))),
            Processor::ConstantSource => Some((ParamName::Offset, ParamTimeline::new(1.0))),
            Processor::Destination | Processor::Convolver(_) => None,
        };
        Node {
            processor,
            param,
            start: None,
            stop: None,
            released: false,
        }
    }

    fn is_source(&self) -> bool {
        matches!(
            self.processor,
            Processor::Oscillator(_) | Processor::ConstantSource
        )
    }

    fn is_playing(&self, t: f64) -> bool {
        match self.start {
            Some(start) => t >= start && self.stop.is_none_or(|stop| t < stop),
            None => false,
        }
    }

    /// A released source that can never sound again.
    fn is_spent(&self, now: f64) -> bool {
        match (self.start, self.stop) {
            (None, _) => true,
            (Some(_), Some(stop)) => stop <= now,
            (Some(_), None) => false,
        }
    }
}

/// Per-frame evaluation order, rebuilt after any graph change.
#[derive(Debug, Default, Clone)]
struct Plan {
    order: Vec<usize>,
    inputs: Vec<Vec<usize>>,
    modulators: Vec<Vec<usize>>,
    delays: Vec<usize>,
}

/// Deterministic [`AudioContext`] that renders on demand.
#[derive(Debug, Clone)]
pub struct OfflineContext {
    sample_rate: f32,
    frame: u64,
    state: ContextState,
    resume_requested: bool,
    nodes: Vec<Option<Node>>,
    connections: Vec<(NodeId, Port)>,
    node_limit: Option<usize>,
    plan: Option<Plan>,
    outputs: Vec<[f32; 2]>,
}

impl OfflineContext {
    /// A running context.
    pub fn new(sample_rate: f32) -> Self {
        OfflineContext {
            sample_rate,
            frame: 0,
            state: ContextState::Running,
            resume_requested: false,
            nodes: vec![Some(Node::new(Processor::Destination))],
            connections: Vec::new(),
            node_limit: None,
            plan: None,
            outputs: Vec::new(),
        }
    }

    /// A context that starts suspended. A `resume` request completes at
    /// the next `render` or `advance` call.
    pub fn suspended(sample_rate: f32) -> Self {
        OfflineContext {
            state: ContextState::Suspended,
            ..Self::new(sample_rate)
        }
    }

    /// Fail node creation once `limit` nodes (destination included) are live.
    pub fn with_node_limit(mut self, limit: usize) -> Self {
        self.node_limit = Some(limit);
        self
    }

    pub fn close(&mut self) {
        self.state = ContextState::Closed;
    }

    /// Number of `from → to` connections, counting repeats.
    pub fn connection_count(&self, from: NodeId, to: Port) -> usize {
        self.connections
            .iter()
            .filter(|(f, t)| *f == from && *t == to)
            .count()
    }

    /// Every connection in creation order. Repeated connects are kept as
    /// separate entries.
    pub fn connections(&self) -> &[(NodeId, Port)] {
        &self.connections
    }

    /// Number of nodes not yet freed, destination included.
    pub fn live_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn node_kind(&self, id: NodeId) -> Option<NodeKind> {
        self.node(id).ok().map(|n| n.processor.kind())
    }

    /// Render `frames` stereo frames at the destination and move the
    /// clock. A suspended or closed context renders nothing.
    pub fn render(&mut self, frames: usize) -> Vec<[f32; 2]> {
        if self.resume_requested && self.state == ContextState::Suspended {
            self.state = ContextState::Running;
            log::debug!("offline context resumed");
        }
        self.resume_requested = false;
        if self.state != ContextState::Running {
            return Vec::new();
        }

        self.collect_garbage();
        let mut rendered = Vec::with_capacity(frames);
        for _ in 0..frames {
            rendered.push(self.render_frame());
        }
        let now = self.current_time();
        for node in self.nodes.iter_mut().flatten() {
            if let Some((_, timeline)) = node.param.as_mut() {
                timeline.prune_before(now);
            }
        }
        rendered
    }

    /// Render and discard `seconds` of audio.
    pub fn advance(&mut self, seconds: f64) {
        let frames = (seconds * self.sample_rate as f64).round().max(0.0) as usize;
        self.render(frames);
    }

    fn node(&self, id: NodeId) -> Result<&Node, AudioError> {
        self.nodes
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(AudioError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, AudioError> {
        self.nodes
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(AudioError::UnknownNode(id))
    }

    fn timeline_mut(&mut self, id: NodeId, param: ParamName) -> Result<&mut ParamTimeline, AudioError> {
        let node = self.node_mut(id)?;
        let kind = node.processor.kind();
        match node.param.as_mut() {
            Some((name, timeline)) if *name == param => Ok(timeline),
            _ => Err(AudioError::InvalidState(format!(
                "{kind:?} node {id} has no {param:?} parameter"
            ))),
        }
    }

    fn allocate(&mut self, processor: Processor) -> Result<NodeId, AudioError> {
        let kind = processor.kind();
        if let Some(limit) = self.node_limit {
            if self.live_nodes() >= limit {
                return Err(AudioError::Allocation {
                    kind,
                    reason: format!("node limit of {limit} reached"),
                });
            }
        }
        self.nodes.push(Some(Node::new(processor)));
        self.plan = None;
        Ok(NodeId((self.nodes.len() - 1) as u32))
    }

    /// Free released nodes that can no longer contribute any sound.
    fn collect_garbage(&mut self) {
        let now = self.current_time();
        loop {
            let mut freed = Vec::new();
            for (index, slot) in self.nodes.iter().enumerate() {
                let Some(node) = slot else { continue };
                if !node.released {
                    continue;
                }
                let id = NodeId(index as u32);
                let dead = if node.is_source() {
                    node.is_spent(now)
                } else {
                    !self.connections.iter().any(|(_, to)| to.node() == id)
                };
                if dead {
                    freed.push(id);
                }
            }
            if freed.is_empty() {
                break;
            }
            for id in freed {
                self.nodes[id.0 as usize] = None;
                self.connections
                    .retain(|(from, to)| *from != id && to.node() != id);
                log::trace!("freed audio node {id}");
            }
            self.plan = None;
        }
    }

    fn build_plan(&self) -> Plan {
        let count = self.nodes.len();
        let mut inputs = vec![Vec::new(); count];
        let mut modulators = vec![Vec::new(); count];
        let mut indegree = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (from, to) in &self.connections {
            let src = from.0 as usize;
            let dst = to.node().0 as usize;
            let into_delay = matches!(to, Port::Input(_))
                && matches!(
                    self.nodes[dst].as_ref().map(|n| &n.processor),
                    Some(Processor::Delay(_))
                );
            match to {
                Port::Input(_) => inputs[dst].push(src),
                Port::Param(..) => modulators[dst].push(src),
            }
            if !into_delay {
                indegree[dst] += 1;
                dependents[src].push(dst);
            }
        }

        // Kahn's algorithm
        let live: Vec<usize> = (0..count).filter(|i| self.nodes[*i].is_some()).collect();
        let mut queue: VecDeque<usize> = live.iter().copied().filter(|i| indegree[*i] == 0).collect();
        let mut order = Vec::with_capacity(live.len());
        let mut placed = vec![false; count];
        while let Some(index) = queue.pop_front() {
            order.push(index);
            placed[index] = true;
            for &next in &dependents[index] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }
        // nodes on a delay-free cycle read stale outputs from the last frame
        for index in live {
            if !placed[index] {
                order.push(index);
            }
        }

        let delays = order
            .iter()
            .copied()
            .filter(|i| {
                matches!(
                    self.nodes[*i].as_ref().map(|n| &n.processor),
                    Some(Processor::Delay(_))
                )
            })
            .collect();

        Plan {
            order,
            inputs,
            modulators,
            delays,
        }
    }

    fn render_frame(&mut self) -> [f32; 2] {
        let plan = match self.plan.take() {
            Some(plan) => plan,
            None => self.build_plan(),
        };
        if self.outputs.len() < self.nodes.len() {
            self.outputs.resize(self.nodes.len(), [0.0, 0.0]);
        }
        let t = self.current_time();

        for &index in &plan.order {
            let input = sum_frames(&self.outputs, &plan.inputs[index]);
            let modulation = {
                let [l, r] = sum_frames(&self.outputs, &plan.modulators[index]);
                (l + r) * 0.5
            };
            let Some(node) = self.nodes[index].as_mut() else {
                continue;
            };
            let param = node
                .param
                .as_ref()
                .map_or(0.0, |(_, timeline)| timeline.value_at(t))
                + modulation;
            let playing = node.is_playing(t);
            let out = match &mut node.processor {
                Processor::Destination => input,
                Processor::Gain => [input[0] * param, input[1] * param],
                Processor::Oscillator(osc) => {
                    if playing {
                        let s = osc.next_sample(param as f64) as f32;
                        [s, s]
                    } else {
                        [0.0, 0.0]
                    }
                }
                Processor::ConstantSource => {
                    if playing {
                        [param, param]
                    } else {
                        [0.0, 0.0]
                    }
                }
                Processor::Delay(line) => line.read(param as f64),
                Processor::Convolver(conv) => conv.process(input),
            };
            self.outputs[index] = out;
        }

        for &index in &plan.delays {
            let input = sum_frames(&self.outputs, &plan.inputs[index]);
            if let Some(Node {
                processor: Processor::Delay(line),
                ..
            }) = self.nodes[index].as_mut()
            {
                line.write(input);
            }
        }

        let out = self.outputs[DESTINATION.0 as usize];
        self.plan = Some(plan);
        self.frame += 1;
        out
    }
}

fn sum_frames(outputs: &[[f32; 2]], sources: &[usize]) -> [f32; 2] {
    let mut acc = [0.0, 0.0];
    for &src in sources {
        acc[0] += outputs[src][0];
        acc[1] += outputs[src][1];
    }
    acc
}

impl AudioContext for OfflineContext {
    fn current_time(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }

    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn state(&self) -> ContextState {
        self.state
    }

    fn resume(&mut self) -> Result<(), AudioError> {
        match self.state {
            ContextState::Closed => Err(AudioError::InvalidState("context is closed".into())),
            ContextState::Running => Ok(()),
            ContextState::Suspended => {
                self.resume_requested = true;
                Ok(())
            }
        }
    }

    fn destination(&self) -> NodeId {
        DESTINATION
    }

    fn create_gain(&mut self) -> Result<NodeId, AudioError> {
        self.allocate(Processor::Gain)
    }

    fn create_oscillator(&mut self, waveform: Waveform) -> Result<NodeId, AudioError> {
        let osc = Oscillator::new(waveform, self.sample_rate as f64);
        self.allocate(Processor::Oscillator(osc))
    }

    fn create_delay(&mut self, max_delay: f64) -> Result<NodeId, AudioError> {
        if !(max_delay > 0.0 && max_delay.is_finite()) {
            return Err(AudioError::Allocation {
                kind: NodeKind::Delay,
                reason: format!("invalid maximum delay {max_delay}"),
            });
        }
        let line = DelayLine::new(self.sample_rate as f64, max_delay);
        self.allocate(Processor::Delay(line))
    }

    fn create_convolver(&mut self, impulse: &ImpulseResponse) -> Result<NodeId, AudioError> {
        let conv = Convolver::new(impulse, self.sample_rate, true);
        self.allocate(Processor::Convolver(Box::new(conv)))
    }

    fn create_constant_source(&mut self) -> Result<NodeId, AudioError> {
        self.allocate(Processor::ConstantSource)
    }

    fn release(&mut self, node: NodeId) {
        if node == DESTINATION {
            return;
        }
        if let Ok(n) = self.node_mut(node) {
            n.released = true;
        }
    }

    fn connect(&mut self, from: NodeId, to: Port) -> Result<(), AudioError> {
        self.node(from)?;
        let target = self.node(to.node())?;
        if let Port::Param(_, param) = to {
            if target.param.as_ref().map(|(name, _)| *name) != Some(param) {
                return Err(AudioError::InvalidState(format!(
                    "{:?} node {} has no {param:?} parameter",
                    target.processor.kind(),
                    to.node()
                )));
            }
        }
        self.connections.push((from, to));
        self.plan = None;
        Ok(())
    }

    fn disconnect(&mut self, from: NodeId, to: Port) -> Result<(), AudioError> {
        let position = self
            .connections
            .iter()
            .position(|(f, t)| *f == from && *t == to)
            .ok_or_else(|| AudioError::InvalidState(format!("{from} is not connected to {to}")))?;
        self.connections.remove(position);
        self.plan = None;
        Ok(())
    }

    fn set_value_at_time(
        &mut self,
        node: NodeId,
        param: ParamName,
        value: f32,
        time: f64,
    ) -> Result<(), AudioError> {
        self.timeline_mut(node, param)?.set_value_at_time(value, time);
        Ok(())
    }

    fn linear_ramp_to_value_at_time(
        &mut self,
        node: NodeId,
        param: ParamName,
        value: f32,
        time: f64,
    ) -> Result<(), AudioError> {
        let now = self.current_time();
        self.timeline_mut(node, param)?
            .linear_ramp_to_value_at_time(value, time, now);
        Ok(())
    }

    fn cancel_scheduled_values(
        &mut self,
        node: NodeId,
        param: ParamName,
        time: f64,
    ) -> Result<(), AudioError> {
        self.timeline_mut(node, param)?.cancel_scheduled_values(time);
        Ok(())
    }

    fn param_value(&self, node: NodeId, param: ParamName) -> Result<f32, AudioError> {
        let n = self.node(node)?;
        match n.param.as_ref() {
            Some((name, timeline)) if *name == param => Ok(timeline.value_at(self.current_time())),
            _ => Err(AudioError::InvalidState(format!(
                "{:?} node {node} has no {param:?} parameter",
                n.processor.kind()
            ))),
        }
    }

    fn start(&mut self, node: NodeId, when: f64) -> Result<(), AudioError> {
        let n = self.node_mut(node)?;
        if !n.is_source() {
            return Err(AudioError::InvalidState(format!("{node} is not a source")));
        }
        if n.start.is_some() {
            return Err(AudioError::InvalidState(format!("{node} was already started")));
        }
        n.start = Some(when);
        Ok(())
    }

    fn stop(&mut self, node: NodeId, when: f64) -> Result<(), AudioError> {
        let now = self.current_time();
        let n = self.node_mut(node)?;
        if !n.is_source() {
            return Err(AudioError::InvalidState(format!("{node} is not a source")));
        }
        if n.start.is_none() {
            return Err(AudioError::InvalidState(format!("{node} was never started")));
        }
        if n.stop.is_some_and(|stop| stop <= now) {
            return Err(AudioError::InvalidState(format!("{node} has already stopped")));
        }
        n.stop = Some(when);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 8000.0;

    fn peak(frames: &[[f32; 2]]) -> f32 {
        frames.iter().map(|f| f[0].abs()).fold(0.0, f32::max)
    }

    #[test]
    fn clock_advances_only_when_rendering() {
        let mut ctx = OfflineContext::new(SR);
        assert_eq!(ctx.current_time(), 0.0);
        ctx.advance(0.5);
        assert!((ctx.current_time() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn suspended_context_holds_clock_until_resumed() {
        let mut ctx = OfflineContext::suspended(SR);
        assert!(ctx.render(100).is_empty());
        assert_eq!(ctx.current_time(), 0.0);
        ctx.resume().unwrap();
        assert_eq!(ctx.state(), ContextState::Suspended);
        assert_eq!(ctx.render(100).len(), 100);
        assert_eq!(ctx.state(), ContextState::Running);
    }

    #[test]
    fn oscillator_sounds_between_start_and_stop() {
        let mut ctx = OfflineContext::new(SR);
        let osc = ctx.create_oscillator(Waveform::Square).unwrap();
        let out = ctx.destination();
        ctx.connect(osc, Port::Input(out)).unwrap();
        ctx.start(osc, 0.1).unwrap();
        ctx.stop(osc, 0.2).unwrap();
        let frames = ctx.render(SR as usize * 3 / 10);
        assert_eq!(peak(&frames[..800]), 0.0);
        assert!(peak(&frames[800..1600]) > 0.5);
        assert_eq!(peak(&frames[1600..]), 0.0);
    }

    #[test]
    fn gain_ramp_shapes_output() {
        let mut ctx = OfflineContext::new(SR);
        let src = ctx.create_constant_source().unwrap();
        let g = ctx.create_gain().unwrap();
        let out = ctx.destination();
        ctx.connect(src, Port::Input(g)).unwrap();
        ctx.connect(g, Port::Input(out)).unwrap();
        ctx.set_value_at_time(g, ParamName::Gain, 0.0, 0.0).unwrap();
        ctx.linear_ramp_to_value_at_time(g, ParamName::Gain, 1.0, 1.0).unwrap();
        ctx.start(src, 0.0).unwrap();
        let frames = ctx.render(SR as usize);
        assert!((frames[4000][0] - 0.5).abs() < 1e-3, "got {}", frames[4000][0]);
        assert!((ctx.param_value(g, ParamName::Gain).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn param_input_adds_to_timeline() {
        let mut ctx = OfflineContext::new(SR);
        let carrier = ctx.create_constant_source().unwrap();
        let bias = ctx.create_constant_source().unwrap();
        let g = ctx.create_gain().unwrap();
        let out = ctx.destination();
        ctx.set_value_at_time(g, ParamName::Gain, 0.0, 0.0).unwrap();
        ctx.set_value_at_time(bias, ParamName::Offset, 0.25, 0.0).unwrap();
        ctx.connect(carrier, Port::Input(g)).unwrap();
        ctx.connect(bias, Port::Param(g, ParamName::Gain)).unwrap();
        ctx.connect(g, Port::Input(out)).unwrap();
        ctx.start(carrier, 0.0).unwrap();
        ctx.start(bias, 0.0).unwrap();
        let frames = ctx.render(10);
        assert!((frames[5][0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn delay_feedback_loop_repeats() {
        let mut ctx = OfflineContext::new(1000.0);
        let src = ctx.create_constant_source().unwrap();
        let delay = ctx.create_delay(1.0).unwrap();
        let fb = ctx.create_gain().unwrap();
        let out = ctx.destination();
        ctx.set_value_at_time(delay, ParamName::DelayTime, 0.01, 0.0).unwrap();
        ctx.set_value_at_time(fb, ParamName::Gain, 0.5, 0.0).unwrap();
        ctx.connect(src, Port::Input(delay)).unwrap();
        ctx.connect(delay, Port::Input(fb)).unwrap();
        ctx.connect(fb, Port::Input(delay)).unwrap();
        ctx.connect(delay, Port::Input(out)).unwrap();
        ctx.start(src, 0.0).unwrap();
        ctx.stop(src, 0.001).unwrap();
        let frames = ctx.render(40);
        assert_eq!(frames[10][0], 1.0);
        assert_eq!(frames[20][0], 0.5);
        assert_eq!(frames[30][0], 0.25);
    }

    #[test]
    fn disconnect_of_missing_edge_is_rejected() {
        let mut ctx = OfflineContext::new(SR);
        let a = ctx.create_gain().unwrap();
        let b = ctx.create_gain().unwrap();
        let err = ctx.disconnect(a, Port::Input(b)).unwrap_err();
        assert!(matches!(err, AudioError::InvalidState(_)));
    }

    #[test]
    fn sources_start_once_and_restop_until_stopped() {
        let mut ctx = OfflineContext::new(SR);
        let osc = ctx.create_oscillator(Waveform::Sine).unwrap();
        assert!(ctx.stop(osc, 0.0).is_err(), "stop before start must fail");
        ctx.start(osc, 0.0).unwrap();
        assert!(ctx.start(osc, 0.0).is_err());
        ctx.stop(osc, 0.5).unwrap();
        // a later call replaces the pending stop time
        ctx.stop(osc, 0.1).unwrap();
        ctx.advance(0.2);
        assert!(ctx.stop(osc, 0.3).is_err());
    }

    #[test]
    fn node_limit_fails_allocation() {
        let mut ctx = OfflineContext::new(SR).with_node_limit(2);
        ctx.create_gain().unwrap();
        let err = ctx.create_gain().unwrap_err();
        assert!(matches!(err, AudioError::Allocation { kind: NodeKind::Gain, .. }));
    }

    #[test]
    fn released_voice_is_freed_after_it_stops() {
        let mut ctx = OfflineContext::new(SR);
        let osc = ctx.create_oscillator(Waveform::Sine).unwrap();
        let g = ctx.create_gain().unwrap();
        let out = ctx.destination();
        ctx.connect(osc, Port::Input(g)).unwrap();
        ctx.connect(g, Port::Input(out)).unwrap();
        ctx.start(osc, 0.0).unwrap();
        ctx.stop(osc, 0.1).unwrap();
        ctx.release(osc);
        ctx.release(g);
        ctx.advance(0.05);
        assert_eq!(ctx.live_nodes(), 3);
        ctx.advance(0.1);
        ctx.advance(0.0);
        assert_eq!(ctx.live_nodes(), 1);
        assert!(ctx.connections().is_empty());
    }

    #[test]
    fn held_nodes_are_never_freed() {
        let mut ctx = OfflineContext::new(SR);
        let g = ctx.create_gain().unwrap();
        ctx.advance(0.1);
        assert_eq!(ctx.node_kind(g), Some(NodeKind::Gain));
    }
}
