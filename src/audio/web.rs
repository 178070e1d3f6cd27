//! [`AudioContext`] over the browser's Web Audio API.

use wasm_bindgen::JsValue;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    AudioContextState, AudioNode, AudioParam, AudioScheduledSourceNode, ConstantSourceNode,
    ConvolverNode, DelayNode, GainNode, OscillatorNode, OscillatorType,
};

use super::{AudioContext, ContextState, ImpulseResponse, NodeId, NodeKind, ParamName, Port};
use crate::error::AudioError;
use crate::sequence::Waveform;

const DESTINATION: NodeId = NodeId(0);

enum WebNode {
    Destination(AudioNode),
    Gain(GainNode),
    Oscillator(OscillatorNode),
    Delay(DelayNode),
    Convolver(ConvolverNode),
    ConstantSource(ConstantSourceNode),
}

impl WebNode {
    fn kind(&self) -> NodeKind {
        match self {
            WebNode::Destination(_) => NodeKind::Destination,
            WebNode::Gain(_) => NodeKind::Gain,
            WebNode::Oscillator(_) => NodeKind::Oscillator,
            WebNode::Delay(_) => NodeKind::Delay,
            WebNode::Convolver(_) => NodeKind::Convolver,
            WebNode::ConstantSource(_) => NodeKind::ConstantSource,
        }
    }

    fn audio_node(&self) -> &AudioNode {
        match self {
            WebNode::Destination(n) => n,
            WebNode::Gain(n) => n.as_ref(),
            WebNode::Oscillator(n) => n.as_ref(),
            WebNode::Delay(n) => n.as_ref(),
            WebNode::Convolver(n) => n.as_ref(),
            WebNode::ConstantSource(n) => n.as_ref(),
        }
    }

    fn param(&self, name: ParamName) -> Option<AudioParam> {
        match (self, name) {
            (WebNode::Gain(n), ParamName::Gain) => Some(n.gain()),
            (WebNode::Oscillator(n), ParamName::Frequency) => Some(n.frequency()),
            (WebNode::Delay(n), ParamName::DelayTime) => Some(n.delay_time()),
            (WebNode::ConstantSource(n), ParamName::Offset) => Some(n.offset()),
            _ => None,
        }
    }

    fn source(&self) -> Option<&AudioScheduledSourceNode> {
        match self {
            WebNode::Oscillator(n) => Some(n.as_ref()),
            WebNode::ConstantSource(n) => Some(n.as_ref()),
            _ => None,
        }
    }
}

fn backend(e: JsValue) -> AudioError {
    AudioError::Backend(e.as_string().unwrap_or_else(|| format!("{e:?}")))
}

fn allocation(kind: NodeKind) -> impl FnOnce(JsValue) -> AudioError {
    move |e| AudioError::Allocation {
        kind,
        reason: e.as_string().unwrap_or_else(|| format!("{e:?}")),
    }
}

fn oscillator_type(waveform: Waveform) -> OscillatorType {
    match waveform {
        Waveform::Sine => OscillatorType::Sine,
        Waveform::Square => OscillatorType::Square,
        Waveform::Sawtooth => OscillatorType::Sawtooth,
        Waveform::Triangle => OscillatorType::Triangle,
    }
}

/// A browser `AudioContext`. Node handles index into a local table; a
/// released node is dropped from the table and left to the browser's
/// own lifetime rules.
pub struct WebAudioContext {
    ctx: web_sys::AudioContext,
    nodes: Vec<Option<WebNode>>,
}

impl WebAudioContext {
    pub fn new() -> Result<Self, AudioError> {
        let ctx = web_sys::AudioContext::new().map_err(backend)?;
        let destination = ctx.destination();
        Ok(WebAudioContext {
            nodes: vec![Some(WebNode::Destination(destination.into()))],
            ctx,
        })
    }

    pub fn inner(&self) -> &web_sys::AudioContext {
        &self.ctx
    }

    fn node(&self, id: NodeId) -> Result<&WebNode, AudioError> {
        self.nodes
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(AudioError::UnknownNode(id))
    }

    fn param(&self, id: NodeId, name: ParamName) -> Result<AudioParam, AudioError> {
        let node = self.node(id)?;
        node.param(name).ok_or_else(|| {
            AudioError::InvalidState(format!("{:?} node {id} has no {name:?} parameter", node.kind()))
        })
    }

    fn source(&self, id: NodeId) -> Result<&AudioScheduledSourceNode, AudioError> {
        let node = self.node(id)?;
        node.source()
            .ok_or_else(|| AudioError::InvalidState(format!("{:?} node {id} is not a source", node.kind())))
    }

    fn insert(&mut self, node: WebNode) -> NodeId {
        if let Some(index) = self.nodes.iter().position(Option::is_none) {
            self.nodes[index] = Some(node);
            return NodeId(index as u32);
        }
        self.nodes.push(Some(node));
        NodeId((self.nodes.len() - 1) as u32)
    }
}

impl AudioContext for WebAudioContext {
    fn current_time(&self) -> f64 {
        self.ctx.current_time()
    }

    fn sample_rate(&self) -> f32 {
        self.ctx.sample_rate()
    }

    fn state(&self) -> ContextState {
        match self.ctx.state() {
            AudioContextState::Running => ContextState::Running,
            AudioContextState::Suspended => ContextState::Suspended,
            _ => ContextState::Closed,
        }
    }

    fn resume(&mut self) -> Result<(), AudioError> {
        let promise = self.ctx.resume().map_err(backend)?;
        wasm_bindgen_futures::spawn_local(async move {
            if let Err(e) = JsFuture::from(promise).await {
                log::warn!("audio context resume rejected: {e:?}");
            }
        });
        Ok(())
    }

    fn destination(&self) -> NodeId {
        DESTINATION
    }

    fn create_gain(&mut self) -> Result<NodeId, AudioError> {
        let node = self.ctx.create_gain().map_err(allocation(NodeKind::Gain))?;
        Ok(self.insert(WebNode::Gain(node)))
    }

    fn create_oscillator(&mut self, waveform: Waveform) -> Result<NodeId, AudioError> {
        let node = self
            .ctx
            .create_oscillator()
            .map_err(allocation(NodeKind::Oscillator))?;
        node.set_type(oscillator_type(waveform));
        Ok(self.insert(WebNode::Oscillator(node)))
    }

    fn create_delay(&mut self, max_delay: f64) -> Result<NodeId, AudioError> {
        let node = self
            .ctx
            .create_delay_with_max_delay_time(max_delay)
            .map_err(allocation(NodeKind::Delay))?;
        Ok(self.insert(WebNode::Delay(node)))
    }

    fn create_convolver(&mut self, impulse: &ImpulseResponse) -> Result<NodeId, AudioError> {
        let kind = NodeKind::Convolver;
        let channels = impulse.channels.len().max(1) as u32;
        let length = impulse.len().max(1) as u32;
        let buffer = self
            .ctx
            .create_buffer(channels, length, impulse.sample_rate)
            .map_err(allocation(kind))?;
        for (channel, data) in impulse.channels.iter().enumerate() {
            let mut samples = data.clone();
            buffer
                .copy_to_channel(&mut samples, channel as i32)
                .map_err(allocation(kind))?;
        }
        let node = self.ctx.create_convolver().map_err(allocation(kind))?;
        node.set_normalize(true);
        node.set_buffer(Some(&buffer));
        Ok(self.insert(WebNode::Convolver(node)))
    }

    fn create_constant_source(&mut self) -> Result<NodeId, AudioError> {
        let node = self
            .ctx
            .create_constant_source()
            .map_err(allocation(NodeKind::ConstantSource))?;
        Ok(self.insert(WebNode::ConstantSource(node)))
    }

    fn release(&mut self, node: NodeId) {
        if node == DESTINATION {
            return;
        }
        if let Some(slot) = self.nodes.get_mut(node.0 as usize) {
            *slot = None;
        }
    }

    fn connect(&mut self, from: NodeId, to: Port) -> Result<(), AudioError> {
        let source = self.node(from)?.audio_node();
        match to {
            Port::Input(id) => {
                source
                    .connect_with_audio_node(self.node(id)?.audio_node())
                    .map_err(backend)?;
            }
            Port::Param(id, name) => {
                source
                    .connect_with_audio_param(&self.param(id, name)?)
                    .map_err(backend)?;
            }
        }
        Ok(())
    }

    fn disconnect(&mut self, from: NodeId, to: Port) -> Result<(), AudioError> {
        let source = self.node(from)?.audio_node();
        match to {
            Port::Input(id) => source
                .disconnect_with_audio_node(self.node(id)?.audio_node())
                .map_err(backend),
            Port::Param(id, name) => source
                .disconnect_with_audio_param(&self.param(id, name)?)
                .map_err(backend),
        }
    }

    fn set_value_at_time(
        &mut self,
        node: NodeId,
        param: ParamName,
        value: f32,
        time: f64,
    ) -> Result<(), AudioError> {
        self.param(node, param)?
            .set_value_at_time(value, time)
            .map_err(backend)?;
        Ok(())
    }

    fn linear_ramp_to_value_at_time(
        &mut self,
        node: NodeId,
        param: ParamName,
        value: f32,
        time: f64,
    ) -> Result<(), AudioError> {
        self.param(node, param)?
            .linear_ramp_to_value_at_time(value, time)
            .map_err(backend)?;
        Ok(())
    }

    fn cancel_scheduled_values(
        &mut self,
        node: NodeId,
        param: ParamName,
        time: f64,
    ) -> Result<(), AudioError> {
        self.param(node, param)?
            .cancel_scheduled_values(time)
            .map_err(backend)?;
        Ok(())
    }

    fn param_value(&self, node: NodeId, param: ParamName) -> Result<f32, AudioError> {
        Ok(self.param(node, param)?.value())
    }

    fn start(&mut self, node: NodeId, when: f64) -> Result<(), AudioError> {
        self.source(node)?.start_with_when(when).map_err(backend)
    }

    fn stop(&mut self, node: NodeId, when: f64) -> Result<(), AudioError> {
        self.source(node)?.stop_with_when(when).map_err(backend)
    }
}
