//! Declarative wiring.
//!
//! Routing is described as a flat list of [`Edge`]s. [`Wiring`] holds the
//! edges currently applied to a context and moves to a new description
//! with the fewest connect/disconnect calls, removals first.

use crate::audio::{AudioContext, NodeId, Port};
use crate::error::AudioError;

/// One connection in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub from: NodeId,
    pub to: Port,
}

impl Edge {
    pub fn new(from: NodeId, to: Port) -> Self {
        Edge { from, to }
    }

    /// Signal edge into a node's input.
    pub fn input(from: NodeId, to: NodeId) -> Self {
        Edge::new(from, Port::Input(to))
    }

    pub fn touches(&self, node: NodeId) -> bool {
        self.from == node || self.to.node() == node
    }
}

/// The set of edges currently connected in a context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Wiring {
    edges: Vec<Edge>,
}

impl Wiring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn contains(&self, edge: &Edge) -> bool {
        self.edges.contains(edge)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Bring the context from the current edges to `desired`.
    ///
    /// Duplicate edges in `desired` are collapsed. On error `self` still
    /// reflects exactly what is connected, so a later call can retry.
    pub fn reconcile<C: AudioContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        desired: &[Edge],
    ) -> Result<(), AudioError> {
        let mut target: Vec<Edge> = Vec::with_capacity(desired.len());
        for edge in desired {
            if !target.contains(edge) {
                target.push(*edge);
            }
        }

        let stale: Vec<Edge> = self
            .edges
            .iter()
            .filter(|e| !target.contains(e))
            .copied()
            .collect();
        for edge in stale {
            ctx.disconnect(edge.from, edge.to)?;
            self.edges.retain(|e| *e != edge);
            log::debug!("disconnect {} -> {}", edge.from, edge.to);
        }

        for edge in target {
            if !self.edges.contains(&edge) {
                ctx.connect(edge.from, edge.to)?;
                self.edges.push(edge);
                log::debug!("connect {} -> {}", edge.from, edge.to);
            }
        }
        Ok(())
    }

    /// Disconnect every edge touching `node` and forget them.
    pub fn detach<C: AudioContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        node: NodeId,
    ) -> Result<(), AudioError> {
        let desired: Vec<Edge> = self
            .edges
            .iter()
            .filter(|e| !e.touches(node))
            .copied()
            .collect();
        self.reconcile(ctx, &desired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{OfflineContext, ParamName};

    #[test]
    fn reconcile_connects_missing_edges() {
        let mut ctx = OfflineContext::new(8000.0);
        let a = ctx.create_gain().unwrap();
        let b = ctx.create_gain().unwrap();
        let out = ctx.destination();
        let mut wiring = Wiring::new();
        wiring
            .reconcile(&mut ctx, &[Edge::input(a, b), Edge::input(b, out)])
            .unwrap();
        assert_eq!(wiring.len(), 2);
        assert_eq!(ctx.connection_count(a, Port::Input(b)), 1);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let mut ctx = OfflineContext::new(8000.0);
        let a = ctx.create_gain().unwrap();
        let b = ctx.create_gain().unwrap();
        let desired = [Edge::input(a, b)];
        let mut wiring = Wiring::new();
        wiring.reconcile(&mut ctx, &desired).unwrap();
        wiring.reconcile(&mut ctx, &desired).unwrap();
        assert_eq!(ctx.connection_count(a, Port::Input(b)), 1);
    }

    #[test]
    fn reconcile_removes_stale_edges_only() {
        let mut ctx = OfflineContext::new(8000.0);
        let a = ctx.create_gain().unwrap();
        let b = ctx.create_gain().unwrap();
        let c = ctx.create_gain().unwrap();
        let mut wiring = Wiring::new();
        wiring
            .reconcile(&mut ctx, &[Edge::input(a, b), Edge::input(b, c)])
            .unwrap();
        wiring
            .reconcile(&mut ctx, &[Edge::input(a, c), Edge::input(b, c)])
            .unwrap();
        assert_eq!(ctx.connection_count(a, Port::Input(b)), 0);
        assert_eq!(ctx.connection_count(a, Port::Input(c)), 1);
        assert_eq!(ctx.connection_count(b, Port::Input(c)), 1);
    }

    #[test]
    fn duplicate_desired_edges_collapse() {
        let mut ctx = OfflineContext::new(8000.0);
        let a = ctx.create_gain().unwrap();
        let b = ctx.create_gain().unwrap();
        let mut wiring = Wiring::new();
        wiring
            .reconcile(&mut ctx, &[Edge::input(a, b), Edge::input(a, b)])
            .unwrap();
        assert_eq!(ctx.connection_count(a, Port::Input(b)), 1);
    }

    #[test]
    fn detach_drops_param_edges_too() {
        let mut ctx = OfflineContext::new(8000.0);
        let lfo = ctx.create_constant_source().unwrap();
        let g = ctx.create_gain().unwrap();
        let mut wiring = Wiring::new();
        let param_edge = Edge::new(lfo, Port::Param(g, ParamName::Gain));
        wiring.reconcile(&mut ctx, &[param_edge]).unwrap();
        wiring.detach(&mut ctx, g).unwrap();
        assert!(wiring.is_empty());
        assert_eq!(ctx.connection_count(lfo, Port::Param(g, ParamName::Gain)), 0);
    }
}
