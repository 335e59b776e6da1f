//! Modules: named units with typed ports.
//!
//! The set of module kinds is closed. User state lives in buffers and
//! memories, the structural builders register their own kinds, and the
//! compiler adds helper modules for computations a plain connection cannot
//! express.

use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::vocab::Vocabulary;

/// Name of the default input port.
pub const INPUT: &str = "input";
/// Name of the default output port.
pub const OUTPUT: &str = "output";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PortDirection {
    Input,
    Output,
}

/// Vocabulary binding of a port.
#[derive(Debug, Clone)]
pub enum PortVocab {
    /// Use the model's vocabulary for the port's dimensionality; resolved to
    /// `Explicit` when the module is registered.
    Default,
    Explicit(Arc<Vocabulary>),
    /// Plain numeric port (utilities, gates, helper internals).
    NonSemantic,
}

#[derive(Debug, Clone)]
pub struct Port {
    pub name: String,
    pub direction: PortDirection,
    pub dimensions: usize,
    pub vocab: PortVocab,
}

impl Port {
    pub fn input(name: &str, dimensions: usize, vocab: PortVocab) -> Self {
        Self {
            name: name.to_string(),
            direction: PortDirection::Input,
            dimensions,
            vocab,
        }
    }

    pub fn output(name: &str, dimensions: usize, vocab: PortVocab) -> Self {
        Self {
            name: name.to_string(),
            direction: PortDirection::Output,
            dimensions,
            vocab,
        }
    }

    pub fn vocabulary(&self) -> Option<&Arc<Vocabulary>> {
        match &self.vocab {
            PortVocab::Explicit(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_semantic(&self) -> bool {
        !matches!(self.vocab, PortVocab::NonSemantic)
    }
}

/// Static nonlinearity applied to a connection's source before its transform.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Nonlinearity {
    /// `gain * max(x - threshold, 0)`.
    Rectify { threshold: f32, gain: f32 },
    /// `max(x - threshold, 0)`, used to sharpen thalamic channels.
    Threshold(f32),
}

impl Nonlinearity {
    pub fn apply(&self, x: f32) -> f32 {
        match *self {
            Nonlinearity::Rectify { threshold, gain } => gain * (x - threshold).max(0.0),
            Nonlinearity::Threshold(threshold) => (x - threshold).max(0.0),
        }
    }
}

/// Helper structures created on demand by the compiler or the builders.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum HelperKind {
    /// Constant 1.0 source.
    Bias,
    /// Circular convolution of inputs `a` and `b`.
    Product { dimensions: usize },
    /// Dot product of inputs `a` and `b`.
    DotProduct { dimensions: usize },
    /// Independent scalar channels.
    EnsembleArray { channels: usize },
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ModuleKind {
    Buffer,
    Memory { synapse: f32 },
    Cortical { synapse: f32 },
    /// Relays `input` to `utility` and `inhibition` to `output`.
    BasalGanglia { channels: usize },
    Thalamus { channels: usize, threshold: f32 },
    Helper(HelperKind),
    Custom,
}

/// Access to a unit's ports.
pub trait HasPorts {
    fn ports(&self) -> &[Port];

    fn port(&self, name: &str) -> Option<&Port> {
        self.ports().iter().find(|p| p.name == name)
    }

    fn default_input(&self) -> Option<&Port> {
        self.port(INPUT)
            .filter(|p| p.direction == PortDirection::Input)
    }

    fn default_output(&self) -> Option<&Port> {
        self.port(OUTPUT)
            .filter(|p| p.direction == PortDirection::Output)
    }
}

/// Access to the vocabulary a port speaks.
pub trait HasVocabulary: HasPorts {
    fn vocab(&self, port: &str) -> Option<&Arc<Vocabulary>> {
        self.port(port).and_then(Port::vocabulary)
    }
}

#[derive(Debug, Clone)]
pub struct Module {
    kind: ModuleKind,
    ports: Vec<Port>,
}

impl Module {
    pub fn new(kind: ModuleKind) -> Self {
        Self {
            kind,
            ports: Vec::new(),
        }
    }

    /// Semantic input and output of `dimensions` on the default vocabulary.
    pub fn buffer(dimensions: usize) -> Self {
        Self::new(ModuleKind::Buffer)
            .with_input(INPUT, dimensions)
            .with_output(OUTPUT, dimensions)
    }

    /// A buffer whose state is held by a recurrent filter of `synapse`.
    pub fn memory(dimensions: usize, synapse: f32) -> Self {
        Self::new(ModuleKind::Memory { synapse })
            .with_input(INPUT, dimensions)
            .with_output(OUTPUT, dimensions)
    }

    pub fn custom() -> Self {
        Self::new(ModuleKind::Custom)
    }

    pub(crate) fn helper(kind: HelperKind) -> Self {
        let m = Self::new(ModuleKind::Helper(kind.clone()));
        match kind {
            HelperKind::Bias => m.with_port(Port::output(OUTPUT, 1, PortVocab::NonSemantic)),
            HelperKind::Product { dimensions } => m
                .with_port(Port::input("a", dimensions, PortVocab::NonSemantic))
                .with_port(Port::input("b", dimensions, PortVocab::NonSemantic))
                .with_port(Port::output(OUTPUT, dimensions, PortVocab::NonSemantic)),
            HelperKind::DotProduct { dimensions } => m
                .with_port(Port::input("a", dimensions, PortVocab::NonSemantic))
                .with_port(Port::input("b", dimensions, PortVocab::NonSemantic))
                .with_port(Port::output(OUTPUT, 1, PortVocab::NonSemantic)),
            HelperKind::EnsembleArray { channels } => m
                .with_port(Port::input(INPUT, channels, PortVocab::NonSemantic))
                .with_port(Port::output(OUTPUT, channels, PortVocab::NonSemantic)),
        }
    }

    pub fn with_port(mut self, port: Port) -> Self {
        self.ports.push(port);
        self
    }

    /// Semantic input on the default vocabulary.
    pub fn with_input(self, name: &str, dimensions: usize) -> Self {
        self.with_port(Port::input(name, dimensions, PortVocab::Default))
    }

    /// Semantic output on the default vocabulary.
    pub fn with_output(self, name: &str, dimensions: usize) -> Self {
        self.with_port(Port::output(name, dimensions, PortVocab::Default))
    }

    /// Bind every semantic port of matching dimensionality to `vocab`.
    pub fn with_vocab(mut self, vocab: Arc<Vocabulary>) -> Self {
        for p in &mut self.ports {
            if p.is_semantic() && p.dimensions == vocab.dimensions() {
                p.vocab = PortVocab::Explicit(vocab.clone());
            }
        }
        self
    }

    pub fn kind(&self) -> &ModuleKind {
        &self.kind
    }

    pub fn is_helper(&self) -> bool {
        matches!(self.kind, ModuleKind::Helper(_))
    }

    pub(crate) fn ports_mut(&mut self) -> &mut [Port] {
        &mut self.ports
    }
}

impl HasPorts for Module {
    fn ports(&self) -> &[Port] {
        &self.ports
    }
}

impl HasVocabulary for Module {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prng::SharedPrng;

    #[test]
    fn buffer_has_default_ports() {
        let m = Module::buffer(16);
        assert_eq!(m.default_input().map(|p| p.dimensions), Some(16));
        assert_eq!(m.default_output().map(|p| p.dimensions), Some(16));
        assert!(m.vocab(OUTPUT).is_none(), "default vocab is bound at registration");
    }

    #[test]
    fn with_vocab_binds_matching_ports() {
        let v = Arc::new(Vocabulary::new(8, SharedPrng::new(1)));
        let m = Module::custom()
            .with_input("x", 8)
            .with_input("y", 4)
            .with_vocab(v.clone());
        assert!(Arc::ptr_eq(m.vocab("x").unwrap(), &v));
        assert!(m.vocab("y").is_none());
    }

    #[test]
    fn helper_ports_are_non_semantic() {
        let m = Module::helper(HelperKind::DotProduct { dimensions: 8 });
        assert!(m.ports().iter().all(|p| !p.is_semantic()));
        assert_eq!(m.default_output().map(|p| p.dimensions), Some(1));
        assert!(m.default_input().is_none());
    }

    #[test]
    fn rectify_nonlinearity() {
        let f = Nonlinearity::Rectify {
            threshold: 0.2,
            gain: 2.0,
        };
        assert_eq!(f.apply(0.1), 0.0);
        assert!((f.apply(0.7) - 1.0).abs() < 1e-6);
        assert_eq!(Nonlinearity::Threshold(0.5).apply(0.25), 0.0);
    }
}
