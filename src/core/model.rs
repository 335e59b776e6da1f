//! The model: a registry of named modules plus the connections emitted
//! between them.
//!
//! Module names form a namespace; a dotted name such as `vision.edges` is a
//! module registered inside the `vision` scope. Port references are written
//! `module` (default port) or `module.port`.

use core::fmt;
use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SpaError};
use crate::module::{HasPorts, Module, Nonlinearity, Port, PortDirection, PortVocab, INPUT, OUTPUT};
use crate::prng::SharedPrng;
use crate::transform::Transform;
use crate::vocab::{Vocabulary, VocabularyMap};

/// One port of one module, optionally narrowed to a single element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PortRef {
    pub module: String,
    pub port: String,
    pub index: Option<usize>,
}

impl PortRef {
    pub fn new(module: &str, port: &str) -> Self {
        Self {
            module: module.to_string(),
            port: port.to_string(),
            index: None,
        }
    }

    pub fn element(module: &str, port: &str, index: usize) -> Self {
        Self {
            module: module.to_string(),
            port: port.to_string(),
            index: Some(index),
        }
    }

    /// Width of the referenced signal given the port's width.
    pub fn width(&self, port_dimensions: usize) -> usize {
        if self.index.is_some() {
            1
        } else {
            port_dimensions
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.port)?;
        if let Some(i) = self.index {
            write!(f, "[{i}]")?;
        }
        Ok(())
    }
}

/// A connection the simulator has to build.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConnectionSpec {
    pub source: PortRef,
    pub sink: PortRef,
    /// `sink width × source width`.
    pub transform: Transform,
    /// Synaptic time constant in seconds; `None` means unfiltered.
    pub synapse: Option<f32>,
    pub function: Option<Nonlinearity>,
    /// Scalar signal multiplying the connection (a thalamic channel).
    pub gate: Option<PortRef>,
    /// Index of the action that produced this connection.
    pub action: Option<usize>,
}

impl ConnectionSpec {
    pub fn new(source: PortRef, sink: PortRef, transform: Transform) -> Self {
        Self {
            source,
            sink,
            transform,
            synapse: None,
            function: None,
            gate: None,
            action: None,
        }
    }

    pub fn with_synapse(mut self, synapse: f32) -> Self {
        self.synapse = Some(synapse);
        self
    }

    pub fn with_function(mut self, function: Nonlinearity) -> Self {
        self.function = Some(function);
        self
    }

    pub fn with_gate(mut self, gate: PortRef) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn for_action(mut self, index: usize) -> Self {
        self.action = Some(index);
        self
    }
}

/// Name segments are identifiers; leading underscores are reserved for
/// model-owned helpers.
pub(crate) fn check_module_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.split('.').all(|seg| {
            let mut chars = seg.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if !valid {
        return Err(SpaError::validation_in(
            "Model",
            "name",
            format!("'{name}' is not a valid module name"),
        ));
    }
    Ok(())
}

/// Every port carries at least one dimension.
pub(crate) fn check_module_ports(name: &str, module: &Module) -> Result<()> {
    match module.ports().iter().find(|p| p.dimensions == 0) {
        Some(p) => Err(SpaError::validation_in(
            "Model",
            "dimensions",
            format!("port '{}' of '{name}' has zero dimensions", p.name),
        )),
        None => Ok(()),
    }
}

#[derive(Debug)]
pub struct Model {
    label: String,
    modules: BTreeMap<String, Module>,
    // Registration order, for stable listings.
    order: Vec<String>,
    connections: Vec<ConnectionSpec>,
    vocabs: VocabularyMap,
}

impl Model {
    pub fn new(label: &str) -> Self {
        Self::with_vocabs(label, VocabularyMap::default())
    }

    /// Model whose default vocabularies draw from a generator seeded with `seed`.
    pub fn with_seed(label: &str, seed: u64) -> Self {
        Self::with_vocabs(label, VocabularyMap::new(SharedPrng::new(seed)))
    }

    pub fn with_vocabs(label: &str, vocabs: VocabularyMap) -> Self {
        Self {
            label: label.to_string(),
            modules: BTreeMap::new(),
            order: Vec::new(),
            connections: Vec::new(),
            vocabs,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn vocabs(&self) -> &VocabularyMap {
        &self.vocabs
    }

    pub fn vocabs_mut(&mut self) -> &mut VocabularyMap {
        &mut self.vocabs
    }

    /// Shorthand for `vocabs_mut().get_or_create(dimensions)`.
    pub fn default_vocab(&mut self, dimensions: usize) -> Arc<Vocabulary> {
        self.vocabs.get_or_create(dimensions)
    }

    /// Register `module` under `name`, binding its default-vocabulary ports.
    pub fn register(&mut self, name: &str, module: Module) -> Result<()> {
        check_module_name(name)?;
        check_module_ports(name, &module)?;
        if self.modules.contains_key(name) {
            return Err(SpaError::DuplicateName {
                name: name.to_string(),
            });
        }
        self.insert(name.to_string(), module);
        Ok(())
    }

    // Callers have already checked the name.
    pub(crate) fn insert(&mut self, name: String, mut module: Module) {
        for port in module.ports_mut() {
            if matches!(port.vocab, PortVocab::Default) {
                port.vocab = PortVocab::Explicit(self.vocabs.get_or_create(port.dimensions));
            }
        }
        debug!(module = %name, kind = ?module.kind(), "registered module");
        self.order.push(name.clone());
        self.modules.insert(name, module);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    /// Port widths of a module, by port name.
    pub fn ports(&self, name: &str) -> Option<BTreeMap<String, usize>> {
        self.lookup(name).map(|m| {
            m.ports()
                .iter()
                .map(|p| (p.name.clone(), p.dimensions))
                .collect()
        })
    }

    /// Module names in registration order.
    pub fn module_names(&self) -> &[String] {
        &self.order
    }

    pub fn modules(&self) -> impl Iterator<Item = (&str, &Module)> {
        self.order
            .iter()
            .filter_map(move |n| self.modules.get(n).map(|m| (n.as_str(), m)))
    }

    pub fn connections(&self) -> &[ConnectionSpec] {
        &self.connections
    }

    /// Resolve `name` to an output port: `module` means its default output,
    /// `module.port` a named one.
    pub fn resolve_output(&self, name: &str) -> Option<(PortRef, &Port)> {
        resolve(|n| self.modules.get(n), name, PortDirection::Output)
    }

    /// Resolve `name` to an input port, like [`resolve_output`](Self::resolve_output).
    pub fn resolve_input(&self, name: &str) -> Option<(PortRef, &Port)> {
        resolve(|n| self.modules.get(n), name, PortDirection::Input)
    }

    pub(crate) fn port_of(&self, r: &PortRef) -> Option<&Port> {
        self.modules.get(&r.module).and_then(|m| m.port(&r.port))
    }

    /// Validate and store a connection.
    pub fn connect(&mut self, spec: ConnectionSpec) -> Result<()> {
        validate_connection(&spec, |r| self.port_of(r))?;
        self.connections.push(spec);
        Ok(())
    }

    pub(crate) fn push_connection(&mut self, spec: ConnectionSpec) {
        self.connections.push(spec);
    }

    /// Open a registration scope that prefixes every name with `prefix.`.
    ///
    /// Modules registered through the scope become visible in the model when
    /// the scope is finished or dropped.
    pub fn scope(&mut self, prefix: &str) -> Result<ModelScope<'_>> {
        check_module_name(prefix)?;
        Ok(ModelScope {
            model: self,
            prefix: prefix.to_string(),
            staged: Vec::new(),
        })
    }
}

pub(crate) fn resolve<'a>(
    lookup: impl Fn(&str) -> Option<&'a Module>,
    name: &str,
    direction: PortDirection,
) -> Option<(PortRef, &'a Port)> {
    let default = match direction {
        PortDirection::Input => INPUT,
        PortDirection::Output => OUTPUT,
    };
    if let Some(m) = lookup(name) {
        if let Some(p) = m.port(default).filter(|p| p.direction == direction) {
            return Some((PortRef::new(name, default), p));
        }
    }
    let (module, port) = name.rsplit_once('.')?;
    let p = lookup(module)?
        .port(port)
        .filter(|p| p.direction == direction)?;
    Some((PortRef::new(module, port), p))
}

pub(crate) fn validate_connection<'a>(
    spec: &ConnectionSpec,
    port_of: impl Fn(&PortRef) -> Option<&'a Port>,
) -> Result<()> {
    let endpoint = |r: &PortRef, direction: PortDirection| -> Result<usize> {
        let p = port_of(r)
            .filter(|p| p.direction == direction)
            .ok_or_else(|| SpaError::NameResolution {
                name: r.to_string(),
                action: None,
            })?;
        if let Some(i) = r.index {
            if i >= p.dimensions {
                return Err(SpaError::mismatch(p.dimensions, i + 1, format!("index into {r}")));
            }
        }
        Ok(r.width(p.dimensions))
    };

    let src = endpoint(&spec.source, PortDirection::Output)?;
    let dst = endpoint(&spec.sink, PortDirection::Input)?;
    let (rows, cols) = spec.transform.shape();
    if rows != dst {
        return Err(SpaError::mismatch(dst, rows, format!("transform rows for {}", spec.sink)));
    }
    if cols != src {
        return Err(SpaError::mismatch(src, cols, format!("transform cols for {}", spec.source)));
    }
    if let Some(g) = &spec.gate {
        let w = endpoint(g, PortDirection::Output)?;
        if w != 1 {
            return Err(SpaError::mismatch(1, w, format!("gate {g}")));
        }
    }
    Ok(())
}

/// Registration phase for one namespace of a [`Model`].
pub struct ModelScope<'m> {
    model: &'m mut Model,
    prefix: String,
    staged: Vec<(String, Module)>,
}

impl<'m> ModelScope<'m> {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full_name(&self, name: &str) -> String {
        format!("{}.{}", self.prefix, name)
    }

    /// Register `module` as `prefix.name`. Returns the full name.
    pub fn register(&mut self, name: &str, module: Module) -> Result<String> {
        let full = self.full_name(name);
        check_module_name(&full)?;
        check_module_ports(&full, &module)?;
        if self.model.contains(&full) || self.staged.iter().any(|(n, _)| *n == full) {
            return Err(SpaError::DuplicateName { name: full });
        }
        self.staged.push((full.clone(), module));
        Ok(full)
    }

    /// Look up a module registered in this scope (by short name) or already
    /// in the model (by full name).
    pub fn lookup(&self, name: &str) -> Option<&Module> {
        let full = self.full_name(name);
        self.staged
            .iter()
            .find(|(n, _)| *n == full)
            .map(|(_, m)| m)
            .or_else(|| self.model.lookup(name))
    }

    /// Close the scope and return the full names it registered.
    pub fn finish(mut self) -> Vec<String> {
        self.commit()
    }

    fn commit(&mut self) -> Vec<String> {
        let staged = std::mem::take(&mut self.staged);
        let mut names = Vec::with_capacity(staged.len());
        for (name, module) in staged {
            names.push(name.clone());
            self.model.insert(name, module);
        }
        names
    }
}

impl Drop for ModelScope<'_> {
    fn drop(&mut self) {
        self.commit();
    }
}
