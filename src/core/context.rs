//! Build-time state for one compilation pass.
//!
//! A [`ConstructionContext`] borrows the target [`Model`] exclusively. Every
//! helper module and connection produced during the pass is staged here and
//! only written to the model by [`ConstructionContext::commit`]. Symbols the
//! pass adds to a vocabulary are written immediately so later actions see
//! them; dropping the context without committing forgets them again and
//! rewinds the random source, leaving the model exactly as it was.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::ast::StructuralKey;
use crate::error::{Result, SpaError};
use crate::model::{check_module_name, resolve, validate_connection, ConnectionSpec, Model, PortRef};
use crate::model::check_module_ports;
use crate::module::{HasPorts, HelperKind, Module, Nonlinearity, Port, PortDirection, OUTPUT};
use crate::pointer::SemanticPointer;
use crate::prng::{Prng, SharedPrng};
use crate::vocab::Vocabulary;

/// Name of the model-level constant source.
pub const BIAS_MODULE: &str = "_bias";

/// The structural role the compiled actions are emitted for.
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    /// Unconditional direct connections.
    Cortical { owner: String, synapse: f32 },
    /// Conditions become utility inputs of `owner.input[i]`.
    BasalGanglia {
        owner: String,
        channels: usize,
        synapse: f32,
    },
    /// Effects are gated by `owner.output[i]`.
    Thalamus {
        owner: String,
        channels: usize,
        synapse: f32,
        /// Threshold applied to every signal read from a channel.
        threshold: f32,
    },
}

impl Role {
    pub fn owner(&self) -> &str {
        match self {
            Role::Cortical { owner, .. }
            | Role::BasalGanglia { owner, .. }
            | Role::Thalamus { owner, .. } => owner,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Role::Cortical { .. } => "Cortical",
            Role::BasalGanglia { .. } => "BasalGanglia",
            Role::Thalamus { .. } => "Thalamus",
        }
    }

    pub fn synapse(&self) -> f32 {
        match self {
            Role::Cortical { synapse, .. }
            | Role::BasalGanglia { synapse, .. }
            | Role::Thalamus { synapse, .. } => *synapse,
        }
    }

    /// Nonlinearity on connections whose source is a gating channel.
    pub fn channel_function(&self) -> Option<Nonlinearity> {
        match self {
            Role::Thalamus { threshold, .. } => Some(Nonlinearity::Threshold(*threshold)),
            _ => None,
        }
    }
}

pub struct ConstructionContext<'m> {
    model: &'m mut Model,
    role: Role,
    staged_modules: Vec<(String, Module)>,
    staged_connections: Vec<ConnectionSpec>,
    helpers: HashMap<StructuralKey, String>,
    // Rollback state: dimensionalities of the model vocabularies when the
    // pass began, symbol counts of the vocabularies it wrote to, and the
    // random sources it drew from.
    vocab_dims: Vec<usize>,
    touched: Vec<(Arc<Vocabulary>, usize)>,
    rng_states: Vec<(SharedPrng, Prng)>,
    committed: bool,
}

impl<'m> ConstructionContext<'m> {
    pub fn new(model: &'m mut Model, role: Role) -> Self {
        let vocab_dims = model.vocabs().iter().map(|v| v.dimensions()).collect();
        let rng = model.vocabs().rng().clone();
        let state = rng.snapshot();
        Self {
            model,
            role,
            staged_modules: Vec::new(),
            staged_connections: Vec::new(),
            helpers: HashMap::new(),
            vocab_dims,
            touched: Vec::new(),
            rng_states: vec![(rng, state)],
            committed: false,
        }
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn model(&self) -> &Model {
        &*self.model
    }

    pub fn staged_connections(&self) -> &[ConnectionSpec] {
        &self.staged_connections
    }

    /// Vocabulary of a semantic port, falling back to the model default for
    /// its dimensionality.
    pub fn vocab_of(&mut self, port: &Port) -> Arc<Vocabulary> {
        match port.vocabulary() {
            Some(v) => v.clone(),
            None => self.model.vocabs_mut().get_or_create(port.dimensions),
        }
    }

    /// `vocab.create_pointer(name)`, undone if the pass is abandoned.
    pub fn create_pointer(&mut self, vocab: &Arc<Vocabulary>, name: &str) -> Result<SemanticPointer> {
        if !self.touched.iter().any(|(v, _)| Arc::ptr_eq(v, vocab)) {
            self.touched.push((vocab.clone(), vocab.len()));
        }
        if !self.rng_states.iter().any(|(r, _)| r.ptr_eq(vocab.rng())) {
            self.rng_states.push((vocab.rng().clone(), vocab.rng().snapshot()));
        }
        vocab.create_pointer(name)
    }

    fn staged(&self, name: &str) -> Option<&Module> {
        self.staged_modules
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m)
    }

    fn exists(&self, name: &str) -> bool {
        self.model.contains(name) || self.staged(name).is_some()
    }

    fn lookup_port(&self, r: &PortRef) -> Option<&Port> {
        self.staged(&r.module)
            .or_else(|| self.model.lookup(&r.module))
            .and_then(|m| m.port(&r.port))
    }

    /// Resolve an output port in the model or among staged helpers.
    pub fn resolve_output(&self, name: &str) -> Option<(PortRef, Port)> {
        self.resolve(name, PortDirection::Output)
    }

    pub fn resolve_input(&self, name: &str) -> Option<(PortRef, Port)> {
        self.resolve(name, PortDirection::Input)
    }

    fn resolve(&self, name: &str, direction: PortDirection) -> Option<(PortRef, Port)> {
        resolve(
            |n| self.staged(n).or_else(|| self.model.lookup(n)),
            name,
            direction,
        )
        .map(|(r, p)| (r, p.clone()))
    }

    /// Stage a module under an exact name.
    pub fn stage_module(&mut self, name: &str, module: Module) -> Result<()> {
        if self.exists(name) {
            return Err(SpaError::DuplicateName {
                name: name.to_string(),
            });
        }
        check_module_name(name)?;
        check_module_ports(name, &module)?;
        debug!(module = name, "staging module");
        self.staged_modules.push((name.to_string(), module));
        Ok(())
    }

    /// Stage a helper under `<owner>.<base><n>` with the first free `n`.
    pub fn stage_helper(&mut self, base: &str, kind: HelperKind) -> String {
        let owner = self.role.owner().to_string();
        let mut n = 0;
        let name = loop {
            let candidate = format!("{owner}.{base}{n}");
            if !self.exists(&candidate) {
                break candidate;
            }
            n += 1;
        };
        debug!(module = %name, ?kind, "staging helper");
        self.staged_modules.push((name.clone(), Module::helper(kind)));
        name
    }

    /// Helper previously built for an equivalent sub-expression in this pass.
    pub fn cached_helper(&self, key: &StructuralKey) -> Option<&str> {
        self.helpers.get(key).map(String::as_str)
    }

    pub fn remember_helper(&mut self, key: StructuralKey, module: String) {
        self.helpers.insert(key, module);
    }

    /// The model's constant source, created on first use.
    pub fn bias(&mut self) -> PortRef {
        if !self.exists(BIAS_MODULE) {
            self.staged_modules
                .push((BIAS_MODULE.to_string(), Module::helper(HelperKind::Bias)));
        }
        PortRef::new(BIAS_MODULE, OUTPUT)
    }

    /// Validate a connection against the model plus staged modules and stage it.
    pub fn emit(&mut self, spec: ConnectionSpec) -> Result<()> {
        validate_connection(&spec, |r| self.lookup_port(r))?;
        debug!(
            source = %spec.source,
            sink = %spec.sink,
            rows = spec.transform.rows(),
            cols = spec.transform.cols(),
            gated = spec.gate.is_some(),
            "emit connection"
        );
        self.staged_connections.push(spec);
        Ok(())
    }

    /// Write staged modules and connections into the model.
    pub fn commit(mut self) -> Vec<ConnectionSpec> {
        self.committed = true;
        let staged_modules = std::mem::take(&mut self.staged_modules);
        let staged_connections = std::mem::take(&mut self.staged_connections);
        info!(
            role = self.role.kind_name(),
            owner = self.role.owner(),
            modules = staged_modules.len(),
            connections = staged_connections.len(),
            "committing compiled actions"
        );
        for (name, module) in staged_modules {
            self.model.insert(name, module);
        }
        for c in &staged_connections {
            self.model.push_connection(c.clone());
        }
        staged_connections
    }

    fn rollback(&mut self) {
        debug!(
            role = self.role.kind_name(),
            owner = self.role.owner(),
            vocabularies = self.touched.len(),
            "abandoning compilation pass"
        );
        for (vocab, len) in self.touched.drain(..) {
            vocab.truncate(len);
        }
        for (rng, state) in self.rng_states.drain(..) {
            rng.restore(state);
        }
        let created: Vec<usize> = self
            .model
            .vocabs()
            .iter()
            .map(|v| v.dimensions())
            .filter(|d| !self.vocab_dims.contains(d))
            .collect();
        for d in created {
            self.model.vocabs_mut().remove(d);
        }
    }
}

impl Drop for ConstructionContext<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Transform;

    fn role() -> Role {
        Role::Cortical {
            owner: "cortical".into(),
            synapse: 0.01,
        }
    }

    #[test]
    fn dropping_context_leaves_model_untouched() {
        let mut model = Model::new("test");
        model.register("a", Module::buffer(4)).unwrap();
        {
            let mut ctx = ConstructionContext::new(&mut model, role());
            let bias = ctx.bias();
            ctx.emit(ConnectionSpec::new(
                bias,
                PortRef::new("a", "input"),
                Transform::column(&[1.0, 0.0, 0.0, 0.0]),
            ))
            .unwrap();
            assert_eq!(ctx.staged_connections().len(), 1);
        }
        assert!(model.connections().is_empty());
        assert!(!model.contains(BIAS_MODULE));
    }

    #[test]
    fn dropping_context_forgets_new_symbols_and_draws() {
        let mut model = Model::with_seed("test", 3);
        let vocab = model.default_vocab(16);
        vocab.create_pointer("OLD").unwrap();
        let expected = {
            let mut rng = model.vocabs().rng().snapshot();
            rng.unit_vector(16)
        };
        {
            let mut ctx = ConstructionContext::new(&mut model, role());
            ctx.create_pointer(&vocab, "NEW").unwrap();
            ctx.create_pointer(&vocab, "OLD").unwrap();
            let wide = Port::input("x", 32, crate::module::PortVocab::Default);
            let v32 = ctx.vocab_of(&wide);
            ctx.create_pointer(&v32, "WIDE").unwrap();
        }
        assert_eq!(vocab.keys(), vec!["OLD".to_string()]);
        assert!(!model.vocabs().contains(32));
        let next = model.vocabs().rng().lock().unit_vector(16);
        assert_eq!(next, expected);
    }

    #[test]
    fn committed_symbols_are_kept() {
        let mut model = Model::with_seed("test", 3);
        let vocab = model.default_vocab(16);
        let mut ctx = ConstructionContext::new(&mut model, role());
        ctx.create_pointer(&vocab, "NEW").unwrap();
        ctx.commit();
        assert!(vocab.contains("NEW"));
    }

    #[test]
    fn commit_writes_modules_and_connections() {
        let mut model = Model::new("test");
        model.register("a", Module::buffer(4)).unwrap();
        let mut ctx = ConstructionContext::new(&mut model, role());
        let helper = ctx.stage_helper("product", HelperKind::Product { dimensions: 4 });
        assert_eq!(helper, "cortical.product0");
        let second = ctx.stage_helper("product", HelperKind::Product { dimensions: 4 });
        assert_eq!(second, "cortical.product1");

        let (src, _) = ctx.resolve_output(&helper).unwrap();
        ctx.emit(ConnectionSpec::new(
            src,
            PortRef::new("a", "input"),
            Transform::identity(4),
        ))
        .unwrap();
        let emitted = ctx.commit();
        assert_eq!(emitted.len(), 1);
        assert!(model.contains("cortical.product0"));
        assert_eq!(model.connections().len(), 1);
    }

    #[test]
    fn helper_cache_is_per_context() {
        let mut model = Model::new("test");
        let key = StructuralKey::of("(a * b)");
        {
            let mut ctx = ConstructionContext::new(&mut model, role());
            ctx.remember_helper(key.clone(), "cortical.product0".into());
            assert_eq!(ctx.cached_helper(&key), Some("cortical.product0"));
        }
        let ctx = ConstructionContext::new(&mut model, role());
        assert!(ctx.cached_helper(&key).is_none());
    }

    #[test]
    fn emit_rejects_unknown_ports() {
        let mut model = Model::new("test");
        let mut ctx = ConstructionContext::new(&mut model, role());
        let bias = ctx.bias();
        let err = ctx
            .emit(ConnectionSpec::new(
                bias,
                PortRef::new("ghost", "input"),
                Transform::column(&[1.0]),
            ))
            .unwrap_err();
        assert!(matches!(err, SpaError::NameResolution { .. }));
    }
}
