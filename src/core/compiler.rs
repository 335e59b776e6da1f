//! Evaluation of action syntax trees into connections.
//!
//! Every expression is evaluated against the vocabulary of the port it ends
//! up in. A sub-expression whose leaves are all symbols collapses to a
//! constant pointer. Anything that touches a module output stays *live*: a
//! sum of `transform · source` terms plus an optional constant offset. Binding
//! a live value with a constant is linear and folds into the term transforms;
//! binding two live values needs a product helper module.
//!
//! Output of a pass is staged in the [`ConstructionContext`] and committed
//! only when every action of the batch compiled.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::ast::{Action, Actions, Expr, StructuralKey};
use crate::context::{ConstructionContext, Role};
use crate::error::{Result, SpaError};
use crate::model::{ConnectionSpec, PortRef};
use crate::module::{HelperKind, Port, INPUT, OUTPUT};
use crate::pointer::SemanticPointer;
use crate::transform::Transform;
use crate::vocab::Vocabulary;

/// Parse `actions` and compile them under `ctx`.
///
/// The batch is all-or-nothing: if any rule fails to parse or compile the
/// context is dropped and the model is left untouched. On success the staged
/// helper modules and connections are committed and the connections returned.
pub fn compile<S: AsRef<str>>(
    actions: &[S],
    ctx: ConstructionContext<'_>,
) -> Result<Vec<ConnectionSpec>> {
    let actions = Actions::parse(actions)?;
    compile_actions(&actions, ctx)
}

/// Compile already parsed actions; see [`compile`].
pub fn compile_actions(
    actions: &Actions,
    mut ctx: ConstructionContext<'_>,
) -> Result<Vec<ConnectionSpec>> {
    check_role(actions, ctx.role())?;
    {
        let mut compiler = ActionCompiler::new(&mut ctx);
        for action in actions {
            compiler
                .compile_action(action)
                .map_err(|e| e.in_action(action.index))?;
        }
    }
    Ok(ctx.commit())
}

/// Structural rules checked before anything is staged.
fn check_role(actions: &Actions, role: &Role) -> Result<()> {
    match role {
        Role::Cortical { .. } => {
            if let Some(a) = actions.iter().find(|a| a.condition.is_some()) {
                return Err(SpaError::validation_in(
                    role.kind_name(),
                    "actions",
                    format!(
                        "{} has a condition ('{}'); cortical actions must be unconditional",
                        a.label(),
                        a.source.trim()
                    ),
                ));
            }
        }
        Role::BasalGanglia { channels, .. } | Role::Thalamus { channels, .. } => {
            if actions.len() != *channels {
                return Err(SpaError::validation_in(
                    role.kind_name(),
                    "actions",
                    format!("{} actions for {channels} channels", actions.len()),
                ));
            }
            if matches!(role, Role::BasalGanglia { .. }) {
                if let Some(a) = actions.iter().find(|a| a.condition.is_none()) {
                    return Err(SpaError::validation_in(
                        role.kind_name(),
                        "actions",
                        format!("{} has no condition", a.label()),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// `transform · source`.
#[derive(Debug, Clone)]
struct Term {
    source: PortRef,
    transform: Transform,
}

/// `Σ terms + constant`, a vector of `dimensions` computed at run time.
#[derive(Debug, Clone)]
struct Linear {
    dimensions: usize,
    terms: Vec<Term>,
    constant: Option<SemanticPointer>,
}

impl Linear {
    fn source(source: PortRef, transform: Transform) -> Self {
        Self {
            dimensions: transform.rows(),
            terms: vec![Term { source, transform }],
            constant: None,
        }
    }

    /// Left-multiply every term (and the offset) by a linear map given as a
    /// matrix and the same map on pointers.
    fn map(
        self,
        m: &Transform,
        on_constant: impl Fn(&SemanticPointer) -> Result<SemanticPointer>,
    ) -> Result<Self> {
        let terms = self
            .terms
            .into_iter()
            .map(|t| {
                Ok(Term {
                    transform: m.matmul(&t.transform)?,
                    source: t.source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let constant = self.constant.as_ref().map(on_constant).transpose()?;
        Ok(Self {
            dimensions: m.rows(),
            terms,
            constant,
        })
    }

    fn scaled(self, k: f32) -> Self {
        Self {
            dimensions: self.dimensions,
            terms: self
                .terms
                .into_iter()
                .map(|t| Term {
                    transform: t.transform.scaled(k),
                    source: t.source,
                })
                .collect(),
            constant: self.constant.map(|c| c.scaled(k)),
        }
    }

    fn add_constant(mut self, p: &SemanticPointer) -> Result<Self> {
        self.constant = Some(match self.constant.take() {
            Some(c) => (&c + p)?,
            None => p.clone(),
        });
        Ok(self)
    }

    /// Sum of two live values; terms reading the same source are merged so
    /// every source yields one connection.
    fn add(mut self, other: Linear) -> Result<Self> {
        if other.dimensions != self.dimensions {
            return Err(SpaError::mismatch(self.dimensions, other.dimensions, "superpose"));
        }
        for t in other.terms {
            match self.terms.iter_mut().find(|s| s.source == t.source) {
                Some(s) => s.transform = s.transform.add(&t.transform)?,
                None => self.terms.push(t),
            }
        }
        match other.constant {
            Some(c) => self.add_constant(&c),
            None => Ok(self),
        }
    }
}

#[derive(Debug, Clone)]
enum Value {
    Scalar(f32),
    Pointer(SemanticPointer),
    Live(Linear),
}

impl Value {
    fn scaled(self, k: f32) -> Self {
        match self {
            Value::Scalar(s) => Value::Scalar(s * k),
            Value::Pointer(p) => Value::Pointer(p.scaled(k)),
            Value::Live(l) => Value::Live(l.scaled(k)),
        }
    }
}

/// Walks actions under one [`ConstructionContext`].
pub struct ActionCompiler<'c, 'm> {
    ctx: &'c mut ConstructionContext<'m>,
}

impl<'c, 'm> ActionCompiler<'c, 'm> {
    pub fn new(ctx: &'c mut ConstructionContext<'m>) -> Self {
        Self { ctx }
    }

    /// Stage everything `action` needs in the context's role.
    ///
    /// A basal ganglia pass compiles conditions into utilities; cortical and
    /// thalamus passes compile effects.
    pub fn compile_action(&mut self, action: &Action) -> Result<()> {
        trace!(action = action.index, source = %action.source, "compiling action");
        match self.ctx.role().clone() {
            Role::BasalGanglia { owner, .. } => {
                let condition = action.condition.as_ref().ok_or_else(|| {
                    SpaError::validation_in(
                        "BasalGanglia",
                        "actions",
                        format!("{} has no condition", action.label()),
                    )
                })?;
                self.compile_condition(action, condition, &owner)
            }
            Role::Cortical { .. } => self.compile_effects(action, None),
            Role::Thalamus { owner, .. } => {
                let channel = PortRef::element(&owner, OUTPUT, action.index);
                self.compile_effects(action, Some(channel))
            }
        }
    }

    fn compile_effects(&mut self, action: &Action, gate: Option<PortRef>) -> Result<()> {
        for effect in &action.effects {
            let (sink, port) = self.ctx.resolve_input(&effect.sink).ok_or_else(|| {
                SpaError::NameResolution {
                    name: effect.sink.clone(),
                    action: Some(action.index),
                }
            })?;
            let vocab = self.ctx.vocab_of(&port);
            let value = self.evaluate(&effect.expr, &vocab)?;
            debug!(
                action = action.index,
                sink = %sink,
                expr = %effect.expr,
                "compiling effect"
            );
            let context = format!("effect on {sink}");
            let linear = match value {
                Value::Live(l) => l,
                Value::Pointer(p) => constant_linear(p),
                Value::Scalar(k) if port.dimensions == 1 => {
                    constant_linear(SemanticPointer::new(vec![k]))
                }
                Value::Scalar(_) => {
                    return Err(SpaError::validation(
                        "effect",
                        format!("'{}' is a scalar but {sink} is a vector", effect.expr),
                    ))
                }
            };
            if linear.dimensions != port.dimensions {
                return Err(SpaError::mismatch(port.dimensions, linear.dimensions, context));
            }
            self.route(linear, &sink, gate.as_ref(), Some(action.index))?;
        }
        Ok(())
    }

    /// Emit the connections realizing `value` into `sink`.
    ///
    /// With a gate, terms are gated by it and the constant is fed from the
    /// gate itself; otherwise the constant comes from the model bias.
    fn route(
        &mut self,
        value: Linear,
        sink: &PortRef,
        gate: Option<&PortRef>,
        action: Option<usize>,
    ) -> Result<()> {
        let synapse = self.ctx.role().synapse();
        for term in value.terms {
            let mut spec = ConnectionSpec::new(term.source, sink.clone(), term.transform)
                .with_synapse(synapse);
            if let Some(g) = gate {
                spec = spec.with_gate(g.clone());
            }
            if let Some(i) = action {
                spec = spec.for_action(i);
            }
            self.ctx.emit(spec)?;
        }
        if let Some(c) = value.constant {
            let source = match gate {
                Some(g) => g.clone(),
                None => self.ctx.bias(),
            };
            let mut spec = ConnectionSpec::new(source, sink.clone(), Transform::column(c.as_slice()))
                .with_synapse(synapse);
            if let (Some(_), Some(f)) = (gate, self.ctx.role().channel_function()) {
                spec = spec.with_function(f);
            }
            if let Some(i) = action {
                spec = spec.for_action(i);
            }
            self.ctx.emit(spec)?;
        }
        Ok(())
    }

    fn evaluate(&mut self, expr: &Expr, vocab: &Arc<Vocabulary>) -> Result<Value> {
        match expr {
            Expr::Scalar(k) => Ok(Value::Scalar(*k)),
            // A registered module shadows a symbol of the same name.
            Expr::Symbol(name) if self.ctx.resolve_output(name).is_some() => {
                self.module_output(name, vocab)
            }
            Expr::Symbol(name) => Ok(Value::Pointer(self.ctx.create_pointer(vocab, name)?)),
            Expr::ModuleOutput(name) => self.module_output(name, vocab),
            Expr::Scale(a, k) => Ok(self.evaluate(a, vocab)?.scaled(*k)),
            Expr::Superpose(terms) => {
                let mut acc: Option<Value> = None;
                for t in terms {
                    let v = self.evaluate(t, vocab)?;
                    acc = Some(match acc {
                        None => v,
                        Some(prev) => add(prev, v)?,
                    });
                }
                acc.ok_or_else(|| SpaError::validation("expression", "empty sum"))
            }
            Expr::Invert(a) => match self.evaluate(a, vocab)? {
                Value::Pointer(p) => Ok(Value::Pointer(p.involution())),
                Value::Live(l) => {
                    let m = SemanticPointer::involution_matrix(l.dimensions);
                    Ok(Value::Live(l.map(&m, |c| Ok(c.involution()))?))
                }
                Value::Scalar(_) => Err(SpaError::validation(
                    "expression",
                    format!("'{expr}' inverts a scalar"),
                )),
            },
            Expr::Bind(a, b) => {
                let x = self.evaluate(a, vocab)?;
                let y = self.evaluate(b, vocab)?;
                match (x, y) {
                    (Value::Scalar(k), v) | (v, Value::Scalar(k)) => Ok(v.scaled(k)),
                    (Value::Pointer(p), Value::Pointer(q)) => Ok(Value::Pointer(p.bind(&q)?)),
                    (Value::Pointer(p), Value::Live(l)) | (Value::Live(l), Value::Pointer(p)) => {
                        if p.dimensions() != l.dimensions {
                            return Err(SpaError::mismatch(l.dimensions, p.dimensions(), "bind"));
                        }
                        let m = p.convolution_matrix();
                        Ok(Value::Live(l.map(&m, |c| c.bind(&p))?))
                    }
                    (Value::Live(l), Value::Live(r)) => {
                        let key = StructuralKey::pair(&helper_tag("bind", vocab), a, b);
                        let d = l.dimensions;
                        let out = self.helper(key, "product", HelperKind::Product { dimensions: d }, l, r)?;
                        Ok(Value::Live(Linear::source(out, Transform::identity(d))))
                    }
                }
            }
            Expr::DotProduct(..) => Err(SpaError::validation(
                "effect",
                format!("'{expr}' yields a scalar; dot() is only valid in conditions"),
            )),
        }
    }

    /// A module port read through `vocab`, or a symbol of `vocab` written in
    /// lowercase-initial form.
    fn module_output(&mut self, name: &str, vocab: &Arc<Vocabulary>) -> Result<Value> {
        let Some((source, port)) = self.ctx.resolve_output(name) else {
            return vocab
                .get(name)
                .map(Value::Pointer)
                .ok_or_else(|| SpaError::NameResolution {
                    name: name.to_string(),
                    action: None,
                });
        };
        if port.dimensions != vocab.dimensions() {
            return Err(SpaError::mismatch(
                vocab.dimensions(),
                port.dimensions,
                format!("reading {source}"),
            ));
        }
        let transform = match port.vocabulary() {
            Some(theirs) if !Arc::ptr_eq(theirs, vocab) => {
                debug!(%source, dimensions = port.dimensions, "translating between vocabularies");
                theirs.transform_to(vocab)
            }
            _ => Transform::identity(port.dimensions),
        };
        Ok(Value::Live(Linear::source(source, transform)))
    }

    /// Output of the helper for a non-linear pair of live operands, building
    /// and wiring it on first use in this pass.
    fn helper(
        &mut self,
        key: StructuralKey,
        base: &str,
        kind: HelperKind,
        a: Linear,
        b: Linear,
    ) -> Result<PortRef> {
        if let Some(name) = self.ctx.cached_helper(&key) {
            trace!(helper = name, key = key.canonical(), "reusing helper");
            return Ok(PortRef::new(name, OUTPUT));
        }
        if a.dimensions != b.dimensions {
            return Err(SpaError::mismatch(a.dimensions, b.dimensions, base));
        }
        let name = self.ctx.stage_helper(base, kind);
        self.route(a, &PortRef::new(&name, "a"), None, None)?;
        self.route(b, &PortRef::new(&name, "b"), None, None)?;
        self.ctx.remember_helper(key, name.clone());
        Ok(PortRef::new(&name, OUTPUT))
    }

    /// Utility of channel `action.index`: the condition is a sum of scaled
    /// `dot()` terms and scalars, each feeding `owner.input[i]`.
    fn compile_condition(&mut self, action: &Action, condition: &Expr, owner: &str) -> Result<()> {
        let sink = PortRef::element(owner, INPUT, action.index);
        let mut terms = Vec::new();
        flatten(condition, 1.0, &mut terms);

        let mut bias = 0.0;
        let mut has_bias = false;
        for (k, term) in terms {
            match term {
                Expr::Scalar(s) => {
                    bias += k * s;
                    has_bias = true;
                }
                Expr::DotProduct(a, b) => {
                    let vocab = self.condition_vocab(action, a, b)?;
                    let x = self.evaluate(a, &vocab)?;
                    let y = self.evaluate(b, &vocab)?;
                    match (x, y) {
                        (Value::Pointer(p), Value::Pointer(q)) => {
                            bias += k * p.dot(&q)?;
                            has_bias = true;
                        }
                        (Value::Live(l), Value::Pointer(p)) | (Value::Pointer(p), Value::Live(l)) => {
                            if p.dimensions() != l.dimensions {
                                return Err(SpaError::mismatch(l.dimensions, p.dimensions(), "dot"));
                            }
                            let row = Transform::row(p.as_slice()).scaled(k);
                            if let Some(c) = &l.constant {
                                bias += k * p.dot(c)?;
                                has_bias = true;
                            }
                            let projected = Linear {
                                constant: None,
                                ..l
                            };
                            self.route(projected.map(&row, |c| Ok(c.clone()))?, &sink, None, Some(action.index))?;
                        }
                        (Value::Live(l), Value::Live(r)) => {
                            let d = l.dimensions;
                            let key = StructuralKey::pair(&helper_tag("dot", &vocab), a, b);
                            let out = self.helper(key, "dot", HelperKind::DotProduct { dimensions: d }, l, r)?;
                            self.route(
                                Linear::source(out, Transform::filled(1, 1, k)),
                                &sink,
                                None,
                                Some(action.index),
                            )?;
                        }
                        _ => {
                            return Err(SpaError::validation_in(
                                "BasalGanglia",
                                "condition",
                                format!("'{term}' takes the dot product of a scalar"),
                            ))
                        }
                    }
                }
                other => {
                    return Err(SpaError::validation_in(
                        "BasalGanglia",
                        "condition",
                        format!(
                            "'{other}' in {}: conditions are sums of dot() terms and scalars",
                            action.label()
                        ),
                    ))
                }
            }
        }
        if has_bias {
            let bias_src = self.ctx.bias();
            let spec = ConnectionSpec::new(bias_src, sink, Transform::filled(1, 1, bias))
                .with_synapse(self.ctx.role().synapse())
                .for_action(action.index);
            self.ctx.emit(spec)?;
        }
        Ok(())
    }

    /// Vocabulary a `dot()` is evaluated in: that of the first operand naming
    /// a module port, else that of the action's first effect sink.
    fn condition_vocab(&mut self, action: &Action, a: &Expr, b: &Expr) -> Result<Arc<Vocabulary>> {
        let mut names = Vec::new();
        a.collect_names(&mut names);
        b.collect_names(&mut names);
        let live: Option<Port> = names
            .iter()
            .filter_map(|n| self.ctx.resolve_output(n))
            .map(|(_, p)| p)
            .next();
        if let Some(port) = live {
            return Ok(self.ctx.vocab_of(&port));
        }
        let effect = action.effects.first().ok_or_else(|| {
            SpaError::validation("condition", format!("{} has no effect to type its condition", action.label()))
        })?;
        let (_, port) = self.ctx.resolve_input(&effect.sink).ok_or_else(|| SpaError::NameResolution {
            name: effect.sink.clone(),
            action: None,
        })?;
        Ok(self.ctx.vocab_of(&port))
    }
}

/// Helper cache tag: the operation and the vocabulary the operands were read
/// into, since equal expressions translated into different vocabularies are
/// different signals.
fn helper_tag(op: &str, vocab: &Arc<Vocabulary>) -> String {
    format!("{op}{}@{:p}", vocab.dimensions(), Arc::as_ptr(vocab))
}

fn constant_linear(p: SemanticPointer) -> Linear {
    Linear {
        dimensions: p.dimensions(),
        terms: Vec::new(),
        constant: Some(p),
    }
}

fn add(a: Value, b: Value) -> Result<Value> {
    match (a, b) {
        (Value::Scalar(x), Value::Scalar(y)) => Ok(Value::Scalar(x + y)),
        (Value::Pointer(p), Value::Pointer(q)) => Ok(Value::Pointer((&p + &q)?)),
        (Value::Live(l), Value::Pointer(p)) | (Value::Pointer(p), Value::Live(l)) => {
            if p.dimensions() != l.dimensions {
                return Err(SpaError::mismatch(l.dimensions, p.dimensions(), "superpose"));
            }
            Ok(Value::Live(l.add_constant(&p)?))
        }
        (Value::Live(l), Value::Live(r)) => Ok(Value::Live(l.add(r)?)),
        _ => Err(SpaError::validation(
            "expression",
            "cannot add a scalar to a vector",
        )),
    }
}

/// Split a condition into `(coefficient, term)` pairs.
fn flatten<'e>(expr: &'e Expr, k: f32, out: &mut Vec<(f32, &'e Expr)>) {
    match expr {
        Expr::Superpose(terms) => terms.iter().for_each(|t| flatten(t, k, out)),
        Expr::Scale(a, s) => flatten(a, k * s, out),
        other => out.push((k, other)),
    }
}
