//! Syntax tree of action rules.

use core::fmt;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Expr {
    /// Vocabulary symbol (`A`, `CAT`).
    Symbol(String),
    /// Module port reference (`state`, `vision.out`).
    ModuleOutput(String),
    /// Numeric literal.
    Scalar(f32),
    /// Circular convolution (`a * b`).
    Bind(Box<Expr>, Box<Expr>),
    /// Sum of terms (`a + b`, `a - b`).
    Superpose(Vec<Expr>),
    /// Scalar multiple (`0.5 * a`, `-a`).
    Scale(Box<Expr>, f32),
    /// Similarity (`dot(a, b)`).
    DotProduct(Box<Expr>, Box<Expr>),
    /// Approximate inverse (`~a`).
    Invert(Box<Expr>),
}

impl Expr {
    pub fn symbol(name: &str) -> Self {
        Expr::Symbol(name.to_string())
    }

    pub fn module(name: &str) -> Self {
        Expr::ModuleOutput(name.to_string())
    }

    pub fn bind(a: Expr, b: Expr) -> Self {
        Expr::Bind(Box::new(a), Box::new(b))
    }

    pub fn scale(a: Expr, k: f32) -> Self {
        Expr::Scale(Box::new(a), k)
    }

    pub fn dot(a: Expr, b: Expr) -> Self {
        Expr::DotProduct(Box::new(a), Box::new(b))
    }

    pub fn invert(a: Expr) -> Self {
        Expr::Invert(Box::new(a))
    }

    /// True if no leaf refers to a module.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Symbol(_) | Expr::Scalar(_) => true,
            Expr::ModuleOutput(_) => false,
            Expr::Bind(a, b) | Expr::DotProduct(a, b) => a.is_constant() && b.is_constant(),
            Expr::Superpose(terms) => terms.iter().all(Expr::is_constant),
            Expr::Scale(a, _) | Expr::Invert(a) => a.is_constant(),
        }
    }

    /// Append every symbol and module name in the tree, left to right.
    pub fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Symbol(n) | Expr::ModuleOutput(n) => out.push(n.as_str()),
            Expr::Scalar(_) => {}
            Expr::Bind(a, b) | Expr::DotProduct(a, b) => {
                a.collect_names(out);
                b.collect_names(out);
            }
            Expr::Superpose(terms) => terms.iter().for_each(|t| t.collect_names(out)),
            Expr::Scale(a, _) | Expr::Invert(a) => a.collect_names(out),
        }
    }

    /// Canonical text: commutative operands are ordered, so `a * B` and
    /// `B * a` (or `x + y` and `y + x`) print the same.
    pub fn canonical(&self) -> String {
        match self {
            Expr::Symbol(n) | Expr::ModuleOutput(n) => n.clone(),
            Expr::Scalar(k) => format!("{k:?}"),
            Expr::Bind(a, b) => {
                let (x, y) = ordered(a.canonical(), b.canonical());
                format!("({x} * {y})")
            }
            Expr::DotProduct(a, b) => {
                let (x, y) = ordered(a.canonical(), b.canonical());
                format!("dot({x}, {y})")
            }
            Expr::Superpose(terms) => {
                let mut parts: Vec<String> = terms.iter().map(Expr::canonical).collect();
                parts.sort();
                format!("({})", parts.join(" + "))
            }
            Expr::Scale(a, k) => format!("({k:?} * {})", a.canonical()),
            Expr::Invert(a) => format!("~{}", a.canonical()),
        }
    }

    pub fn structural_key(&self) -> StructuralKey {
        StructuralKey::of(&self.canonical())
    }
}

fn ordered(a: String, b: String) -> (String, String) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Symbol(n) | Expr::ModuleOutput(n) => write!(f, "{n}"),
            Expr::Scalar(k) => write!(f, "{k}"),
            Expr::Bind(a, b) => write!(f, "({a} * {b})"),
            Expr::Superpose(terms) => {
                write!(f, "(")?;
                for (i, t) in terms.iter().enumerate() {
                    if i > 0 {
                        write!(f, " + ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
            Expr::Scale(a, k) => write!(f, "({k} * {a})"),
            Expr::DotProduct(a, b) => write!(f, "dot({a}, {b})"),
            Expr::Invert(a) => write!(f, "~{a}"),
        }
    }
}

/// Hash of a canonical expression, used to share helper structures between
/// sub-expressions that compute the same thing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructuralKey {
    hash: u64,
    canonical: String,
}

impl StructuralKey {
    pub fn of(canonical: &str) -> Self {
        let mut h = DefaultHasher::new();
        canonical.hash(&mut h);
        Self {
            hash: h.finish(),
            canonical: canonical.to_string(),
        }
    }

    /// Key for an unordered pair of sub-expressions under an operation tag.
    pub fn pair(op: &str, a: &Expr, b: &Expr) -> Self {
        let (x, y) = ordered(a.canonical(), b.canonical());
        Self::of(&format!("{op}({x}, {y})"))
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

/// `sink = expr`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Effect {
    pub sink: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Action {
    /// Position in its rule set; also the utility channel index.
    pub index: usize,
    pub name: Option<String>,
    pub source: String,
    pub condition: Option<Expr>,
    pub effects: Vec<Effect>,
}

impl Action {
    /// Every name the action refers to, in order of appearance, for deferred
    /// resolution against a model.
    pub fn referenced_names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if let Some(c) = &self.condition {
            c.collect_names(&mut out);
        }
        for e in &self.effects {
            out.push(e.sink.as_str());
            e.expr.collect_names(&mut out);
        }
        out
    }

    /// Label used in diagnostics: the name if there is one, else the index.
    pub fn label(&self) -> String {
        match &self.name {
            Some(n) => n.clone(),
            None => format!("action {}", self.index),
        }
    }
}

/// An ordered rule set.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Actions {
    actions: Vec<Action>,
}

impl Actions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse every rule; nothing is returned unless all of them parse.
    pub fn parse<I, S>(rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Self::new();
        for r in rules {
            out.add(r.as_ref())?;
        }
        Ok(out)
    }

    pub fn add(&mut self, rule: &str) -> Result<&Action> {
        let action = crate::parser::parse_action(rule, self.actions.len())?;
        self.actions.push(action);
        Ok(&self.actions[self.actions.len() - 1])
    }

    pub fn add_named(&mut self, name: &str, rule: &str) -> Result<&Action> {
        let mut action = crate::parser::parse_action(rule, self.actions.len())?;
        action.name = Some(name.to_string());
        self.actions.push(action);
        Ok(&self.actions[self.actions.len() - 1])
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Action> {
        self.actions.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Action> {
        self.actions.get(index)
    }

    pub fn as_slice(&self) -> &[Action] {
        &self.actions
    }
}

impl<'a> IntoIterator for &'a Actions {
    type Item = &'a Action;
    type IntoIter = core::slice::Iter<'a, Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_ignores_commutative_order() {
        let a = Expr::bind(Expr::module("a"), Expr::symbol("CAT"));
        let b = Expr::bind(Expr::symbol("CAT"), Expr::module("a"));
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(a.structural_key(), b.structural_key());

        let s1 = Expr::Superpose(vec![Expr::symbol("A"), Expr::symbol("B")]);
        let s2 = Expr::Superpose(vec![Expr::symbol("B"), Expr::symbol("A")]);
        assert_eq!(s1.structural_key(), s2.structural_key());

        let d = Expr::bind(Expr::module("a"), Expr::symbol("DOG"));
        assert_ne!(a.structural_key(), d.structural_key());
    }

    #[test]
    fn constant_detection() {
        assert!(Expr::bind(Expr::symbol("A"), Expr::Scalar(2.0)).is_constant());
        assert!(!Expr::Superpose(vec![Expr::symbol("A"), Expr::module("x")]).is_constant());
    }

    #[test]
    fn referenced_names_in_order() {
        let action = Action {
            index: 0,
            name: None,
            source: String::new(),
            condition: Some(Expr::dot(Expr::module("state"), Expr::symbol("A"))),
            effects: vec![Effect {
                sink: "motor".into(),
                expr: Expr::bind(Expr::module("state"), Expr::symbol("B")),
            }],
        };
        assert_eq!(
            action.referenced_names(),
            vec!["state", "A", "motor", "state", "B"]
        );
        assert_eq!(action.label(), "action 0");
    }
}
