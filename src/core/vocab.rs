//! Vocabularies: symbol tables of semantic pointers for one dimensionality.
//!
//! A [`Vocabulary`] is shared (`Arc`) by every port that speaks it, so pointer
//! creation goes through an internal lock and takes `&self`. All vocabularies
//! of a [`VocabularyMap`] draw from the same [`SharedPrng`], which keeps the
//! generated pointers reproducible for a fixed seed and call order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ast::Expr;
use crate::error::{Result, SpaError};
use crate::pointer::SemanticPointer;
use crate::prng::SharedPrng;
use crate::transform::Transform;

/// Pointer generation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VocabularyConfig {
    /// New pointers are redrawn until their similarity to every existing
    /// pointer is below this bound.
    pub max_similarity: f32,
    /// Redraw budget; the last draw is kept when it runs out.
    pub max_attempts: usize,
}

impl Default for VocabularyConfig {
    fn default() -> Self {
        Self {
            max_similarity: 0.1,
            max_attempts: 100,
        }
    }
}

impl VocabularyConfig {
    pub fn with_max_similarity(mut self, max_similarity: f32) -> Self {
        self.max_similarity = max_similarity;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// True for names usable as semantic pointer symbols: an uppercase ASCII
/// letter followed by ASCII alphanumerics or underscores.
pub fn is_pointer_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    }
}

#[derive(Debug, Default)]
struct Entries {
    // Insertion order, for stable listings.
    keys: Vec<String>,
    pointers: HashMap<String, SemanticPointer>,
    unitary: HashSet<String>,
}

#[derive(Debug)]
pub struct Vocabulary {
    dimensions: usize,
    config: VocabularyConfig,
    rng: SharedPrng,
    entries: RwLock<Entries>,
}

impl Vocabulary {
    /// Create an empty vocabulary.
    ///
    /// # Panics
    /// Panics if `dimensions` is zero.
    pub fn new(dimensions: usize, rng: SharedPrng) -> Self {
        Self::with_config(dimensions, rng, VocabularyConfig::default())
    }

    /// # Panics
    /// Panics if `dimensions` is zero.
    pub fn with_config(dimensions: usize, rng: SharedPrng, config: VocabularyConfig) -> Self {
        assert!(dimensions > 0, "vocabulary dimensions must be > 0");
        Self {
            dimensions,
            config,
            rng,
            entries: RwLock::new(Entries::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|p| p.into_inner())
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn config(&self) -> VocabularyConfig {
        self.config
    }

    pub fn rng(&self) -> &SharedPrng {
        &self.rng
    }

    pub fn len(&self) -> usize {
        self.read().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Symbol names in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.read().keys.clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().pointers.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<SemanticPointer> {
        self.read().pointers.get(name).cloned()
    }

    pub fn is_unitary(&self, name: &str) -> bool {
        self.read().unitary.contains(name)
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if !is_pointer_name(name) {
            return Err(SpaError::validation_in(
                format!("Vocabulary({})", self.dimensions),
                "key",
                format!("'{name}' is not a valid pointer name; names must start with an uppercase letter"),
            ));
        }
        Ok(())
    }

    fn check_dims(&self, p: &SemanticPointer, op: &str) -> Result<()> {
        if p.dimensions() != self.dimensions {
            return Err(SpaError::mismatch(self.dimensions, p.dimensions(), op));
        }
        Ok(())
    }

    /// Return the pointer for `name`, drawing and storing a new random unit
    /// vector if the name is unknown.
    pub fn create_pointer(&self, name: &str) -> Result<SemanticPointer> {
        self.create(name, false)
    }

    /// Like [`create_pointer`](Self::create_pointer) but the new pointer is
    /// unitary. Fails if `name` already exists as an ordinary pointer.
    pub fn create_unitary_pointer(&self, name: &str) -> Result<SemanticPointer> {
        self.create(name, true)
    }

    fn create(&self, name: &str, unitary: bool) -> Result<SemanticPointer> {
        if let Some(existing) = self.existing(&self.read(), name, unitary)? {
            return Ok(existing);
        }
        self.check_name(name)?;

        let mut entries = self.write();
        // Another handle may have created it between the read and the write.
        if let Some(existing) = self.existing(&entries, name, unitary)? {
            return Ok(existing);
        }

        let mut candidate = self.draw(unitary);
        let mut attempts = 1;
        while attempts < self.config.max_attempts
            && exceeds_similarity(&entries, &candidate, self.config.max_similarity)
        {
            candidate = self.draw(unitary);
            attempts += 1;
        }
        if exceeds_similarity(&entries, &candidate, self.config.max_similarity) {
            warn!(
                symbol = name,
                dimensions = self.dimensions,
                attempts,
                "could not keep new pointer below max_similarity"
            );
        }
        debug!(symbol = name, dimensions = self.dimensions, unitary, "created pointer");

        entries.keys.push(name.to_string());
        entries.pointers.insert(name.to_string(), candidate.clone());
        if unitary {
            entries.unitary.insert(name.to_string());
        }
        Ok(candidate)
    }

    fn existing(&self, entries: &Entries, name: &str, unitary: bool) -> Result<Option<SemanticPointer>> {
        match entries.pointers.get(name) {
            Some(_) if unitary && !entries.unitary.contains(name) => Err(self.not_unitary(name)),
            found => Ok(found.cloned()),
        }
    }

    /// Forget every symbol created after the first `len`.
    pub(crate) fn truncate(&self, len: usize) {
        let mut entries = self.write();
        if entries.keys.len() <= len {
            return;
        }
        let removed = entries.keys.split_off(len);
        for key in &removed {
            entries.pointers.remove(key);
            entries.unitary.remove(key);
        }
        debug!(dimensions = self.dimensions, removed = removed.len(), "dropped symbols");
    }

    fn draw(&self, unitary: bool) -> SemanticPointer {
        let v = SemanticPointer::new(self.rng.lock().unit_vector(self.dimensions));
        if unitary {
            v.make_unitary()
        } else {
            v
        }
    }

    fn not_unitary(&self, name: &str) -> SpaError {
        SpaError::NotUnitary {
            symbol: name.to_string(),
            dimensions: self.dimensions,
        }
    }

    /// Look up `name` and insist it was created unitary.
    pub fn require_unitary(&self, name: &str) -> Result<SemanticPointer> {
        let entries = self.read();
        match entries.pointers.get(name) {
            None => Err(SpaError::NameResolution {
                name: name.to_string(),
                action: None,
            }),
            Some(_) if !entries.unitary.contains(name) => Err(self.not_unitary(name)),
            Some(p) => Ok(p.clone()),
        }
    }

    /// Store an externally built pointer under `name`.
    ///
    /// The pointer counts as unitary when its spectrum is flat.
    pub fn add(&self, name: &str, pointer: SemanticPointer) -> Result<()> {
        self.check_name(name)?;
        self.check_dims(&pointer, "vocabulary add")?;
        let mut entries = self.write();
        if entries.pointers.contains_key(name) {
            return Err(SpaError::validation_in(
                format!("Vocabulary({})", self.dimensions),
                "key",
                format!("'{name}' is already in the vocabulary"),
            ));
        }
        if pointer.is_unitary(1e-3) {
            entries.unitary.insert(name.to_string());
        }
        entries.keys.push(name.to_string());
        entries.pointers.insert(name.to_string(), pointer);
        Ok(())
    }

    pub fn bind(&self, a: &SemanticPointer, b: &SemanticPointer) -> Result<SemanticPointer> {
        self.check_dims(a, "bind")?;
        a.bind(b)
    }

    /// Approximate inverse of [`bind`](Self::bind); see [`SemanticPointer::unbind`].
    pub fn unbind(&self, bound: &SemanticPointer, key: &SemanticPointer) -> Result<SemanticPointer> {
        self.check_dims(bound, "unbind")?;
        bound.unbind(key)
    }

    /// Unbind with a named key that must be unitary, so the result is exact
    /// up to floating point error.
    pub fn unbind_exact(&self, bound: &SemanticPointer, key: &str) -> Result<SemanticPointer> {
        let key = self.require_unitary(key)?;
        self.unbind(bound, &key)
    }

    pub fn superpose(&self, terms: &[SemanticPointer]) -> Result<SemanticPointer> {
        SemanticPointer::superpose(self.dimensions, terms)
    }

    pub fn similarity(&self, a: &SemanticPointer, b: &SemanticPointer) -> Result<f32> {
        self.check_dims(a, "similarity")?;
        a.similarity(b)
    }

    /// Similarity of `pointer` to every symbol, best match first.
    pub fn similarities(&self, pointer: &SemanticPointer) -> Result<Vec<(String, f32)>> {
        self.check_dims(pointer, "similarities")?;
        let entries = self.read();

        #[cfg(feature = "parallel")]
        let mut scored: Vec<(String, f32)> = {
            use rayon::prelude::*;
            entries
                .keys
                .par_iter()
                .map(|k| (k.clone(), pointer.similarity(&entries.pointers[k]).unwrap_or(0.0)))
                .collect()
        };
        #[cfg(not(feature = "parallel"))]
        let mut scored: Vec<(String, f32)> = entries
            .keys
            .iter()
            .map(|k| (k.clone(), pointer.similarity(&entries.pointers[k]).unwrap_or(0.0)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(scored)
    }

    /// Matrix translating pointers of this vocabulary into `other`:
    /// `Σ_k other[k] · self[k]ᵀ` over the symbols both share.
    pub fn transform_to(&self, other: &Vocabulary) -> Transform {
        let mine = self.read();
        let theirs = other.read();
        let mut t = Transform::zeros(other.dimensions, self.dimensions);
        for key in &mine.keys {
            if let Some(target) = theirs.pointers.get(key) {
                let source = &mine.pointers[key];
                for (r, &tv) in target.as_slice().iter().enumerate() {
                    for (c, &sv) in source.as_slice().iter().enumerate() {
                        t.set(r, c, t.get(r, c) + tv * sv);
                    }
                }
            }
        }
        t
    }

    /// Evaluate a constant expression such as `"A * B + 0.5 * ~C"`, creating
    /// missing symbols on the way.
    pub fn parse(&self, text: &str) -> Result<SemanticPointer> {
        let expr = crate::parser::parse_expression(text)?;
        self.evaluate(&expr)
    }

    fn evaluate(&self, expr: &Expr) -> Result<SemanticPointer> {
        match expr {
            Expr::Symbol(name) => self.create_pointer(name),
            Expr::ModuleOutput(name) => self.get(name).ok_or_else(|| SpaError::NameResolution {
                name: name.clone(),
                action: None,
            }),
            Expr::Scalar(k) => Ok(SemanticPointer::identity(self.dimensions).scaled(*k)),
            Expr::Bind(a, b) => self.evaluate(a)?.bind(&self.evaluate(b)?),
            Expr::Superpose(terms) => {
                let parts = terms
                    .iter()
                    .map(|t| self.evaluate(t))
                    .collect::<Result<Vec<_>>>()?;
                self.superpose(&parts)
            }
            Expr::Scale(a, k) => Ok(self.evaluate(a)?.scaled(*k)),
            Expr::Invert(a) => Ok(self.evaluate(a)?.involution()),
            Expr::DotProduct(..) => Err(SpaError::validation(
                "expression",
                "dot() yields a scalar and cannot be used as a pointer",
            )),
        }
    }
}

fn exceeds_similarity(entries: &Entries, candidate: &SemanticPointer, bound: f32) -> bool {
    entries
        .pointers
        .values()
        .any(|p| p.similarity(candidate).unwrap_or(0.0) >= bound)
}

/// One [`Vocabulary`] per dimensionality.
#[derive(Debug, Clone)]
pub struct VocabularyMap {
    vocabs: BTreeMap<usize, Arc<Vocabulary>>,
    rng: SharedPrng,
    config: VocabularyConfig,
}

impl VocabularyMap {
    pub fn new(rng: SharedPrng) -> Self {
        Self {
            vocabs: BTreeMap::new(),
            rng,
            config: VocabularyConfig::default(),
        }
    }

    /// Seed the map with existing vocabularies. Two vocabularies of the same
    /// dimensionality are rejected.
    pub fn from_vocabs<I>(vocabs: I, rng: SharedPrng) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<Vocabulary>>,
    {
        let mut map = Self::new(rng);
        for v in vocabs {
            map.insert(v)?;
        }
        Ok(map)
    }

    pub fn with_config(mut self, config: VocabularyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn rng(&self) -> &SharedPrng {
        &self.rng
    }

    pub fn insert(&mut self, vocab: Arc<Vocabulary>) -> Result<()> {
        let d = vocab.dimensions();
        if self.vocabs.contains_key(&d) {
            return Err(SpaError::validation_in(
                "VocabularyMap",
                "vocabs",
                format!("a {d}-D vocabulary is already registered"),
            ));
        }
        self.vocabs.insert(d, vocab);
        Ok(())
    }

    pub fn get(&self, dimensions: usize) -> Option<Arc<Vocabulary>> {
        self.vocabs.get(&dimensions).cloned()
    }

    /// The vocabulary for `dimensions`, created on first request. Repeated
    /// calls return the same instance.
    pub fn get_or_create(&mut self, dimensions: usize) -> Arc<Vocabulary> {
        let rng = &self.rng;
        let config = self.config;
        self.vocabs
            .entry(dimensions)
            .or_insert_with(|| {
                debug!(dimensions, "creating default vocabulary");
                Arc::new(Vocabulary::with_config(dimensions, rng.clone(), config))
            })
            .clone()
    }

    pub(crate) fn remove(&mut self, dimensions: usize) -> Option<Arc<Vocabulary>> {
        self.vocabs.remove(&dimensions)
    }

    pub fn contains(&self, dimensions: usize) -> bool {
        self.vocabs.contains_key(&dimensions)
    }

    pub fn len(&self) -> usize {
        self.vocabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocabs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Vocabulary>> {
        self.vocabs.values()
    }
}

impl Default for VocabularyMap {
    fn default() -> Self {
        Self::new(SharedPrng::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(d: usize, seed: u64) -> Vocabulary {
        Vocabulary::new(d, SharedPrng::new(seed))
    }

    #[test]
    fn create_pointer_is_idempotent() {
        let v = vocab(32, 1);
        let a1 = v.create_pointer("A").unwrap();
        let a2 = v.create_pointer("A").unwrap();
        assert_eq!(a1, a2);
        assert_eq!(v.len(), 1);
        assert!((a1.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn creation_is_deterministic_for_a_seed() {
        let a = vocab(16, 99);
        let b = vocab(16, 99);
        for name in ["A", "B", "C"] {
            assert_eq!(a.create_pointer(name).unwrap(), b.create_pointer(name).unwrap());
        }
    }

    #[test]
    fn new_pointers_respect_max_similarity() {
        let v = vocab(64, 5);
        for i in 0..10 {
            v.create_pointer(&format!("P{i}")).unwrap();
        }
        let keys = v.keys();
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                let s = v.similarity(&v.get(a).unwrap(), &v.get(b).unwrap()).unwrap();
                assert!(s < 0.1, "{a}·{b} = {s}");
            }
        }
    }

    #[test]
    fn rejects_lowercase_names() {
        let v = vocab(8, 1);
        let err = v.create_pointer("cat").unwrap_err();
        assert!(matches!(err, SpaError::Validation { .. }));
        assert!(err.to_string().contains("Vocabulary(8).key"));
    }

    #[test]
    fn unitary_requirement_is_checked() {
        let v = vocab(32, 2);
        v.create_pointer("PLAIN").unwrap();
        let err = v.require_unitary("PLAIN").unwrap_err();
        assert_eq!(
            err,
            SpaError::NotUnitary {
                symbol: "PLAIN".into(),
                dimensions: 32
            }
        );
        assert!(v.create_unitary_pointer("PLAIN").is_err());

        let u = v.create_unitary_pointer("ROLE").unwrap();
        assert!(u.is_unitary(1e-3));
        assert!(v.require_unitary("ROLE").is_ok());
    }

    #[test]
    fn racing_unitary_creation_never_hands_out_a_plain_pointer() {
        for seed in 0..50 {
            let v = vocab(16, seed);
            let unitary = std::thread::scope(|s| {
                let plain = s.spawn(|| v.create_pointer("X"));
                let unitary = s.spawn(|| v.create_unitary_pointer("X"));
                plain.join().unwrap().unwrap();
                unitary.join().unwrap()
            });
            if unitary.is_ok() {
                assert!(v.is_unitary("X"));
            } else {
                assert!(!v.is_unitary("X"));
            }
        }
    }

    #[test]
    fn truncate_forgets_later_symbols() {
        let v = vocab(16, 4);
        let a = v.create_pointer("A").unwrap();
        v.create_unitary_pointer("B").unwrap();
        v.truncate(1);
        assert_eq!(v.keys(), vec!["A".to_string()]);
        assert!(!v.contains("B"));
        assert!(!v.is_unitary("B"));
        assert_eq!(v.get("A"), Some(a));
    }

    #[test]
    fn unbind_exact_recovers_filler() {
        let v = vocab(64, 3);
        let role = v.create_unitary_pointer("ROLE").unwrap();
        let filler = v.create_pointer("FILLER").unwrap();
        let bound = v.bind(&role, &filler).unwrap();
        let recovered = v.unbind_exact(&bound, "ROLE").unwrap();
        assert!(recovered.distance_inf(&filler).unwrap() < 1e-3);
    }

    #[test]
    fn add_checks_dimensions_and_duplicates() {
        let v = vocab(4, 1);
        assert!(matches!(
            v.add("X", SemanticPointer::zeros(3)),
            Err(SpaError::DimensionMismatch { .. })
        ));
        v.add("X", SemanticPointer::new(vec![1.0, 0.0, 0.0, 0.0])).unwrap();
        assert!(v.add("X", SemanticPointer::zeros(4)).is_err());
        // [1, 0, 0, 0] has a flat spectrum.
        assert!(v.is_unitary("X"));
    }

    #[test]
    fn similarities_rank_best_first() {
        let v = vocab(64, 4);
        let a = v.create_pointer("A").unwrap();
        v.create_pointer("B").unwrap();
        v.create_pointer("C").unwrap();
        let ranked = v.similarities(&a).unwrap();
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].0, "A");
        assert!((ranked[0].1 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn independent_pointers_concentrate_near_zero() {
        // Mean |similarity| of independent draws shrinks roughly as 1/sqrt(D).
        let mean_abs = |d: usize| {
            let v = Vocabulary::with_config(
                d,
                SharedPrng::new(17),
                VocabularyConfig::default().with_max_similarity(1.1),
            );
            let ps: Vec<_> = (0..40)
                .map(|i| v.create_pointer(&format!("S{i}")).unwrap())
                .collect();
            let mut total = 0.0;
            let mut n = 0;
            for i in 0..ps.len() {
                for j in i + 1..ps.len() {
                    total += ps[i].similarity(&ps[j]).unwrap().abs();
                    n += 1;
                }
            }
            total / n as f32
        };
        let small = mean_abs(16);
        let large = mean_abs(256);
        assert!(large < small, "{large} !< {small}");
        assert!(large < 0.1, "{large}");
    }

    #[test]
    fn transform_to_maps_shared_keys() {
        let rng = SharedPrng::new(8);
        let a = Vocabulary::new(32, rng.clone());
        let b = Vocabulary::new(32, rng);
        let ka = a.create_pointer("DOG").unwrap();
        let kb = b.create_pointer("DOG").unwrap();
        b.create_pointer("CAT").unwrap();

        let t = a.transform_to(&b);
        assert_eq!(t.shape(), (32, 32));
        let mapped = SemanticPointer::new(t.apply(ka.as_slice()).unwrap());
        assert!(mapped.similarity(&kb).unwrap() > 0.99);
    }

    #[test]
    fn parse_evaluates_constant_expressions() {
        let v = vocab(32, 6);
        let p = v.parse("A * B + C").unwrap();
        let expected = (&v.bind(&v.get("A").unwrap(), &v.get("B").unwrap()).unwrap()
            + &v.get("C").unwrap())
            .unwrap();
        assert!(p.distance_inf(&expected).unwrap() < 1e-5);
        assert!(v.parse("dot(A, B)").is_err());
        assert!(v.parse("missing").is_err());
    }

    #[test]
    fn map_get_or_create_returns_same_instance() {
        let mut map = VocabularyMap::default();
        let a = map.get_or_create(16);
        let b = map.get_or_create(16);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(map.len(), 1);
        let c = map.get_or_create(32);
        assert!(!Arc::ptr_eq(&a, &c));
        assert!(a.rng().ptr_eq(c.rng()));
    }

    #[test]
    fn map_rejects_duplicate_dimensions() {
        let rng = SharedPrng::new(1);
        let v1 = Arc::new(Vocabulary::new(8, rng.clone()));
        let v2 = Arc::new(Vocabulary::new(8, rng.clone()));
        assert!(VocabularyMap::from_vocabs([v1.clone()], rng.clone()).is_ok());
        assert!(VocabularyMap::from_vocabs([v1, v2], rng).is_err());
    }
}
