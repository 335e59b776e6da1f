//! Semantic pointers and their algebra.
//!
//! Binding is circular convolution. Unbinding convolves with the involution
//! of the key, which is only an exact inverse when the key is unitary; for
//! ordinary random keys the result is a noisy approximation of the bound
//! filler. Callers that need the exact law must use unitary keys.

use core::ops::{Add, Neg, Sub};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "simd")]
use wide::f32x4;

use crate::error::{Result, SpaError};
use crate::transform::Transform;

/// Plain dot product over the common prefix of two slices.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    #[cfg(feature = "simd")]
    {
        let n = a.len().min(b.len());
        let chunks = n / 4;
        let mut acc = f32x4::splat(0.0);
        for i in 0..chunks {
            let j = i * 4;
            let va = f32x4::from([a[j], a[j + 1], a[j + 2], a[j + 3]]);
            let vb = f32x4::from([b[j], b[j + 1], b[j + 2], b[j + 3]]);
            acc += va * vb;
        }
        let mut sum: f32 = acc.to_array().iter().sum();
        for j in chunks * 4..n {
            sum += a[j] * b[j];
        }
        sum
    }
    #[cfg(not(feature = "simd"))]
    {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SemanticPointer {
    v: Vec<f32>,
}

impl SemanticPointer {
    pub fn new(v: Vec<f32>) -> Self {
        Self { v }
    }

    pub fn zeros(dimensions: usize) -> Self {
        Self {
            v: vec![0.0; dimensions],
        }
    }

    /// The identity of binding: `[1, 0, 0, ...]`.
    pub fn identity(dimensions: usize) -> Self {
        let mut v = vec![0.0; dimensions];
        if let Some(first) = v.first_mut() {
            *first = 1.0;
        }
        Self { v }
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.v.len()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.v
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.v
    }

    fn check(&self, other: &SemanticPointer, op: &str) -> Result<()> {
        if self.dimensions() != other.dimensions() {
            return Err(SpaError::mismatch(self.dimensions(), other.dimensions(), op));
        }
        Ok(())
    }

    pub fn dot(&self, other: &SemanticPointer) -> Result<f32> {
        self.check(other, "dot product")?;
        Ok(dot(&self.v, &other.v))
    }

    pub fn norm(&self) -> f32 {
        dot(&self.v, &self.v).sqrt()
    }

    /// Unit-length copy; the zero vector stays zero.
    pub fn normalized(&self) -> SemanticPointer {
        let n = self.norm();
        if n <= f32::EPSILON {
            return self.clone();
        }
        self.scaled(1.0 / n)
    }

    /// Normalized dot product, clamped to `[-1, 1]`. Zero when either side is
    /// the zero vector.
    pub fn similarity(&self, other: &SemanticPointer) -> Result<f32> {
        self.check(other, "similarity")?;
        let denom = self.norm() * other.norm();
        if denom <= f32::EPSILON {
            return Ok(0.0);
        }
        Ok((dot(&self.v, &other.v) / denom).clamp(-1.0, 1.0))
    }

    pub fn scaled(&self, k: f32) -> SemanticPointer {
        Self {
            v: self.v.iter().map(|x| x * k).collect(),
        }
    }

    /// Circular convolution `c[i] = Σ_j a[j] · b[(i - j) mod D]`.
    pub fn bind(&self, other: &SemanticPointer) -> Result<SemanticPointer> {
        self.check(other, "bind")?;
        let d = self.dimensions();
        let mut out = vec![0.0; d];
        for (i, slot) in out.iter_mut().enumerate() {
            let mut acc = 0.0;
            for j in 0..d {
                acc += self.v[j] * other.v[(d + i - j) % d];
            }
            *slot = acc;
        }
        Ok(Self { v: out })
    }

    /// Approximate inverse of [`bind`](Self::bind): `self ⊛ involution(key)`.
    ///
    /// Exact only when `key` is unitary.
    pub fn unbind(&self, key: &SemanticPointer) -> Result<SemanticPointer> {
        self.bind(&key.involution())
    }

    /// `a'[0] = a[0]`, `a'[i] = a[D - i]`.
    pub fn involution(&self) -> SemanticPointer {
        let d = self.dimensions();
        Self {
            v: (0..d).map(|i| self.v[(d - i) % d]).collect(),
        }
    }

    /// Element-wise sum, not renormalized.
    pub fn superpose<'a, I>(dimensions: usize, terms: I) -> Result<SemanticPointer>
    where
        I: IntoIterator<Item = &'a SemanticPointer>,
    {
        let mut acc = vec![0.0; dimensions];
        for t in terms {
            if t.dimensions() != dimensions {
                return Err(SpaError::mismatch(dimensions, t.dimensions(), "superpose"));
            }
            for (a, x) in acc.iter_mut().zip(&t.v) {
                *a += x;
            }
        }
        Ok(Self { v: acc })
    }

    /// Matrix `M` with `M · x == self ⊛ x` for every `x`.
    ///
    /// Convolution by a constant is linear, so this is how a constant operand
    /// of a binding turns into a connection transform.
    pub fn convolution_matrix(&self) -> Transform {
        let d = self.dimensions();
        Transform::from_fn(d, d, |i, j| self.v[(d + i - j) % d])
    }

    /// Permutation matrix realizing [`involution`](Self::involution).
    pub fn involution_matrix(dimensions: usize) -> Transform {
        let d = dimensions;
        Transform::from_fn(d, d, |i, j| if j == (d - i) % d { 1.0 } else { 0.0 })
    }

    /// Project onto the unitary pointers: every Fourier coefficient is scaled
    /// to magnitude one, so binding with the result preserves norms.
    pub fn make_unitary(&self) -> SemanticPointer {
        let spectrum = dft(&self.v);
        let unit: Vec<(f64, f64)> = spectrum
            .into_iter()
            .map(|(re, im)| {
                let mag = (re * re + im * im).sqrt();
                if mag <= f64::EPSILON {
                    (1.0, 0.0)
                } else {
                    (re / mag, im / mag)
                }
            })
            .collect();
        Self { v: idft_real(&unit) }
    }

    /// True when every Fourier coefficient has magnitude `1 ± tol`.
    pub fn is_unitary(&self, tol: f32) -> bool {
        dft(&self.v).into_iter().all(|(re, im)| {
            let mag = (re * re + im * im).sqrt() as f32;
            (mag - 1.0).abs() <= tol
        })
    }

    /// Largest absolute component difference.
    pub fn distance_inf(&self, other: &SemanticPointer) -> Result<f32> {
        self.check(other, "distance")?;
        Ok(self
            .v
            .iter()
            .zip(&other.v)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max))
    }
}

impl From<Vec<f32>> for SemanticPointer {
    fn from(v: Vec<f32>) -> Self {
        Self::new(v)
    }
}

impl Add for &SemanticPointer {
    type Output = Result<SemanticPointer>;

    fn add(self, rhs: Self) -> Result<SemanticPointer> {
        SemanticPointer::superpose(self.dimensions(), [self, rhs])
    }
}

impl Sub for &SemanticPointer {
    type Output = Result<SemanticPointer>;

    fn sub(self, rhs: Self) -> Result<SemanticPointer> {
        let neg = -rhs;
        SemanticPointer::superpose(self.dimensions(), [self, &neg])
    }
}

impl Neg for &SemanticPointer {
    type Output = SemanticPointer;

    fn neg(self) -> SemanticPointer {
        self.scaled(-1.0)
    }
}

// Naive O(D²) transforms. Vocabularies are built once per model, so the
// quadratic cost only shows up at construction time.
fn dft(x: &[f32]) -> Vec<(f64, f64)> {
    let n = x.len();
    let step = core::f64::consts::TAU / n.max(1) as f64;
    (0..n)
        .map(|k| {
            let mut re = 0.0;
            let mut im = 0.0;
            for (t, &xt) in x.iter().enumerate() {
                let angle = step * ((k * t) % n) as f64;
                re += xt as f64 * angle.cos();
                im -= xt as f64 * angle.sin();
            }
            (re, im)
        })
        .collect()
}

fn idft_real(spectrum: &[(f64, f64)]) -> Vec<f32> {
    let n = spectrum.len();
    let step = core::f64::consts::TAU / n.max(1) as f64;
    (0..n)
        .map(|t| {
            let mut acc = 0.0;
            for (k, &(re, im)) in spectrum.iter().enumerate() {
                let angle = step * ((k * t) % n) as f64;
                acc += re * angle.cos() - im * angle.sin();
            }
            (acc / n as f64) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prng::Prng;

    fn random(rng: &mut Prng, d: usize) -> SemanticPointer {
        SemanticPointer::new(rng.unit_vector(d))
    }

    #[test]
    fn bind_is_commutative_and_associative() {
        let mut rng = Prng::new(11);
        let a = random(&mut rng, 32);
        let b = random(&mut rng, 32);
        let c = random(&mut rng, 32);

        let ab = a.bind(&b).unwrap();
        let ba = b.bind(&a).unwrap();
        assert!(ab.distance_inf(&ba).unwrap() < 1e-5);

        let left = ab.bind(&c).unwrap();
        let right = a.bind(&b.bind(&c).unwrap()).unwrap();
        assert!(left.distance_inf(&right).unwrap() < 1e-5);
    }

    #[test]
    fn identity_is_neutral_for_bind() {
        let mut rng = Prng::new(5);
        let a = random(&mut rng, 16);
        let bound = a.bind(&SemanticPointer::identity(16)).unwrap();
        assert!(bound.distance_inf(&a).unwrap() < 1e-6);
    }

    #[test]
    fn unbind_with_unitary_key_recovers_filler() {
        let mut rng = Prng::new(21);
        let key = random(&mut rng, 64).make_unitary();
        let filler = random(&mut rng, 64);
        assert!(key.is_unitary(1e-3));

        let recovered = key.bind(&filler).unwrap().unbind(&key).unwrap();
        assert!(recovered.distance_inf(&filler).unwrap() < 1e-3);
    }

    #[test]
    fn unbind_with_plain_key_is_only_approximate() {
        let mut rng = Prng::new(22);
        let key = random(&mut rng, 256);
        let filler = random(&mut rng, 256);
        let recovered = key.bind(&filler).unwrap().unbind(&key).unwrap();
        let sim = recovered.similarity(&filler).unwrap();
        assert!(sim > 0.5, "similarity {sim}");
        assert!(sim < 0.999, "plain keys should not give an exact inverse");
    }

    #[test]
    fn convolution_matrix_matches_bind() {
        let mut rng = Prng::new(8);
        let a = random(&mut rng, 16);
        let x = random(&mut rng, 16);
        let via_matrix = a.convolution_matrix().apply(x.as_slice()).unwrap();
        let direct = a.bind(&x).unwrap();
        assert!(SemanticPointer::new(via_matrix).distance_inf(&direct).unwrap() < 1e-5);
    }

    #[test]
    fn involution_matrix_matches_involution() {
        let a = SemanticPointer::new(vec![1.0, 2.0, 3.0, 4.0]);
        let via_matrix = SemanticPointer::involution_matrix(4).apply(a.as_slice()).unwrap();
        assert_eq!(via_matrix, vec![1.0, 4.0, 3.0, 2.0]);
        assert_eq!(a.involution().as_slice(), &[1.0, 4.0, 3.0, 2.0]);
    }

    #[test]
    fn similarity_is_bounded_and_self_similar() {
        let mut rng = Prng::new(1);
        let a = random(&mut rng, 32);
        let b = random(&mut rng, 32);
        assert!((a.similarity(&a).unwrap() - 1.0).abs() < 1e-5);
        let s = a.similarity(&b).unwrap();
        assert!((-1.0..=1.0).contains(&s));
        assert_eq!(a.similarity(&SemanticPointer::zeros(32)).unwrap(), 0.0);
    }

    #[test]
    fn mismatched_dimensions_fail() {
        let a = SemanticPointer::zeros(8);
        let b = SemanticPointer::zeros(16);
        assert!(matches!(
            a.bind(&b),
            Err(SpaError::DimensionMismatch {
                expected: 8,
                actual: 16,
                ..
            })
        ));
        assert!(a.similarity(&b).is_err());
        assert!((&a + &b).is_err());
    }

    #[test]
    fn superpose_does_not_renormalize() {
        let a = SemanticPointer::new(vec![1.0, 0.0]);
        let b = SemanticPointer::new(vec![1.0, 0.0]);
        let s = (&a + &b).unwrap();
        assert_eq!(s.as_slice(), &[2.0, 0.0]);
        let d = (&a - &b).unwrap();
        assert_eq!(d.as_slice(), &[0.0, 0.0]);
    }
}
